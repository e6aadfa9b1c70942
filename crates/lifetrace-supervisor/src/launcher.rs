// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process launch seam used by the supervisor.
//!
//! [`CommandLauncher`] runs real child processes; tests substitute their own
//! [`ServiceLauncher`] to script exits and spawn failures.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lifetrace_config::model::ServiceConfig;
use lifetrace_core::LifetraceError;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Static description of a supervised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unique name; also the name the service uses in its heartbeats.
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub heartbeat_timeout: Duration,
}

impl ServiceDescriptor {
    pub fn from_config(config: &ServiceConfig, default_timeout: Duration) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.as_ref().map(PathBuf::from),
            heartbeat_timeout: config
                .heartbeat_timeout_secs
                .map_or(default_timeout, Duration::from_secs),
        }
    }
}

/// How a service process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSummary {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl std::fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A running service instance.
#[async_trait]
pub trait ServiceHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> Result<Option<ExitSummary>, LifetraceError>;

    /// Ask the process to stop, forcing it after `grace`.
    async fn terminate(&mut self, grace: Duration) -> Result<(), LifetraceError>;
}

pub trait ServiceLauncher: Send + Sync {
    fn spawn(&self, service: &ServiceDescriptor) -> Result<Box<dyn ServiceHandle>, LifetraceError>;
}

/// Launches services as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl ServiceLauncher for CommandLauncher {
    fn spawn(&self, service: &ServiceDescriptor) -> Result<Box<dyn ServiceHandle>, LifetraceError> {
        let mut command = Command::new(&service.command);
        command.args(&service.args).envs(&service.env).kill_on_drop(true);
        if let Some(dir) = &service.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| LifetraceError::Process {
            service: service.name.clone(),
            message: format!("failed to spawn `{}`: {e}", service.command),
        })?;
        debug!(service = %service.name, pid = ?child.id(), "service process spawned");

        Ok(Box::new(ChildHandle {
            name: service.name.clone(),
            child,
        }))
    }
}

struct ChildHandle {
    name: String,
    child: Child,
}

impl ChildHandle {
    fn process_err(&self, message: String) -> LifetraceError {
        LifetraceError::Process {
            service: self.name.clone(),
            message,
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: plain kill(2) on a pid we spawned and have not reaped.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                warn!(service = %self.name, pid, "SIGTERM failed: {}", std::io::Error::last_os_error());
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {}
}

#[async_trait]
impl ServiceHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<ExitSummary>, LifetraceError> {
        self.child
            .try_wait()
            .map(|status| status.map(|s| ExitSummary { code: s.code() }))
            .map_err(|e| self.process_err(format!("wait failed: {e}")))
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), LifetraceError> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }

        self.signal_terminate();
        let waited = tokio::time::timeout(grace, self.child.wait()).await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(self.process_err(format!("wait failed: {e}"))),
            Err(_) => {
                warn!(service = %self.name, grace_secs = grace.as_secs(), "service ignored SIGTERM, killing");
                self.child
                    .kill()
                    .await
                    .map_err(|e| self.process_err(format!("kill failed: {e}")))
            }
        }
    }
}
