// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heartbeat-driven supervisor.
//!
//! Per service: `stopped -> starting -> running -> restarting -> running`,
//! or `permanently_stopped` once the restart budget is spent. A check pass
//! looks at heartbeat liveness first and process exit second, since a hung
//! process is only visible through its silence.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifetrace_config::model::{HeartbeatConfig, SupervisorConfig};
use lifetrace_core::{LifetraceError, LivenessStatus, ServiceState};
use lifetrace_heartbeat::HeartbeatRegistry;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::launcher::{ServiceDescriptor, ServiceHandle, ServiceLauncher};
use crate::policy::{RestartPolicy, RestartState};

/// Timing and budget knobs for the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    pub policy: RestartPolicy,
    pub restart_delay: Duration,
    pub terminate_grace: Duration,
    pub startup_grace: Duration,
    pub check_interval: Duration,
    /// Registry sweep timeout for services without an override.
    pub heartbeat_timeout: Duration,
}

impl SupervisorOptions {
    pub fn from_config(supervisor: &SupervisorConfig, heartbeat: &HeartbeatConfig) -> Self {
        Self {
            policy: RestartPolicy {
                max_attempts: supervisor.max_restart_attempts,
                reset_window: supervisor.reset_window(),
            },
            restart_delay: supervisor.restart_delay(),
            terminate_grace: supervisor.terminate_grace(),
            startup_grace: supervisor.startup_grace(),
            check_interval: supervisor.check_interval(),
            heartbeat_timeout: heartbeat.timeout(),
        }
    }
}

/// Externally visible state of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub liveness: LivenessStatus,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SupervisorStatus {
    pub running: bool,
    pub services: BTreeMap<String, ServiceStatus>,
}

struct ManagedService {
    descriptor: ServiceDescriptor,
    state: ServiceState,
    handle: Option<Box<dyn ServiceHandle>>,
    restart: RestartState,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl ManagedService {
    fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(|h| h.pid())
    }
}

pub struct ServiceSupervisor {
    services: Mutex<BTreeMap<String, ManagedService>>,
    status: StdMutex<SupervisorStatus>,
    registry: Arc<HeartbeatRegistry>,
    launcher: Arc<dyn ServiceLauncher>,
    options: SupervisorOptions,
    running: AtomicBool,
}

impl ServiceSupervisor {
    pub fn new(
        descriptors: Vec<ServiceDescriptor>,
        registry: Arc<HeartbeatRegistry>,
        launcher: Arc<dyn ServiceLauncher>,
        options: SupervisorOptions,
    ) -> Self {
        let mut services = BTreeMap::new();
        for descriptor in descriptors {
            registry.expect(&descriptor.name, Some(descriptor.heartbeat_timeout));
            services.insert(
                descriptor.name.clone(),
                ManagedService {
                    descriptor,
                    state: ServiceState::Stopped,
                    handle: None,
                    restart: RestartState::default(),
                    started_at: None,
                    last_error: None,
                },
            );
        }

        let status = snapshot(&services, &registry, false);
        Self {
            services: Mutex::new(services),
            status: StdMutex::new(status),
            registry,
            launcher,
            options,
            running: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    /// Launch every stopped service.
    pub async fn start_all(&self) {
        self.running.store(true, Ordering::SeqCst);
        let now = Utc::now();
        let mut services = self.services.lock().await;
        for service in services.values_mut() {
            if service.state == ServiceState::Stopped {
                self.launch(service, now);
            }
        }
        self.publish(&services);
    }

    /// Terminate every service and leave it stopped.
    pub async fn stop_all(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut services = self.services.lock().await;
        for service in services.values_mut() {
            self.shut_down(service).await;
            service.state = ServiceState::Stopped;
        }
        info!("all services stopped");
        self.publish(&services);
    }

    /// Restart one service immediately, restoring its full restart budget.
    pub async fn restart_one(&self, name: &str) -> Result<(), LifetraceError> {
        let mut services = self.services.lock().await;
        let service = services.get_mut(name).ok_or_else(|| LifetraceError::NotFound {
            kind: "service".to_string(),
            id: name.to_string(),
        })?;

        info!(service = %name, "manual restart requested");
        service.restart.reset();
        self.shut_down(service).await;
        let launched = self.launch(service, Utc::now());
        let result = if launched {
            Ok(())
        } else {
            Err(LifetraceError::Process {
                service: name.to_string(),
                message: service.last_error.clone().unwrap_or_default(),
            })
        };
        self.publish(&services);
        result
    }

    pub fn get_status(&self) -> SupervisorStatus {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn check_once(&self) {
        self.check_at(Utc::now()).await;
    }

    /// One supervision pass evaluated at `now`.
    ///
    /// A service already being handled in this pass is never restarted twice.
    pub async fn check_at(&self, now: DateTime<Utc>) {
        self.registry.sweep_at(self.options.heartbeat_timeout, now);

        let mut services = self.services.lock().await;
        for service in services.values_mut() {
            let reason = match service.state {
                ServiceState::Stopped => None,
                ServiceState::PermanentlyStopped => service
                    .restart
                    .window_elapsed(&self.options.policy, now)
                    .then(|| "restart budget reset window elapsed".to_string()),
                ServiceState::Starting | ServiceState::Running | ServiceState::Restarting => {
                    self.failure_reason(service, now)
                }
            };

            if let Some(reason) = reason {
                self.restart(service, &reason, now).await;
            }
        }
        self.publish(&services);
    }

    fn failure_reason(&self, service: &mut ManagedService, now: DateTime<Utc>) -> Option<String> {
        let name = service.descriptor.name.as_str();
        let timeout = service.descriptor.heartbeat_timeout;

        match service.state {
            ServiceState::Running => {
                if !self.registry.is_alive_at(name, timeout, now) {
                    return Some(format!("no heartbeat within {}s", timeout.as_secs()));
                }
            }
            ServiceState::Starting => {
                let started_at = service.started_at.unwrap_or(now);
                let heard = self
                    .registry
                    .last_seen(name)
                    .is_some_and(|seen| seen >= started_at);
                if heard {
                    info!(service = %name, pid = ?service.pid(), "service is running");
                    service.state = ServiceState::Running;
                } else if (now - started_at)
                    .to_std()
                    .is_ok_and(|silent| silent > self.options.startup_grace)
                {
                    return Some(format!(
                        "no heartbeat within {}s of start",
                        self.options.startup_grace.as_secs()
                    ));
                }
            }
            _ => {}
        }

        let Some(handle) = service.handle.as_mut() else {
            return Some("service process is not running".to_string());
        };
        match handle.try_wait() {
            Ok(Some(exit)) => Some(format!("process exited ({exit})")),
            Ok(None) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    async fn restart(&self, service: &mut ManagedService, reason: &str, now: DateTime<Utc>) {
        let name = service.descriptor.name.clone();

        if !service.restart.try_acquire(&self.options.policy, now) {
            if service.state != ServiceState::PermanentlyStopped {
                error!(
                    service = %name,
                    reason,
                    attempts = service.restart.restart_count,
                    "restart budget exhausted, leaving service stopped"
                );
                self.shut_down(service).await;
                service.state = ServiceState::PermanentlyStopped;
                service.last_error = Some(reason.to_string());
            }
            return;
        }

        warn!(
            service = %name,
            reason,
            attempt = service.restart.restart_count,
            max_attempts = self.options.policy.max_attempts,
            "restarting service"
        );
        service.state = ServiceState::Restarting;
        service.last_error = Some(reason.to_string());
        self.shut_down(service).await;
        tokio::time::sleep(self.options.restart_delay).await;
        self.launch(service, now);
    }

    /// Spawn a fresh process. On failure the service stays `restarting`
    /// without a handle so the next pass charges another attempt.
    fn launch(&self, service: &mut ManagedService, now: DateTime<Utc>) -> bool {
        match self.launcher.spawn(&service.descriptor) {
            Ok(handle) => {
                info!(service = %service.descriptor.name, pid = ?handle.pid(), "service started");
                service.handle = Some(handle);
                service.state = ServiceState::Starting;
                service.started_at = Some(now);
                true
            }
            Err(e) => {
                error!(service = %service.descriptor.name, error = %e, "service failed to start");
                service.handle = None;
                service.state = ServiceState::Restarting;
                service.started_at = Some(now);
                service.last_error = Some(e.to_string());
                false
            }
        }
    }

    async fn shut_down(&self, service: &mut ManagedService) {
        if let Some(mut handle) = service.handle.take() {
            debug!(service = %service.descriptor.name, pid = ?handle.pid(), "terminating service");
            if let Err(e) = handle.terminate(self.options.terminate_grace).await {
                warn!(service = %service.descriptor.name, error = %e, "service did not terminate cleanly");
            }
        }
    }

    fn publish(&self, services: &BTreeMap<String, ManagedService>) {
        let status = snapshot(services, &self.registry, self.running.load(Ordering::SeqCst));
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    /// Check on every `check_interval` until `cancel` fires, then stop all
    /// services.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; services were just started.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.check_once().await,
            }
        }
        self.stop_all().await;
    }
}

fn snapshot(
    services: &BTreeMap<String, ManagedService>,
    registry: &HeartbeatRegistry,
    running: bool,
) -> SupervisorStatus {
    SupervisorStatus {
        running,
        services: services
            .iter()
            .map(|(name, service)| {
                (
                    name.clone(),
                    ServiceStatus {
                        state: service.state,
                        pid: service.pid(),
                        liveness: registry.status_of(name),
                        restart_count: service.restart.restart_count,
                        last_restart_at: service.restart.last_restart_at,
                        last_error: service.last_error.clone(),
                    },
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize};

    use async_trait::async_trait;
    use chrono::TimeDelta;
    use lifetrace_heartbeat::{Heartbeat, HeartbeatPayload};
    use lifetrace_heartbeat::wire::to_epoch_secs;

    use super::*;
    use crate::launcher::ExitSummary;

    /// Scripted launcher: every handle shares one "exited" switch per spawn.
    #[derive(Default)]
    struct MockLauncher {
        spawns: AtomicUsize,
        next_pid: AtomicU32,
        fail_next: AtomicUsize,
        exits: StdMutex<Vec<Arc<AtomicBool>>>,
        terminated: Arc<AtomicUsize>,
    }

    impl MockLauncher {
        fn exit_latest(&self) {
            if let Some(flag) = self.exits.lock().unwrap().last() {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    struct MockHandle {
        pid: u32,
        exited: Arc<AtomicBool>,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ServiceHandle for MockHandle {
        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        fn try_wait(&mut self) -> Result<Option<ExitSummary>, LifetraceError> {
            Ok(self
                .exited
                .load(Ordering::SeqCst)
                .then_some(ExitSummary { code: Some(1) }))
        }

        async fn terminate(&mut self, _grace: Duration) -> Result<(), LifetraceError> {
            self.exited.store(true, Ordering::SeqCst);
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl ServiceLauncher for MockLauncher {
        fn spawn(&self, service: &ServiceDescriptor) -> Result<Box<dyn ServiceHandle>, LifetraceError> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LifetraceError::Process {
                    service: service.name.clone(),
                    message: "spawn refused".to_string(),
                });
            }
            let exited = Arc::new(AtomicBool::new(false));
            self.exits.lock().unwrap().push(Arc::clone(&exited));
            Ok(Box::new(MockHandle {
                pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
                exited,
                terminated: Arc::clone(&self.terminated),
            }))
        }
    }

    fn descriptor(name: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            command: format!("/usr/bin/{name}"),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            heartbeat_timeout: Duration::from_secs(30),
        }
    }

    fn options() -> SupervisorOptions {
        SupervisorOptions {
            policy: RestartPolicy {
                max_attempts: 3,
                reset_window: Duration::from_secs(3600),
            },
            restart_delay: Duration::from_secs(5),
            terminate_grace: Duration::from_secs(5),
            startup_grace: Duration::from_secs(30),
            check_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc::now()
    }

    fn beat(registry: &HeartbeatRegistry, service: &str, at: DateTime<Utc>) {
        registry.record(&Heartbeat {
            service: service.to_string(),
            pid: 1,
            timestamp: to_epoch_secs(at),
            status: "running".to_string(),
            data: HeartbeatPayload::default(),
        });
    }

    fn setup(names: &[&str]) -> (ServiceSupervisor, Arc<HeartbeatRegistry>, Arc<MockLauncher>) {
        let registry = Arc::new(HeartbeatRegistry::new());
        let launcher = Arc::new(MockLauncher::default());
        let supervisor = ServiceSupervisor::new(
            names.iter().map(|n| descriptor(n)).collect(),
            Arc::clone(&registry),
            launcher.clone(),
            options(),
        );
        (supervisor, registry, launcher)
    }

    fn state(supervisor: &ServiceSupervisor, name: &str) -> ServiceState {
        supervisor.get_status().services[name].state
    }

    #[tokio::test(start_paused = true)]
    async fn starting_service_becomes_running_on_heartbeat() {
        let (supervisor, registry, _launcher) = setup(&["ocr"]);
        assert_eq!(state(&supervisor, "ocr"), ServiceState::Stopped);

        supervisor.start_all().await;
        let start = supervisor.get_status();
        assert!(start.running);
        assert_eq!(start.services["ocr"].state, ServiceState::Starting);
        assert_eq!(start.services["ocr"].pid, Some(1000));

        beat(&registry, "ocr", Utc::now() + TimeDelta::seconds(1));
        supervisor.check_at(Utc::now() + TimeDelta::seconds(2)).await;
        assert_eq!(state(&supervisor, "ocr"), ServiceState::Running);
        assert_eq!(
            supervisor.get_status().services["ocr"].liveness,
            LivenessStatus::Alive
        );
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_are_bounded_until_reset_window() {
        let (supervisor, registry, launcher) = setup(&["ocr"]);
        let t0 = t0();
        supervisor.start_all().await;
        beat(&registry, "ocr", t0 + TimeDelta::seconds(1));
        supervisor.check_at(t0 + TimeDelta::seconds(2)).await;
        assert_eq!(state(&supervisor, "ocr"), ServiceState::Running);

        // Silent from here on: each pass past the grace period charges one attempt.
        for (i, secs) in [40, 80, 120].into_iter().enumerate() {
            supervisor.check_at(t0 + TimeDelta::seconds(secs)).await;
            let status = &supervisor.get_status().services["ocr"];
            assert_eq!(status.state, ServiceState::Starting);
            assert_eq!(status.restart_count, i as u32 + 1);
        }
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 4);

        supervisor.check_at(t0 + TimeDelta::seconds(160)).await;
        assert_eq!(state(&supervisor, "ocr"), ServiceState::PermanentlyStopped);
        supervisor.check_at(t0 + TimeDelta::seconds(1000)).await;
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 4);
        assert_eq!(supervisor.get_status().services["ocr"].pid, None);

        supervisor.check_at(t0 + TimeDelta::seconds(120 + 3600)).await;
        let status = &supervisor.get_status().services["ocr"];
        assert_eq!(status.state, ServiceState::Starting);
        assert_eq!(status.restart_count, 1);
        assert_eq!(launcher.spawns.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn process_exit_triggers_restart() {
        let (supervisor, registry, launcher) = setup(&["recorder"]);
        let t0 = t0();
        supervisor.start_all().await;
        beat(&registry, "recorder", t0 + TimeDelta::seconds(1));
        supervisor.check_at(t0 + TimeDelta::seconds(2)).await;

        launcher.exit_latest();
        supervisor.check_at(t0 + TimeDelta::seconds(3)).await;
        let status = &supervisor.get_status().services["recorder"];
        assert_eq!(status.state, ServiceState::Starting);
        assert_eq!(status.pid, Some(1001));
        assert!(status.last_error.as_deref().unwrap().contains("exit code 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_counts_against_budget() {
        let (supervisor, _registry, launcher) = setup(&["worker"]);
        launcher.fail_next.store(2, Ordering::SeqCst);
        let t0 = t0();

        supervisor.start_all().await;
        assert_eq!(state(&supervisor, "worker"), ServiceState::Restarting);

        supervisor.check_at(t0 + TimeDelta::seconds(10)).await;
        let status = &supervisor.get_status().services["worker"];
        assert_eq!(status.state, ServiceState::Restarting);
        assert_eq!(status.restart_count, 1);

        supervisor.check_at(t0 + TimeDelta::seconds(20)).await;
        let status = &supervisor.get_status().services["worker"];
        assert_eq!(status.state, ServiceState::Starting);
        assert_eq!(status.restart_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_one_resets_budget_and_stop_all_terminates() {
        let (supervisor, _registry, launcher) = setup(&["ocr", "sync"]);
        let t0 = t0();
        supervisor.start_all().await;
        supervisor.check_at(t0 + TimeDelta::seconds(40)).await;
        assert_eq!(supervisor.get_status().services["ocr"].restart_count, 1);

        supervisor.restart_one("ocr").await.unwrap();
        let status = supervisor.get_status();
        assert_eq!(status.services["ocr"].restart_count, 0);
        assert_eq!(status.services["ocr"].state, ServiceState::Starting);
        assert!(matches!(
            supervisor.restart_one("missing").await,
            Err(LifetraceError::NotFound { .. })
        ));

        let before = launcher.terminated.load(Ordering::SeqCst);
        supervisor.stop_all().await;
        let status = supervisor.get_status();
        assert!(!status.running);
        assert!(status.services.values().all(|s| s.state == ServiceState::Stopped && s.pid.is_none()));
        assert_eq!(launcher.terminated.load(Ordering::SeqCst), before + 2);

        // Stopped services are not revived by checks.
        supervisor.check_at(t0 + TimeDelta::seconds(500)).await;
        assert_eq!(state(&supervisor, "sync"), ServiceState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_services_on_cancel() {
        let (supervisor, _registry, _launcher) = setup(&["ocr"]);
        let supervisor = Arc::new(supervisor);
        supervisor.start_all().await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let supervisor = Arc::clone(&supervisor);
            let cancel = cancel.clone();
            async move { supervisor.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(state(&supervisor, "ocr"), ServiceState::Stopped);
    }
}
