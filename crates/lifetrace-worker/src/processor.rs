// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processor that shells out to an external command per task.

use std::time::Duration;

use async_trait::async_trait;
use lifetrace_config::model::WorkerConfig;
use lifetrace_core::{ArtifactRecord, LifetraceError, TaskProcessor, TaskRecord};
use tracing::debug;

/// Runs `command [args..] <artifact_path>` for every task.
///
/// Exit status 0 is success. Otherwise trimmed stderr (or the exit status
/// when stderr is empty) becomes the task's error message.
pub struct CommandProcessor {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandProcessor {
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            timeout,
        }
    }

    /// `None` when no processor command is configured.
    pub fn from_config(config: &WorkerConfig) -> Option<Self> {
        config
            .processor_command
            .as_ref()
            .map(|command| Self::new(command, config.processor_args.clone(), config.processor_timeout()))
    }
}

#[async_trait]
impl TaskProcessor for CommandProcessor {
    fn name(&self) -> &str {
        &self.command
    }

    async fn process(&self, task: &TaskRecord, artifact: &ArtifactRecord) -> Result<(), LifetraceError> {
        debug!(task_id = task.id, command = %self.command, path = %artifact.file_path, "running processor");
        let run = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .arg(&artifact.file_path)
            .env("LIFETRACE_TASK_ID", task.id.to_string())
            .env("LIFETRACE_TASK_KIND", &task.task_kind)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| LifetraceError::Timeout { duration: self.timeout })?
            .map_err(|e| LifetraceError::Processor {
                message: format!("failed to run {}: {e}", self.command),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => match output.status.code() {
                Some(code) => format!("exit code {code}"),
                None => "terminated by signal".to_string(),
            },
            text => text.to_string(),
        };
        Err(LifetraceError::Processor { message })
    }
}
