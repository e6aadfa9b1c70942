// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the LifeTrace pipeline.

use thiserror::Error;

use crate::types::TaskStatus;

/// The primary error type used across all LifeTrace crates.
#[derive(Debug, Error)]
pub enum LifetraceError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, migration).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Heartbeat transport errors (socket bind, send, malformed datagram).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A supervised process could not be started, signalled, or reaped.
    #[error("process error for {service}: {message}")]
    Process { service: String, message: String },

    /// A reconciliation pass could not enumerate the file set or the index.
    #[error("reconciliation error: {0}")]
    Reconcile(String),

    /// A task was not in the state an operation requires.
    #[error("task {task_id} is {}, expected {expected}", status_label(.actual))]
    TaskState {
        task_id: i64,
        expected: TaskStatus,
        actual: Option<TaskStatus>,
    },

    /// A task in `processing` belongs to a newer claim than the caller's.
    #[error("task {task_id} was reclaimed, claim {claim_token} is no longer current")]
    ClaimLost { task_id: i64, claim_token: i64 },

    /// The external processing collaborator reported a failure.
    #[error("processor error: {message}")]
    Processor { message: String },

    /// A requested record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

fn status_label(status: &Option<TaskStatus>) -> String {
    status.map_or_else(|| "missing".to_string(), |s| s.to_string())
}

impl LifetraceError {
    /// The message recorded on a failed task.
    ///
    /// Collaborator failures keep their own wording; anything else uses the
    /// full display string.
    pub fn task_message(&self) -> String {
        match self {
            LifetraceError::Processor { message } => message.clone(),
            other => other.to_string(),
        }
    }
}
