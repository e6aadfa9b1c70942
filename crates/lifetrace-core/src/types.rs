// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Record and status types shared across the LifeTrace crates.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by storage and component health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Component is fully operational.
    Healthy,
    /// Component is operational but experiencing issues.
    Degraded(String),
    /// Component is not operational.
    Unhealthy(String),
}

/// Lifecycle of a queued task.
///
/// `pending -> processing -> {completed | failed}` once per attempt.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Liveness classification of a heartbeat-reporting service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LivenessStatus {
    /// A heartbeat arrived within the timeout window.
    Alive,
    /// The service has been silent for longer than the timeout.
    Timeout,
    /// No heartbeat has ever been received.
    Unknown,
}

/// Supervisor-side lifecycle state of a managed service.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Restarting,
    /// Restart budget exhausted; waiting for the reset window.
    PermanentlyStopped,
}

/// One indexed artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: i64,
    /// Unique path; the join key against the artifact directory.
    pub file_path: String,
    pub file_hash: String,
    pub file_size: i64,
    pub width: i64,
    pub height: i64,
    pub created_at: String,
    pub processed_at: Option<String>,
    pub is_processed: bool,
}

/// Fields supplied by a producer when indexing a new artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewArtifact {
    pub file_path: String,
    pub file_hash: String,
    pub file_size: i64,
    pub width: i64,
    pub height: i64,
}

/// One unit of asynchronous work against an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: i64,
    pub artifact_id: i64,
    pub task_kind: String,
    pub status: TaskStatus,
    pub retry_count: i64,
    pub error_message: Option<String>,
    /// Bumped by every claim. Identifies which claim a worker holds.
    pub claim_token: i64,
    pub created_at: String,
    pub updated_at: String,
}
