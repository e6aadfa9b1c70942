// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handle onto the durable task table.

use std::time::Duration;

use lifetrace_core::{LifetraceError, TaskRecord, TaskStatus};
use lifetrace_storage::queries::tasks;
use lifetrace_storage::{Database, Enqueued, TaskCounts};
use tracing::debug;

/// Cloneable queue handle. All state lives in the database.
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
}

impl TaskQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Idempotent: an existing pending or processing task for the pair is
    /// returned instead of a new one.
    pub async fn enqueue(&self, artifact_id: i64, task_kind: &str) -> Result<Enqueued, LifetraceError> {
        let outcome = tasks::enqueue(&self.db, artifact_id, task_kind).await?;
        debug!(artifact_id, task_kind, task_id = outcome.task_id(), new = outcome.is_new(), "enqueue");
        Ok(outcome)
    }

    /// Claim up to `limit` pending tasks. Concurrent callers never receive
    /// the same task.
    pub async fn claim_batch(&self, task_kind: &str, limit: usize) -> Result<Vec<TaskRecord>, LifetraceError> {
        tasks::claim_batch(&self.db, task_kind, limit).await
    }

    pub async fn complete(&self, task: &TaskRecord) -> Result<(), LifetraceError> {
        tasks::complete(&self.db, task.id, task.claim_token).await
    }

    /// Mark a claimed task failed and bump its retry count.
    pub async fn fail(&self, task: &TaskRecord, error_message: &str) -> Result<(), LifetraceError> {
        tasks::fail(&self.db, task.id, task.claim_token, error_message).await
    }

    /// Refresh a claim right before processing it. An error means the claim
    /// was reset and possibly handed to another worker.
    pub async fn touch_claim(&self, task: &TaskRecord) -> Result<(), LifetraceError> {
        tasks::touch_claim(&self.db, task.id, task.claim_token).await
    }

    /// Return an unstarted claim to `pending`.
    pub async fn release_claim(&self, task: &TaskRecord) -> Result<(), LifetraceError> {
        tasks::release_claim(&self.db, task.id, task.claim_token).await
    }

    pub async fn get(&self, task_id: i64) -> Result<Option<TaskRecord>, LifetraceError> {
        tasks::get_task(&self.db, task_id).await
    }

    pub async fn list(&self, status: TaskStatus, limit: usize) -> Result<Vec<TaskRecord>, LifetraceError> {
        tasks::list_tasks(&self.db, status, limit).await
    }

    pub async fn counts(&self, task_kind: Option<&str>) -> Result<TaskCounts, LifetraceError> {
        tasks::counts(&self.db, task_kind).await
    }

    pub async fn reset_stale_claims(&self, older_than: Duration) -> Result<usize, LifetraceError> {
        tasks::reset_stale_claims(&self.db, older_than).await
    }

    pub async fn requeue_failed(&self, task_kind: &str, max_retries: u32) -> Result<usize, LifetraceError> {
        tasks::requeue_failed(&self.db, task_kind, max_retries).await
    }
}
