// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-size pool of queue consumers.
//!
//! Each worker loops: claim a batch, run the processor on every claimed
//! task, record the outcome, and sleep for `idle_poll` when the batch came
//! back empty. The database connection serializes claims, so two workers
//! never hold the same task. A claim is refreshed right before its task
//! starts; a claim that was reset in the meantime is skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lifetrace_config::model::WorkerConfig;
use lifetrace_core::{LifetraceError, TaskProcessor, TaskRecord};
use lifetrace_heartbeat::HeartbeatPayload;
use lifetrace_storage::queries::artifacts;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::queue::TaskQueue;

/// Error recorded on a task whose artifact record has vanished.
pub const ARTIFACT_NOT_FOUND: &str = "artifact not found";

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub task_kind: String,
    pub workers: usize,
    pub batch_size: usize,
    pub idle_poll: Duration,
    /// Claims not refreshed for this long are returned to `pending` at startup.
    pub claim_timeout: Duration,
}

impl PoolOptions {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            task_kind: config.task_kind.clone(),
            workers: config.workers,
            batch_size: config.batch_size,
            idle_poll: config.idle_poll(),
            claim_timeout: config.claim_timeout(),
        }
    }
}

/// Snapshot of pool counters since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Claims dropped because they were reset before the task started.
    pub lost: u64,
    /// Claims handed back to `pending` on shutdown.
    pub released: u64,
}

#[derive(Default)]
struct Counters {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    lost: AtomicU64,
    released: AtomicU64,
}

pub struct WorkerPool {
    queue: TaskQueue,
    processor: Arc<dyn TaskProcessor>,
    options: PoolOptions,
    counters: Counters,
}

impl WorkerPool {
    pub fn new(queue: TaskQueue, processor: Arc<dyn TaskProcessor>, options: PoolOptions) -> Self {
        Self {
            queue,
            processor,
            options,
            counters: Counters::default(),
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.options.workers,
            claimed: self.counters.claimed.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            lost: self.counters.lost.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
        }
    }

    /// Status payload for the host process heartbeat.
    pub async fn heartbeat_payload(&self) -> HeartbeatPayload {
        let stats = self.stats();
        let mut payload = HeartbeatPayload {
            processed_count: Some(stats.completed),
            failed_count: Some(stats.failed),
            worker_count: Some(stats.workers as u64),
            ..HeartbeatPayload::default()
        };
        match self.queue.counts(Some(&self.options.task_kind)).await {
            Ok(counts) => {
                payload.pending_tasks = Some(counts.pending.max(0) as u64);
                payload.queue_size = Some((counts.pending + counts.processing).max(0) as u64);
            }
            Err(e) => payload.error = Some(e.to_string()),
        }
        payload
    }

    /// Run every worker until `cancel` fires.
    ///
    /// On cancellation the task in flight is abandoned and every claim the
    /// worker still holds goes back to `pending`.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        match self.queue.reset_stale_claims(self.options.claim_timeout).await {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "returned stale claims to pending"),
            Err(e) => warn!(error = %e, "stale claim recovery failed"),
        }
        info!(
            workers = self.options.workers,
            task_kind = %self.options.task_kind,
            processor = self.processor.name(),
            "worker pool started"
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..self.options.workers {
            let pool = Arc::clone(&self);
            let cancel = cancel.clone();
            workers.spawn(async move { pool.worker_loop(worker_id, cancel).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task panicked");
            }
        }
        info!(stats = ?self.stats(), "worker pool stopped");
    }

    async fn worker_loop(&self, worker_id: usize, cancel: CancellationToken) {
        debug!(worker_id, "worker started");
        while !cancel.is_cancelled() {
            let idle = match self.process_batch(&cancel).await {
                Ok(0) => true,
                Ok(_) => false,
                Err(e) => {
                    warn!(worker_id, error = %e, "claim failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.options.idle_poll) => {}
                }
            }
        }
        debug!(worker_id, "worker stopped");
    }

    /// Claim one batch and process it. Returns the number of tasks claimed.
    ///
    /// Stops early once `cancel` fires, releasing the unprocessed claims.
    pub async fn process_batch(&self, cancel: &CancellationToken) -> Result<usize, LifetraceError> {
        let batch = self
            .queue
            .claim_batch(&self.options.task_kind, self.options.batch_size)
            .await?;
        let claimed = batch.len();
        self.counters.claimed.fetch_add(claimed as u64, Ordering::Relaxed);

        let mut batch = batch.into_iter();
        while let Some(task) = batch.next() {
            if cancel.is_cancelled() {
                self.release(std::iter::once(task).chain(batch)).await;
                break;
            }
            if let Err(e) = self.queue.touch_claim(&task).await {
                warn!(task_id = task.id, error = %e, "claim lost before processing, skipping task");
                self.counters.lost.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task_id = task.id, "processing interrupted by shutdown");
                    self.release(std::iter::once(task).chain(batch)).await;
                    break;
                }
                _ = self.process_task(&task) => {}
            }
        }
        Ok(claimed)
    }

    async fn release(&self, tasks: impl Iterator<Item = TaskRecord>) {
        for task in tasks {
            match self.queue.release_claim(&task).await {
                Ok(()) => {
                    self.counters.released.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => debug!(task_id = task.id, error = %e, "claim not released"),
            }
        }
    }

    async fn process_task(&self, task: &TaskRecord) {
        let outcome = match artifacts::get_artifact(self.queue.database(), task.artifact_id).await {
            Ok(Some(artifact)) => self
                .processor
                .process(task, &artifact)
                .await
                .map_err(|e| e.task_message()),
            Ok(None) => Err(ARTIFACT_NOT_FOUND.to_string()),
            Err(e) => Err(e.task_message()),
        };

        match outcome {
            Ok(()) => self.record_success(task).await,
            Err(message) => self.record_failure(task, &message).await,
        }
    }

    async fn record_success(&self, task: &TaskRecord) {
        if let Err(e) = self.queue.complete(task).await {
            warn!(task_id = task.id, error = %e, "could not complete task");
            return;
        }
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        match artifacts::mark_processed(self.queue.database(), task.artifact_id).await {
            Ok(_) => debug!(task_id = task.id, artifact_id = task.artifact_id, "task completed"),
            Err(e) => warn!(artifact_id = task.artifact_id, error = %e, "could not mark artifact processed"),
        }
    }

    async fn record_failure(&self, task: &TaskRecord, message: &str) {
        warn!(task_id = task.id, artifact_id = task.artifact_id, error = message, "task failed");
        match self.queue.fail(task, message).await {
            Ok(()) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(task_id = task.id, error = %e, "could not record task failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use lifetrace_core::TaskStatus;
    use lifetrace_test_utils::{MockProcessor, TestHarness};

    use super::*;

    fn options(workers: usize, batch_size: usize) -> PoolOptions {
        PoolOptions {
            task_kind: "ocr".into(),
            workers,
            batch_size,
            idle_poll: Duration::from_millis(20),
            claim_timeout: Duration::from_secs(600),
        }
    }

    #[tokio::test]
    async fn batch_records_success_and_failure() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        let ok = harness.capture("ok.png").await;
        let bad = harness.capture("bad.png").await;
        let ok_task = queue.enqueue(ok, "ocr").await.unwrap().task_id();
        let bad_task = queue.enqueue(bad, "ocr").await.unwrap().task_id();

        let processor = Arc::new(MockProcessor::with_outcomes(vec![
            Ok(()),
            Err("engine unavailable".into()),
        ]));
        let pool = WorkerPool::new(queue.clone(), processor.clone(), options(1, 10));
        assert_eq!(pool.process_batch(&CancellationToken::new()).await.unwrap(), 2);

        let done = queue.get(ok_task).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let artifact = artifacts::get_artifact(&harness.db, ok).await.unwrap().unwrap();
        assert!(artifact.is_processed);

        let failed = queue.get(bad_task).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.error_message.as_deref(), Some("engine unavailable"));

        assert_eq!(processor.calls().await.len(), 2);
        let stats = pool.stats();
        assert_eq!((stats.claimed, stats.completed, stats.failed), (2, 1, 1));
        assert_eq!(pool.process_batch(&CancellationToken::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_artifact_fails_task() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        let id = harness.index("ghost.png").await;
        let task = queue.enqueue(id, "ocr").await.unwrap().task_id();
        // Remove only the artifact row so the task is left dangling.
        harness
            .db
            .connection()
            .call(move |conn| conn.execute("DELETE FROM artifacts WHERE id = ?1", [id]))
            .await
            .unwrap();

        let processor = Arc::new(MockProcessor::new());
        let pool = WorkerPool::new(queue.clone(), processor.clone(), options(1, 10));
        pool.process_batch(&CancellationToken::new()).await.unwrap();

        let task = queue.get(task).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some(ARTIFACT_NOT_FOUND));
        assert!(processor.calls().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_drains_queue_without_double_processing() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        for i in 0..20 {
            let id = harness.capture(&format!("{i}.png")).await;
            queue.enqueue(id, "ocr").await.unwrap();
        }

        let processor = Arc::new(MockProcessor::new().with_delay(Duration::from_millis(5)));
        let pool = Arc::new(WorkerPool::new(queue.clone(), processor.clone(), options(4, 3)));
        let cancel = CancellationToken::new();
        let runner = tokio::spawn(Arc::clone(&pool).run(cancel.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while queue.counts(Some("ocr")).await.unwrap().completed < 20 {
            assert!(tokio::time::Instant::now() < deadline, "queue never drained");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        runner.await.unwrap();

        let calls = processor.calls().await;
        let unique: HashSet<i64> = calls.iter().map(|(id, _)| *id).collect();
        assert_eq!(calls.len(), 20);
        assert_eq!(unique.len(), 20);
        assert_eq!(pool.stats().completed, 20);
    }

    #[tokio::test]
    async fn heartbeat_payload_reports_queue_depth() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        for i in 0..3 {
            let id = harness.capture(&format!("{i}.png")).await;
            queue.enqueue(id, "ocr").await.unwrap();
        }
        let pool = WorkerPool::new(queue, Arc::new(MockProcessor::new()), options(2, 1));
        pool.process_batch(&CancellationToken::new()).await.unwrap();

        let payload = pool.heartbeat_payload().await;
        assert_eq!(payload.pending_tasks, Some(2));
        assert_eq!(payload.queue_size, Some(2));
        assert_eq!(payload.processed_count, Some(1));
        assert_eq!(payload.failed_count, Some(0));
        assert_eq!(payload.worker_count, Some(2));
        assert!(payload.error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reset_tail_of_long_batch_is_processed_once() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        for i in 0..4 {
            let id = harness.capture(&format!("{i}.png")).await;
            queue.enqueue(id, "ocr").await.unwrap();
        }

        // One worker takes the whole batch; the tail waits longer than the
        // claim timeout while the sweep keeps resetting stale claims.
        let processor = Arc::new(MockProcessor::new().with_delay(Duration::from_millis(400)));
        let mut opts = options(2, 4);
        opts.claim_timeout = Duration::from_secs(1);
        let pool = Arc::new(WorkerPool::new(queue.clone(), processor.clone(), opts));
        let cancel = CancellationToken::new();
        let runner = tokio::spawn(Arc::clone(&pool).run(cancel.clone()));
        let sweep = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                while !cancel.is_cancelled() {
                    queue.reset_stale_claims(Duration::from_secs(1)).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        while queue.counts(Some("ocr")).await.unwrap().completed < 4 {
            assert!(tokio::time::Instant::now() < deadline, "queue never drained");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        cancel.cancel();
        runner.await.unwrap();
        sweep.await.unwrap();

        let calls = processor.calls().await;
        let unique: HashSet<i64> = calls.iter().map(|(id, _)| *id).collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(calls.len(), 4, "a task was processed by more than one worker: {calls:?}");
        let stats = pool.stats();
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn cancellation_releases_unfinished_claims() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        for i in 0..3 {
            let id = harness.capture(&format!("{i}.png")).await;
            queue.enqueue(id, "ocr").await.unwrap();
        }

        let processor = Arc::new(MockProcessor::new().with_delay(Duration::from_secs(30)));
        let pool = Arc::new(WorkerPool::new(queue.clone(), processor.clone(), options(1, 3)));
        let cancel = CancellationToken::new();
        let batch = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.process_batch(&cancel).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while processor.calls().await.is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "processing never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        assert_eq!(batch.await.unwrap().unwrap(), 3);

        let counts = queue.counts(Some("ocr")).await.unwrap();
        assert_eq!((counts.pending, counts.processing), (3, 0));
        let stats = pool.stats();
        assert_eq!(stats.released, 3);
        assert_eq!(stats.completed, 0);
        assert_eq!(processor.calls().await.len(), 1);
        for task in queue.list(TaskStatus::Pending, 10).await.unwrap() {
            assert_eq!(task.retry_count, 0);
        }
    }

    #[tokio::test]
    async fn claim_reset_before_start_is_skipped() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        let id = harness.capture("1.png").await;
        let task_id = queue.enqueue(id, "ocr").await.unwrap().task_id();

        let stale = queue.claim_batch("ocr", 1).await.unwrap().remove(0);
        queue.reset_stale_claims(Duration::ZERO).await.unwrap();
        let current = queue.claim_batch("ocr", 1).await.unwrap().remove(0);

        assert!(queue.touch_claim(&stale).await.is_err());
        assert!(matches!(
            queue.complete(&stale).await,
            Err(LifetraceError::ClaimLost { .. })
        ));
        queue.complete(&current).await.unwrap();
        assert_eq!(queue.get(task_id).await.unwrap().unwrap().status, TaskStatus::Completed);
    }
}
