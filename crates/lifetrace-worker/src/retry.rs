// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic sweep over the task table.
//!
//! Every tick returns long-held claims to `pending`. When retries are
//! enabled, failed tasks below the retry limit are re-enqueued too.

use std::time::Duration;

use lifetrace_config::model::WorkerConfig;
use lifetrace_core::LifetraceError;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::TaskQueue;

/// Shortest period between sweeps.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySweep {
    pub stale_reset: usize,
    pub requeued: usize,
}

pub struct RetrySweeper {
    queue: TaskQueue,
    task_kind: String,
    /// `None` disables re-enqueueing failed tasks.
    max_retries: Option<u32>,
    claim_timeout: Duration,
    interval: Duration,
}

impl RetrySweeper {
    pub fn new(
        queue: TaskQueue,
        task_kind: impl Into<String>,
        max_retries: Option<u32>,
        claim_timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            task_kind: task_kind.into(),
            max_retries,
            claim_timeout,
            interval,
        }
    }

    pub fn from_config(queue: TaskQueue, config: &WorkerConfig) -> Self {
        Self::new(
            queue,
            &config.task_kind,
            config.retry.enabled.then_some(config.retry.max_retries),
            config.claim_timeout(),
            config.retry.interval(),
        )
    }

    pub async fn sweep_once(&self) -> Result<RetrySweep, LifetraceError> {
        let stale_reset = self.queue.reset_stale_claims(self.claim_timeout).await?;
        let requeued = match self.max_retries {
            Some(max) => self.queue.requeue_failed(&self.task_kind, max).await?,
            None => 0,
        };
        if stale_reset > 0 || requeued > 0 {
            info!(task_kind = %self.task_kind, stale_reset, requeued, "retry sweep");
        }
        Ok(RetrySweep { stale_reset, requeued })
    }

    /// Sweep every `interval` until cancelled. The first tick waits a full
    /// interval since the pool recovers stale claims at startup. A zero
    /// interval is raised to [`MIN_INTERVAL`].
    pub async fn run(&self, cancel: CancellationToken) {
        let period = if self.interval < MIN_INTERVAL {
            warn!(interval = ?self.interval, floor = ?MIN_INTERVAL, "retry sweep interval too short, using floor");
            MIN_INTERVAL
        } else {
            self.interval
        };
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "retry sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lifetrace_core::TaskStatus;
    use lifetrace_test_utils::TestHarness;

    use super::*;

    async fn failed_task(harness: &TestHarness, queue: &TaskQueue, name: &str) -> i64 {
        let artifact = harness.capture(name).await;
        let id = queue.enqueue(artifact, "ocr").await.unwrap().task_id();
        let claimed = queue.claim_batch("ocr", 1).await.unwrap();
        queue.fail(&claimed[0], "boom").await.unwrap();
        id
    }

    #[tokio::test]
    async fn disabled_retry_leaves_failures_alone() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        let id = failed_task(&harness, &queue, "1.png").await;

        let sweeper = RetrySweeper::from_config(queue.clone(), &WorkerConfig::default());
        let sweep = sweeper.sweep_once().await.unwrap();
        assert_eq!(sweep, RetrySweep::default());
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn enabled_retry_requeues_until_limit() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        let id = failed_task(&harness, &queue, "1.png").await;
        let sweeper = RetrySweeper::new(
            queue.clone(),
            "ocr",
            Some(2),
            Duration::from_secs(600),
            Duration::from_secs(60),
        );

        assert_eq!(sweeper.sweep_once().await.unwrap().requeued, 1);
        let task = queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);

        let claimed = queue.claim_batch("ocr", 1).await.unwrap();
        queue.fail(&claimed[0], "boom again").await.unwrap();
        assert_eq!(sweeper.sweep_once().await.unwrap().requeued, 0);
        let task = queue.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 2);
    }

    #[tokio::test]
    async fn stale_claims_return_to_pending() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        let artifact = harness.capture("1.png").await;
        let id = queue.enqueue(artifact, "ocr").await.unwrap().task_id();
        queue.claim_batch("ocr", 1).await.unwrap();

        let sweeper = RetrySweeper::new(queue.clone(), "ocr", None, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(sweeper.sweep_once().await.unwrap().stale_reset, 1);
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let harness = TestHarness::new().await.unwrap();
        let sweeper = RetrySweeper::new(
            TaskQueue::new(harness.db.clone()),
            "ocr",
            None,
            Duration::from_secs(600),
            Duration::from_secs(60),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        sweeper.run(cancel).await;
    }

    #[tokio::test]
    async fn zero_interval_sweeps_at_floor() {
        let harness = TestHarness::new().await.unwrap();
        let queue = TaskQueue::new(harness.db.clone());
        let sweeper = Arc::new(RetrySweeper::new(
            queue,
            "ocr",
            None,
            Duration::from_secs(600),
            Duration::ZERO,
        ));
        let cancel = CancellationToken::new();
        let task = {
            let sweeper = Arc::clone(&sweeper);
            let cancel = cancel.clone();
            tokio::spawn(async move { sweeper.run(cancel).await })
        };

        tokio::time::sleep(MIN_INTERVAL + Duration::from_millis(500)).await;
        assert!(!task.is_finished());
        cancel.cancel();
        task.await.expect("sweeper must not panic on a zero interval");
    }
}
