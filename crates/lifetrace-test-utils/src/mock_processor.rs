// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock task processor for deterministic worker tests.
//!
//! Outcomes are popped from a FIFO queue; when it is empty every task
//! succeeds. Each call is captured for later assertions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lifetrace_core::{ArtifactRecord, LifetraceError, TaskProcessor, TaskRecord};
use tokio::sync::Mutex;

pub struct MockProcessor {
    outcomes: Arc<Mutex<VecDeque<Result<(), String>>>>,
    calls: Arc<Mutex<Vec<(i64, String)>>>,
    delay: Duration,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    /// Pre-load outcomes; `Err(message)` makes the matching call fail.
    pub fn with_outcomes(outcomes: Vec<Result<(), String>>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::from(outcomes))),
            ..Self::new()
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn push_outcome(&self, outcome: Result<(), String>) {
        self.outcomes.lock().await.push_back(outcome);
    }

    /// `(task_id, artifact path)` for every call, in call order.
    pub async fn calls(&self) -> Vec<(i64, String)> {
        self.calls.lock().await.clone()
    }
}

impl Default for MockProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskProcessor for MockProcessor {
    fn name(&self) -> &str {
        "mock-processor"
    }

    async fn process(&self, task: &TaskRecord, artifact: &ArtifactRecord) -> Result<(), LifetraceError> {
        self.calls
            .lock()
            .await
            .push((task.id, artifact.file_path.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.outcomes.lock().await.pop_front() {
            Some(Err(message)) => Err(LifetraceError::Processor { message }),
            Some(Ok(())) | None => Ok(()),
        }
    }
}
