// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processing collaborator invoked by the worker pool.

use async_trait::async_trait;

use crate::error::LifetraceError;
use crate::types::{ArtifactRecord, TaskRecord};

/// An external engine (OCR, embedding, ...) that turns one claimed task into
/// derived output.
///
/// Implementations must be idempotent: a task may be handed out again after
/// a crash recovered its claim. The worker pool records the outcome; the
/// processor must not touch task status itself.
#[async_trait]
pub trait TaskProcessor: Send + Sync + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Process one task against its artifact.
    ///
    /// Return [`LifetraceError::Processor`] to have the message recorded on
    /// the task verbatim.
    async fn process(
        &self,
        task: &TaskRecord,
        artifact: &ArtifactRecord,
    ) -> Result<(), LifetraceError>;
}
