// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain model types for storage entities.
//!
//! Artifact and task records live in `lifetrace-core` so collaborators can
//! name them without depending on SQLite; the storage-only shapes are here.

pub use lifetrace_core::types::{ArtifactRecord, NewArtifact, TaskRecord, TaskStatus};
use serde::Serialize;

/// Result of an idempotent enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "task_id", rename_all = "snake_case")]
pub enum Enqueued {
    /// A new pending task was inserted.
    Created(i64),
    /// A pending or processing task already existed for the pair.
    Existing(i64),
}

impl Enqueued {
    pub fn task_id(self) -> i64 {
        match self {
            Enqueued::Created(id) | Enqueued::Existing(id) => id,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Enqueued::Created(_))
    }
}

/// Task totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl TaskCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactCounts {
    pub total: i64,
    pub processed: i64,
}

/// Rows removed when an artifact record is cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub artifact_id: i64,
    pub tasks: usize,
    pub ocr_results: usize,
    pub search_entries: usize,
}

/// Text extracted from an artifact by the OCR collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcrResult {
    pub id: i64,
    pub artifact_id: i64,
    pub text_content: Option<String>,
    pub confidence: Option<f64>,
    pub language: Option<String>,
    pub processing_time: Option<f64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewOcrResult {
    pub artifact_id: i64,
    pub text_content: Option<String>,
    pub confidence: Option<f64>,
    pub language: Option<String>,
    pub processing_time: Option<f64>,
}

/// Searchable text derived from an artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchEntry {
    pub id: i64,
    pub artifact_id: i64,
    pub content: String,
    /// JSON-encoded keyword list, if any.
    pub keywords: Option<String>,
    pub created_at: String,
}
