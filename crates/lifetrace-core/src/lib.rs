// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the LifeTrace background pipeline.
//!
//! Holds the workspace-wide error type, the record types shared by the
//! storage, worker, and sync crates, and the collaborator traits that
//! external engines implement.

pub mod error;
pub mod traits;
pub mod types;

pub use error::LifetraceError;
pub use traits::TaskProcessor;
pub use types::{
    ArtifactRecord, HealthStatus, LivenessStatus, NewArtifact, ServiceState, TaskRecord,
    TaskStatus,
};
