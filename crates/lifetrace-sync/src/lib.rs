// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keeps the artifact index consistent with the artifact directory.
//!
//! [`ConsistencyReconciler`] diffs the directory against the index on a
//! timer and removes records whose file is gone. [`FileSystemWatcher`]
//! reacts to individual deletions between passes. Both use
//! [`cleanup::cleanup_artifact`], so a record is always removed together
//! with its tasks and derived rows.

pub mod cleanup;
pub mod reconciler;
pub mod watcher;

pub use reconciler::{ConsistencyReconciler, ReconcileReport, ReconcilerStats, ReconcilerStatus};
pub use watcher::{FileSystemWatcher, WatcherStats};
