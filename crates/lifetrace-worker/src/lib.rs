// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task queue consumers for the LifeTrace pipeline.
//!
//! [`TaskQueue`] wraps the durable task table. [`WorkerPool`] runs a fixed
//! number of workers that claim batches and hand each task to a
//! [`lifetrace_core::TaskProcessor`]. [`RetrySweeper`] recovers stale
//! claims and, when enabled, re-enqueues failed tasks. The queue itself
//! never retries.

pub mod pool;
pub mod processor;
pub mod queue;
pub mod retry;

pub use pool::{PoolOptions, PoolStats, WorkerPool};
pub use processor::CommandProcessor;
pub use queue::TaskQueue;
pub use retry::{RetrySweep, RetrySweeper};
