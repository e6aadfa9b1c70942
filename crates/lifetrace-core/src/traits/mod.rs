// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collaborator trait definitions.
//!
//! External engines plug into the pipeline through these traits and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod processor;

pub use processor::TaskProcessor;
