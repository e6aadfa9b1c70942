// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for LifeTrace integration tests.
//!
//! # Components
//!
//! - [`TestHarness`] - temp directory with an artifact folder and a migrated database
//! - [`MockProcessor`] - task processor with scripted outcomes and call capture

pub mod harness;
pub mod mock_processor;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_processor::MockProcessor;
