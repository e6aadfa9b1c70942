// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query functions over the shared [`Database`](crate::Database).

pub mod artifacts;
pub mod derived;
pub mod tasks;
