// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Service supervision for LifeTrace background processes.
//!
//! [`ServiceSupervisor`] launches the configured services, watches them
//! through the heartbeat registry and their process handles, and restarts
//! failed ones within a bounded [`RestartPolicy`].

pub mod launcher;
pub mod policy;
pub mod supervisor;

pub use launcher::{CommandLauncher, ExitSummary, ServiceDescriptor, ServiceHandle, ServiceLauncher};
pub use policy::{RestartPolicy, RestartState};
pub use supervisor::{ServiceStatus, ServiceSupervisor, SupervisorOptions, SupervisorStatus};
