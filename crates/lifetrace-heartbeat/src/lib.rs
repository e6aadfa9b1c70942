// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Liveness heartbeats for LifeTrace services.
//!
//! Every long-running process embeds a [`HeartbeatSender`] that announces
//! itself over loopback UDP. The supervisor runs a [`HeartbeatReceiver`]
//! feeding a shared [`HeartbeatRegistry`], which classifies each service as
//! alive, timed out, or unknown. Delivery is best effort: loss and
//! reordering are tolerated by keeping only the newest timestamp per service.
//! [`HeartbeatLog`] is the durable per-service fallback.

pub mod log;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod wire;

pub use log::{HeartbeatLog, LogInfo};
pub use receiver::HeartbeatReceiver;
pub use registry::{HeartbeatEvent, HeartbeatRecord, HeartbeatRegistry};
pub use sender::HeartbeatSender;
pub use wire::{Heartbeat, HeartbeatPayload, MAX_DATAGRAM_LEN};
