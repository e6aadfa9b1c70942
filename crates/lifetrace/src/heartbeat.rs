// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heartbeat sender setup shared by the long-running subcommands.

use std::net::SocketAddr;
use std::path::Path;

use lifetrace_config::model::HeartbeatConfig;
use lifetrace_core::LifetraceError;
use lifetrace_heartbeat::{HeartbeatLog, HeartbeatSender};
use tracing::{info, warn};

/// Heartbeat listener address from config.
pub fn endpoint(config: &HeartbeatConfig) -> Result<SocketAddr, LifetraceError> {
    let endpoint = config.endpoint();
    endpoint
        .parse()
        .map_err(|e| LifetraceError::Config(format!("invalid heartbeat endpoint {endpoint}: {e}")))
}

/// Bind and start a sender for `service`, or `None` when heartbeats are
/// disabled. A sender that cannot be created is logged and skipped; the
/// owning process keeps running without it.
pub async fn start_sender(config: &HeartbeatConfig, service: &str) -> Option<HeartbeatSender> {
    if !config.enabled {
        info!(service, "heartbeat disabled");
        return None;
    }
    let destination = match endpoint(config) {
        Ok(addr) => addr,
        Err(e) => {
            warn!(service, error = %e, "heartbeat sender not started");
            return None;
        }
    };
    let mut sender = match HeartbeatSender::bind(service, destination).await {
        Ok(sender) => sender,
        Err(e) => {
            warn!(service, error = %e, "heartbeat sender not started");
            return None;
        }
    };
    if let Some(dir) = &config.log_dir {
        match HeartbeatLog::open(Path::new(dir), service, config.log_rotation.clone()) {
            Ok(log) => sender = sender.with_log(log),
            Err(e) => warn!(service, error = %e, "heartbeat log unavailable"),
        }
    }
    sender.start(config.interval());
    Some(sender)
}
