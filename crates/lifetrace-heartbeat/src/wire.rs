// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heartbeat datagram format.
//!
//! One JSON object per datagram:
//! `{"service": .., "pid": .., "timestamp": <epoch secs>, "status": .., "data": {..}}`.

use chrono::{DateTime, TimeZone, Utc};
use lifetrace_core::LifetraceError;
use serde::{Deserialize, Serialize};

/// Largest datagram a sender will emit or a receiver will read.
pub const MAX_DATAGRAM_LEN: usize = 2048;

/// Optional status fields a service may attach to its heartbeat.
///
/// Keys outside this set are ignored on decode; `extra` carries anything a
/// newer sender wants to pass through opaquely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_tasks: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

impl HeartbeatPayload {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single liveness announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub service: String,
    pub pid: u32,
    /// Sender wall clock, seconds since the Unix epoch.
    pub timestamp: f64,
    pub status: String,
    #[serde(default)]
    pub data: HeartbeatPayload,
}

impl Heartbeat {
    /// Build a heartbeat for the current process stamped with the current time.
    pub fn now(service: &str, status: &str, data: HeartbeatPayload) -> Self {
        Self {
            service: service.to_string(),
            pid: std::process::id(),
            timestamp: to_epoch_secs(Utc::now()),
            status: status.to_string(),
            data,
        }
    }

    /// Sender timestamp as a UTC datetime, `None` if out of range.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        from_epoch_secs(self.timestamp)
    }

    pub fn encode(&self) -> Result<Vec<u8>, LifetraceError> {
        let bytes = serde_json::to_vec(self).map_err(|e| LifetraceError::Transport {
            message: format!("failed to encode heartbeat for {}", self.service),
            source: Some(Box::new(e)),
        })?;
        if bytes.len() > MAX_DATAGRAM_LEN {
            return Err(LifetraceError::Transport {
                message: format!(
                    "heartbeat for {} is {} bytes, limit is {MAX_DATAGRAM_LEN}",
                    self.service,
                    bytes.len()
                ),
                source: None,
            });
        }
        Ok(bytes)
    }

    /// Parse and sanity-check a received datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, LifetraceError> {
        let heartbeat: Heartbeat =
            serde_json::from_slice(bytes).map_err(|e| LifetraceError::Transport {
                message: "malformed heartbeat datagram".to_string(),
                source: Some(Box::new(e)),
            })?;
        if heartbeat.service.trim().is_empty() {
            return Err(LifetraceError::Transport {
                message: "heartbeat without a service name".to_string(),
                source: None,
            });
        }
        if heartbeat.sent_at().is_none() {
            return Err(LifetraceError::Transport {
                message: format!(
                    "heartbeat from {} has invalid timestamp {}",
                    heartbeat.service, heartbeat.timestamp
                ),
                source: None,
            });
        }
        Ok(heartbeat)
    }
}

pub fn to_epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

pub fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros > i64::MAX as f64 {
        return None;
    }
    Utc.timestamp_micros(micros as i64).single()
}
