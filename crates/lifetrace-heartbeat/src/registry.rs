// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory liveness registry fed by received heartbeats.
//!
//! The registry is an explicit object shared behind an `Arc`; nothing in
//! this crate keeps process-wide state. Records are never persisted, so a
//! fresh registry reports every service as unknown until it hears from it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifetrace_core::LivenessStatus;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::wire::{Heartbeat, HeartbeatPayload};

const EVENT_CAPACITY: usize = 64;

/// Latest known liveness of one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatRecord {
    pub service_name: String,
    pub pid: u32,
    pub last_seen: DateTime<Utc>,
    pub status: LivenessStatus,
    /// Silence observed by the last sweep, set only while timed out.
    pub timeout_duration: Option<Duration>,
    /// Status string reported by the service itself.
    pub reported_status: String,
    pub payload: HeartbeatPayload,
}

/// Liveness transitions, delivered once per episode.
#[derive(Debug, Clone, PartialEq)]
pub enum HeartbeatEvent {
    TimedOut { service: String, silent_for: Duration },
    Recovered { service: String },
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, HeartbeatRecord>,
    /// Services expected to report, with an optional per-service timeout.
    expected: BTreeMap<String, Option<Duration>>,
}

/// Thread-safe map of service name to [`HeartbeatRecord`].
pub struct HeartbeatRegistry {
    inner: Mutex<Inner>,
    malformed: AtomicU64,
    events: broadcast::Sender<HeartbeatEvent>,
}

impl Default for HeartbeatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            malformed: AtomicU64::new(0),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a service that should report, so silence from it is noticed
    /// even before its first heartbeat.
    pub fn expect(&self, service: &str, timeout: Option<Duration>) {
        self.lock().expected.insert(service.to_string(), timeout);
    }

    /// Timeout applied to `service`: its override if registered, else `default`.
    pub fn timeout_for(&self, service: &str, default: Duration) -> Duration {
        self.lock()
            .expected
            .get(service)
            .copied()
            .flatten()
            .unwrap_or(default)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatEvent> {
        self.events.subscribe()
    }

    /// Upsert the record for `heartbeat.service`.
    ///
    /// Returns `false` when the heartbeat is not newer than what is already
    /// recorded, so reordered datagrams never move `last_seen` backwards.
    pub fn record(&self, heartbeat: &Heartbeat) -> bool {
        let Some(sent_at) = heartbeat.sent_at() else {
            self.note_malformed();
            return false;
        };

        let recovered = {
            let mut inner = self.lock();
            match inner.records.get_mut(&heartbeat.service) {
                Some(existing) if existing.last_seen >= sent_at => return false,
                Some(existing) => {
                    let was_timed_out = existing.status == LivenessStatus::Timeout;
                    existing.pid = heartbeat.pid;
                    existing.last_seen = sent_at;
                    existing.status = LivenessStatus::Alive;
                    existing.timeout_duration = None;
                    existing.reported_status.clone_from(&heartbeat.status);
                    existing.payload = heartbeat.data.clone();
                    was_timed_out
                }
                None => {
                    inner.records.insert(
                        heartbeat.service.clone(),
                        HeartbeatRecord {
                            service_name: heartbeat.service.clone(),
                            pid: heartbeat.pid,
                            last_seen: sent_at,
                            status: LivenessStatus::Alive,
                            timeout_duration: None,
                            reported_status: heartbeat.status.clone(),
                            payload: heartbeat.data.clone(),
                        },
                    );
                    false
                }
            }
        };

        if recovered {
            info!(service = %heartbeat.service, pid = heartbeat.pid, "service heartbeat recovered");
            let _ = self.events.send(HeartbeatEvent::Recovered {
                service: heartbeat.service.clone(),
            });
        }
        true
    }

    pub fn is_alive(&self, service: &str, timeout: Duration) -> bool {
        self.is_alive_at(service, timeout, Utc::now())
    }

    /// True iff `service` has a heartbeat no older than `timeout` at `now`.
    pub fn is_alive_at(&self, service: &str, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.lock()
            .records
            .get(service)
            .is_some_and(|record| silence(record.last_seen, now) <= timeout)
    }

    pub fn get_dead_services(&self, timeout: Duration) -> Vec<String> {
        self.get_dead_services_at(timeout, Utc::now())
    }

    /// Services silent for longer than `timeout`, plus expected services
    /// that never reported. Sorted by name.
    pub fn get_dead_services_at(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<String> {
        let inner = self.lock();
        let mut dead: Vec<String> = inner
            .records
            .values()
            .filter(|record| silence(record.last_seen, now) > timeout)
            .map(|record| record.service_name.clone())
            .collect();
        dead.extend(
            inner
                .expected
                .keys()
                .filter(|name| !inner.records.contains_key(*name))
                .cloned(),
        );
        dead.sort();
        dead
    }

    /// Classification as of the last record or sweep.
    pub fn status_of(&self, service: &str) -> LivenessStatus {
        self.lock()
            .records
            .get(service)
            .map_or(LivenessStatus::Unknown, |record| record.status)
    }

    pub fn last_seen(&self, service: &str) -> Option<DateTime<Utc>> {
        self.lock().records.get(service).map(|record| record.last_seen)
    }

    pub fn get(&self, service: &str) -> Option<HeartbeatRecord> {
        self.lock().records.get(service).cloned()
    }

    /// All records, sorted by service name.
    pub fn snapshot(&self) -> Vec<HeartbeatRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        records
    }

    pub fn sweep(&self, default_timeout: Duration) -> Vec<HeartbeatEvent> {
        self.sweep_at(default_timeout, Utc::now())
    }

    /// Mark services silent past their timeout as timed out.
    ///
    /// Emits `TimedOut` only on the alive-to-timeout transition; later sweeps
    /// of the same silence just refresh `timeout_duration`.
    pub fn sweep_at(&self, default_timeout: Duration, now: DateTime<Utc>) -> Vec<HeartbeatEvent> {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            let Inner { records, expected } = &mut *inner;
            for record in records.values_mut() {
                let timeout = expected
                    .get(&record.service_name)
                    .copied()
                    .flatten()
                    .unwrap_or(default_timeout);
                let silent_for = silence(record.last_seen, now);
                if silent_for <= timeout {
                    continue;
                }
                record.timeout_duration = Some(silent_for);
                if record.status != LivenessStatus::Timeout {
                    record.status = LivenessStatus::Timeout;
                    events.push(HeartbeatEvent::TimedOut {
                        service: record.service_name.clone(),
                        silent_for,
                    });
                }
            }
        }

        for event in &events {
            if let HeartbeatEvent::TimedOut { service, silent_for } = event {
                warn!(service = %service, silent_secs = silent_for.as_secs(), "service heartbeat timed out");
            }
            let _ = self.events.send(event.clone());
        }
        events
    }

    /// Count a datagram that could not be decoded.
    pub fn note_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

fn silence(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - last_seen).to_std().unwrap_or(Duration::ZERO)
}
