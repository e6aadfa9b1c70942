// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic heartbeat emitter embedded in every supervised process.
//!
//! Sending never fails from the caller's point of view: transport errors are
//! logged and counted, and the owning process carries on with its work.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lifetrace_core::LifetraceError;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::log::HeartbeatLog;
use crate::wire::{Heartbeat, HeartbeatPayload};

struct Shared {
    service: String,
    socket: UdpSocket,
    destination: SocketAddr,
    current: Mutex<(String, HeartbeatPayload)>,
    log: Option<Mutex<HeartbeatLog>>,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl Shared {
    async fn send(&self, status: &str, payload: HeartbeatPayload) -> bool {
        let heartbeat = Heartbeat::now(&self.service, status, payload);

        if let Some(log) = &self.log {
            let mut log = log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(e) = log.append(&heartbeat) {
                warn!(service = %self.service, error = %e, "heartbeat log write failed");
            }
        }

        let result = match heartbeat.encode() {
            Ok(bytes) => self
                .socket
                .send_to(&bytes, self.destination)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(error) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                debug!(service = %self.service, destination = %self.destination, error = %error, "heartbeat send failed");
                false
            }
        }
    }

    fn current(&self) -> (String, HeartbeatPayload) {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub struct HeartbeatSender {
    shared: Arc<Shared>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl HeartbeatSender {
    /// Bind an ephemeral local socket for sending to `destination`.
    pub async fn bind(service: &str, destination: SocketAddr) -> Result<Self, LifetraceError> {
        let local: IpAddr = match destination {
            SocketAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            SocketAddr::V6(_) => Ipv6Addr::UNSPECIFIED.into(),
        };
        let socket = UdpSocket::bind(SocketAddr::new(local, 0))
            .await
            .map_err(|e| LifetraceError::Transport {
                message: format!("cannot bind heartbeat socket for {service}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            shared: Arc::new(Shared {
                service: service.to_string(),
                socket,
                destination,
                current: Mutex::new(("running".to_string(), HeartbeatPayload::default())),
                log: None,
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
            running: Mutex::new(None),
        })
    }

    /// Mirror every heartbeat into a durable log. Must be called before `start`.
    pub fn with_log(mut self, log: HeartbeatLog) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.log = Some(Mutex::new(log));
        } else {
            warn!(service = %self.shared.service, "heartbeat log attached after start; ignored");
        }
        self
    }

    pub fn service(&self) -> &str {
        &self.shared.service
    }

    /// Status and payload carried by subsequent periodic heartbeats.
    pub fn set_status(&self, status: &str, payload: HeartbeatPayload) {
        *self
            .shared
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = (status.to_string(), payload);
    }

    /// Begin emitting every `interval`. A no-op while already running.
    pub fn start(&self, interval: Duration) {
        let mut running = self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if running.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let (status, payload) = shared.current();
                        shared.send(&status, payload).await;
                    }
                }
            }
            debug!(service = %shared.service, "heartbeat loop stopped");
        });
        *running = Some((cancel, handle));
    }

    /// Emit one heartbeat now. Returns whether the datagram left the socket.
    pub async fn send_once(&self, status: &str, payload: HeartbeatPayload) -> bool {
        self.shared.send(status, payload).await
    }

    /// Stop the periodic loop and wait for it to finish. Idempotent.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    pub fn sent_count(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }
}

impl Drop for HeartbeatSender {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.lock()
            && let Some((cancel, _)) = running.take()
        {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn listener() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn recv(socket: &UdpSocket) -> Heartbeat {
        let mut buf = [0u8; crate::wire::MAX_DATAGRAM_LEN];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
            .await
            .expect("heartbeat arrives")
            .unwrap();
        Heartbeat::decode(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn send_once_delivers_payload() {
        let (socket, addr) = listener().await;
        let sender = HeartbeatSender::bind("worker", addr).await.unwrap();
        let payload = HeartbeatPayload {
            pending_tasks: Some(4),
            ..Default::default()
        };
        assert!(sender.send_once("busy", payload).await);

        let hb = recv(&socket).await;
        assert_eq!(hb.service, "worker");
        assert_eq!(hb.status, "busy");
        assert_eq!(hb.pid, std::process::id());
        assert_eq!(hb.data.pending_tasks, Some(4));
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn periodic_loop_uses_current_status_and_stops() {
        let (socket, addr) = listener().await;
        let sender = HeartbeatSender::bind("sync", addr).await.unwrap();
        sender.set_status("checking", HeartbeatPayload::default());
        sender.start(Duration::from_millis(20));
        sender.start(Duration::from_millis(20));
        assert!(sender.is_running());

        let first = recv(&socket).await;
        let second = recv(&socket).await;
        assert_eq!(first.status, "checking");
        assert!(second.timestamp >= first.timestamp);

        sender.stop().await;
        sender.stop().await;
        assert!(!sender.is_running());
    }

    #[tokio::test]
    async fn oversized_payload_is_swallowed() {
        let (_socket, addr) = listener().await;
        let sender = HeartbeatSender::bind("ocr", addr).await.unwrap();
        let payload = HeartbeatPayload {
            extra: Some("x".repeat(4096)),
            ..Default::default()
        };
        assert!(!sender.send_once("running", payload).await);
        assert_eq!(sender.failed_count(), 1);
    }

    #[tokio::test]
    async fn log_mirror_records_heartbeats() {
        let dir = tempfile::tempdir().unwrap();
        let (_socket, addr) = listener().await;
        let log = HeartbeatLog::open(dir.path(), "recorder", Default::default()).unwrap();
        let path = log.path().to_path_buf();
        let sender = HeartbeatSender::bind("recorder", addr).await.unwrap().with_log(log);
        sender.send_once("running", HeartbeatPayload::default()).await;

        let last = HeartbeatLog::last_heartbeat(&path).unwrap().unwrap();
        assert_eq!(last.service, "recorder");
    }
}
