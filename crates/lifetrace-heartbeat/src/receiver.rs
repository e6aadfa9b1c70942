// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! UDP listener that feeds decoded heartbeats into a [`HeartbeatRegistry`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lifetrace_core::LifetraceError;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::HeartbeatRegistry;
use crate::wire::{Heartbeat, MAX_DATAGRAM_LEN};

pub struct HeartbeatReceiver {
    socket: UdpSocket,
    registry: Arc<HeartbeatRegistry>,
    receive_timeout: Duration,
}

impl HeartbeatReceiver {
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<HeartbeatRegistry>,
        receive_timeout: Duration,
    ) -> Result<Self, LifetraceError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| LifetraceError::Transport {
                message: format!("cannot bind heartbeat listener on {addr}"),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            socket,
            registry,
            receive_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LifetraceError> {
        self.socket.local_addr().map_err(|e| LifetraceError::Transport {
            message: "heartbeat listener has no local address".to_string(),
            source: Some(Box::new(e)),
        })
    }

    /// Receive until `cancel` fires. Each wait is bounded by the receive
    /// timeout, and no datagram can end the loop.
    pub async fn run(self, cancel: CancellationToken) {
        info!(addr = ?self.socket.local_addr().ok(), "heartbeat receiver started");
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = tokio::time::timeout(self.receive_timeout, self.socket.recv_from(&mut buf)) => r,
            };
            match received {
                Err(_elapsed) => continue,
                Ok(Err(e)) => {
                    warn!(error = %e, "heartbeat receive failed");
                }
                Ok(Ok((len, peer))) => self.handle(&buf[..len], peer),
            }
        }
        info!("heartbeat receiver stopped");
    }

    fn handle(&self, datagram: &[u8], peer: SocketAddr) {
        match Heartbeat::decode(datagram) {
            Ok(heartbeat) => {
                if !self.registry.record(&heartbeat) {
                    debug!(service = %heartbeat.service, %peer, "stale heartbeat ignored");
                }
            }
            Err(e) => {
                self.registry.note_malformed();
                debug!(%peer, error = %e, "malformed heartbeat dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lifetrace_core::LivenessStatus;

    use super::*;
    use crate::sender::HeartbeatSender;
    use crate::wire::HeartbeatPayload;

    async fn eventually(mut check: impl FnMut() -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check() {
            assert!(tokio::time::Instant::now() < deadline, "condition not reached");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn sender_to_registry_end_to_end() {
        let registry = Arc::new(HeartbeatRegistry::new());
        let receiver = HeartbeatReceiver::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::clone(&registry),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let addr = receiver.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receiver.run(cancel.clone()));

        let sender = HeartbeatSender::bind("ocr", addr).await.unwrap();
        let payload = HeartbeatPayload {
            queue_size: Some(2),
            ..Default::default()
        };
        assert!(sender.send_once("running", payload).await);

        let garbage = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        garbage.send_to(b"not a heartbeat", addr).await.unwrap();

        eventually(|| registry.malformed_count() == 1 && registry.get("ocr").is_some()).await;
        assert_eq!(registry.status_of("ocr"), LivenessStatus::Alive);
        assert!(registry.is_alive("ocr", Duration::from_secs(30)));
        assert_eq!(registry.get("ocr").unwrap().payload.queue_size, Some(2));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("receiver observes cancellation")
            .unwrap();
    }
}
