// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lifetrace supervise` command implementation.
//!
//! Binds the heartbeat listener, starts every configured service, and runs
//! the supervision loop until a shutdown signal arrives. All services are
//! stopped before the command returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lifetrace_config::LifetraceConfig;
use lifetrace_core::LifetraceError;
use lifetrace_heartbeat::{HeartbeatLog, HeartbeatReceiver, HeartbeatRegistry};
use lifetrace_supervisor::{CommandLauncher, ServiceDescriptor, ServiceSupervisor, SupervisorOptions};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::heartbeat::endpoint;
use crate::shutdown;

pub async fn run_supervise(config: LifetraceConfig) -> Result<(), LifetraceError> {
    if !config.supervisor.enabled {
        return Err(LifetraceError::Config(
            "supervisor.enabled is false; nothing to supervise".to_string(),
        ));
    }

    let registry = Arc::new(HeartbeatRegistry::new());
    let cancel = shutdown::install_signal_handler();

    if config.heartbeat.enabled {
        let receiver = HeartbeatReceiver::bind(
            endpoint(&config.heartbeat)?,
            Arc::clone(&registry),
            config.heartbeat.receive_timeout(),
        )
        .await?;
        tokio::spawn(receiver.run(cancel.clone()));
    } else {
        warn!("heartbeat listener disabled; only process exits trigger restarts");
    }

    if let Some(dir) = &config.heartbeat.log_dir {
        let dir = PathBuf::from(dir);
        let registry = Arc::clone(&registry);
        let every = config.supervisor.check_interval();
        let cancel = cancel.clone();
        tokio::spawn(async move { ingest_heartbeat_logs(&dir, &registry, every, cancel).await });
    }

    let descriptors: Vec<ServiceDescriptor> = config
        .supervisor
        .services
        .iter()
        .map(|service| ServiceDescriptor::from_config(service, config.heartbeat.timeout()))
        .collect();
    if descriptors.is_empty() {
        warn!("no services configured");
    }

    let supervisor = ServiceSupervisor::new(
        descriptors,
        Arc::clone(&registry),
        Arc::new(CommandLauncher),
        SupervisorOptions::from_config(&config.supervisor, &config.heartbeat),
    );
    supervisor.start_all().await;
    info!(
        services = config.supervisor.services.len(),
        check_interval_secs = config.supervisor.check_interval_secs,
        "supervisor running"
    );

    supervisor.run(cancel).await;

    for (name, status) in supervisor.get_status().services {
        debug!(service = %name, state = %status.state, restarts = status.restart_count, "final status");
    }
    info!("lifetrace supervise shutdown complete");
    Ok(())
}

/// Feed the newest record of every heartbeat log file into the registry.
///
/// Covers senders that log to disk while the datagram channel is down. The
/// registry keeps the newest timestamp, so re-reading a record is harmless.
async fn ingest_heartbeat_logs(
    dir: &Path,
    registry: &HeartbeatRegistry,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let scan_dir = dir.to_path_buf();
                let scanned = tokio::task::spawn_blocking(move || HeartbeatLog::scan_dir(&scan_dir)).await;
                match scanned {
                    Ok(Ok(heartbeats)) => {
                        for heartbeat in &heartbeats {
                            registry.record(heartbeat);
                        }
                    }
                    Ok(Err(e)) => debug!(dir = %dir.display(), error = %e, "heartbeat log scan failed"),
                    Err(e) => warn!(error = %e, "heartbeat log scan panicked"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lifetrace_core::LivenessStatus;
    use lifetrace_heartbeat::Heartbeat;

    use super::*;

    #[tokio::test]
    async fn log_ingest_updates_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HeartbeatLog::open(dir.path(), "sync", Default::default()).unwrap();
        log.append(&Heartbeat::now("sync", "running", Default::default())).unwrap();

        let registry = Arc::new(HeartbeatRegistry::new());
        let cancel = CancellationToken::new();
        let task = {
            let registry = Arc::clone(&registry);
            let dir = dir.path().to_path_buf();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                ingest_heartbeat_logs(&dir, &registry, Duration::from_millis(20), cancel).await
            })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while registry.status_of("sync") != LivenessStatus::Alive {
            assert!(tokio::time::Instant::now() < deadline, "log never ingested");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn disabled_supervisor_is_a_config_error() {
        let mut config = LifetraceConfig::default();
        config.supervisor.enabled = false;
        let err = run_supervise(config).await.unwrap_err();
        assert!(matches!(err, LifetraceError::Config(_)));
    }
}
