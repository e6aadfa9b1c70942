// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lifetrace sync` and `lifetrace check` command implementations.

use std::sync::Arc;

use lifetrace_config::LifetraceConfig;
use lifetrace_core::LifetraceError;
use lifetrace_heartbeat::HeartbeatPayload;
use lifetrace_sync::{ConsistencyReconciler, FileSystemWatcher, ReconcileReport};
use tracing::{info, warn};

use crate::{heartbeat, open_database, shutdown};

/// Default heartbeat service name of the sync process.
pub const SERVICE: &str = "sync";

pub async fn run_sync(config: LifetraceConfig, service: &str) -> Result<(), LifetraceError> {
    let db = open_database(&config).await?;
    let cancel = shutdown::install_signal_handler();
    let sender = heartbeat::start_sender(&config.heartbeat, service).await;

    let reconciler = Arc::new(ConsistencyReconciler::from_config(db.clone(), &config.sync));
    let mut tasks = Vec::new();
    if config.sync.consistency_check.enabled {
        tasks.push(reconciler.start(cancel.clone()));
    } else {
        info!("periodic consistency check disabled");
    }

    let watcher = Arc::new(FileSystemWatcher::from_config(db, &config.sync));
    if config.sync.file_monitor.enabled {
        tasks.push(watcher.start(cancel.clone()));
    } else {
        info!("file monitor disabled");
    }

    if let Some(sender) = &sender {
        let mut ticker = tokio::time::interval(config.heartbeat.interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = serde_json::json!({
                        "reconciler": reconciler.stats(),
                        "watcher": watcher.stats(),
                    });
                    sender.set_status("running", HeartbeatPayload {
                        extra: Some(stats.to_string()),
                        ..HeartbeatPayload::default()
                    });
                }
            }
        }
        sender.send_once("stopping", HeartbeatPayload::default()).await;
        sender.stop().await;
    } else {
        cancel.cancelled().await;
    }

    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "sync task ended abnormally");
        }
    }
    info!("lifetrace sync shutdown complete");
    Ok(())
}

/// One forced pass, printed as pretty JSON on stdout.
pub async fn run_check(config: &LifetraceConfig) -> Result<(), LifetraceError> {
    let report = check(config).await?;
    let json = serde_json::to_string_pretty(&report)
        .map_err(|e| LifetraceError::Internal(format!("cannot serialize report: {e}")))?;
    println!("{json}");
    Ok(())
}

async fn check(config: &LifetraceConfig) -> Result<ReconcileReport, LifetraceError> {
    let db = open_database(config).await?;
    ConsistencyReconciler::from_config(db, &config.sync)
        .force_check()
        .await
}
