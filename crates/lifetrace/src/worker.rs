// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lifetrace worker` command implementation.
//!
//! Runs the worker pool and the retry sweep against the configured
//! processor command and publishes pool statistics in the heartbeat.

use std::sync::Arc;

use lifetrace_config::LifetraceConfig;
use lifetrace_core::{LifetraceError, TaskProcessor};
use lifetrace_worker::{CommandProcessor, PoolOptions, RetrySweeper, TaskQueue, WorkerPool};
use tracing::{info, warn};

use crate::{heartbeat, open_database, shutdown};

/// Default heartbeat service name of the worker process.
pub const SERVICE: &str = "worker";

pub async fn run_worker(config: LifetraceConfig, service: &str) -> Result<(), LifetraceError> {
    let processor: Arc<dyn TaskProcessor> = match CommandProcessor::from_config(&config.worker) {
        Some(processor) => Arc::new(processor),
        None => {
            return Err(LifetraceError::Config(
                "worker.processor_command must be set to run the worker".to_string(),
            ));
        }
    };

    let db = open_database(&config).await?;
    let queue = TaskQueue::new(db);
    let cancel = shutdown::install_signal_handler();
    let sender = heartbeat::start_sender(&config.heartbeat, service).await;

    let pool = Arc::new(WorkerPool::new(
        queue.clone(),
        processor,
        PoolOptions::from_config(&config.worker),
    ));
    let pool_task = tokio::spawn(Arc::clone(&pool).run(cancel.clone()));

    let sweeper = RetrySweeper::from_config(queue, &config.worker);
    let sweep_cancel = cancel.clone();
    let sweep_task = tokio::spawn(async move { sweeper.run(sweep_cancel).await });

    if let Some(sender) = &sender {
        let mut ticker = tokio::time::interval(config.heartbeat.interval());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => sender.set_status("running", pool.heartbeat_payload().await),
            }
        }
    } else {
        cancel.cancelled().await;
    }

    if let Err(e) = pool_task.await {
        warn!(error = %e, "worker pool ended abnormally");
    }
    if let Err(e) = sweep_task.await {
        warn!(error = %e, "retry sweep ended abnormally");
    }
    if let Some(sender) = &sender {
        sender.send_once("stopping", pool.heartbeat_payload().await).await;
        sender.stop().await;
    }
    info!(stats = ?pool.stats(), "lifetrace worker shutdown complete");
    Ok(())
}
