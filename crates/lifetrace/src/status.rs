// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lifetrace status` and `lifetrace enqueue` command implementations.

use lifetrace_config::LifetraceConfig;
use lifetrace_core::LifetraceError;
use lifetrace_storage::queries::artifacts;
use lifetrace_storage::{ArtifactCounts, Database, Enqueued, TaskCounts};
use lifetrace_worker::TaskQueue;
use serde::Serialize;

use crate::open_database;

/// Structured output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub tasks: TaskCounts,
    pub artifacts: ArtifactCounts,
}

pub async fn run_status(config: &LifetraceConfig, json: bool) -> Result<(), LifetraceError> {
    let db = open_database(config).await?;
    let report = collect_status(&db, &config.storage.database_path).await?;

    if json {
        let out = serde_json::to_string_pretty(&report)
            .map_err(|e| LifetraceError::Internal(format!("cannot serialize status: {e}")))?;
        println!("{out}");
    } else {
        print!("{}", render_status(&report));
    }
    Ok(())
}

async fn collect_status(db: &Database, database: &str) -> Result<StatusReport, LifetraceError> {
    Ok(StatusReport {
        database: database.to_string(),
        tasks: TaskQueue::new(db.clone()).counts(None).await?,
        artifacts: artifacts::count_artifacts(db).await?,
    })
}

fn render_status(report: &StatusReport) -> String {
    let tasks = &report.tasks;
    format!(
        "database: {}\n\
         artifacts: {} ({} processed)\n\
         tasks: {} total\n  \
         pending     {}\n  \
         processing  {}\n  \
         completed   {}\n  \
         failed      {}\n",
        report.database,
        report.artifacts.total,
        report.artifacts.processed,
        tasks.total(),
        tasks.pending,
        tasks.processing,
        tasks.completed,
        tasks.failed,
    )
}

pub async fn run_enqueue(
    config: &LifetraceConfig,
    artifact_id: i64,
    kind: Option<&str>,
) -> Result<(), LifetraceError> {
    let db = open_database(config).await?;
    let kind = kind.unwrap_or(&config.worker.task_kind);
    match enqueue(&db, artifact_id, kind).await? {
        Enqueued::Created(id) => println!("queued task {id} ({kind}) for artifact {artifact_id}"),
        Enqueued::Existing(id) => {
            println!("task {id} ({kind}) is already queued for artifact {artifact_id}")
        }
    }
    Ok(())
}

/// Enqueue after checking that the artifact is indexed.
async fn enqueue(db: &Database, artifact_id: i64, kind: &str) -> Result<Enqueued, LifetraceError> {
    if artifacts::get_artifact(db, artifact_id).await?.is_none() {
        return Err(LifetraceError::NotFound {
            kind: "artifact".to_string(),
            id: artifact_id.to_string(),
        });
    }
    TaskQueue::new(db.clone()).enqueue(artifact_id, kind).await
}
