// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable task queue operations.
//!
//! A task moves `pending -> processing -> {completed | failed}` once per
//! attempt. Claims are a conditional update executed on the single
//! connection thread, so two workers can never own the same task. Each
//! claim bumps `claim_token`; every later transition of that attempt must
//! present the token, so a claim that was reset and handed to another
//! worker is dead for its previous holder.

use std::time::Duration;

use lifetrace_core::LifetraceError;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::database::{map_tr_err, Database};
use crate::models::{Enqueued, TaskCounts, TaskRecord, TaskStatus};

const TASK_COLUMNS: &str = "id, artifact_id, task_kind, status, retry_count, error_message, \
                            claim_token, created_at, updated_at";

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        artifact_id: row.get(1)?,
        task_kind: row.get(2)?,
        status: parse_status(row, 3)?,
        retry_count: row.get(4)?,
        error_message: row.get(5)?,
        claim_token: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<TaskStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn status_of(conn: &rusqlite::Connection, task_id: i64) -> rusqlite::Result<Option<TaskStatus>> {
    conn.query_row(
        "SELECT status FROM tasks WHERE id = ?1",
        params![task_id],
        |row| parse_status(row, 0),
    )
    .optional()
}

/// Explain why a claim-scoped update matched no row.
fn claim_rejection(
    conn: &rusqlite::Connection,
    task_id: i64,
    claim_token: i64,
) -> rusqlite::Result<LifetraceError> {
    Ok(match status_of(conn, task_id)? {
        Some(TaskStatus::Processing) => LifetraceError::ClaimLost { task_id, claim_token },
        actual => LifetraceError::TaskState {
            task_id,
            expected: TaskStatus::Processing,
            actual,
        },
    })
}

/// Run a claim-scoped update; no matching row is reported as an error.
async fn update_claim(
    db: &Database,
    task_id: i64,
    claim_token: i64,
    sql: &'static str,
    error_message: Option<String>,
) -> Result<(), LifetraceError> {
    let outcome = db
        .connection()
        .call(move |conn| {
            let changed = match &error_message {
                Some(message) => conn.execute(sql, params![task_id, claim_token, message])?,
                None => conn.execute(sql, params![task_id, claim_token])?,
            };
            if changed == 1 {
                Ok(None)
            } else {
                Ok(Some(claim_rejection(conn, task_id, claim_token)?))
            }
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        None => Ok(()),
        Some(err) => Err(err),
    }
}

/// Insert a pending task unless a pending or processing one already exists
/// for the same `(artifact_id, task_kind)` pair.
pub async fn enqueue(
    db: &Database,
    artifact_id: i64,
    task_kind: &str,
) -> Result<Enqueued, LifetraceError> {
    let task_kind = task_kind.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM tasks
                     WHERE artifact_id = ?1 AND task_kind = ?2
                       AND status IN ('pending', 'processing')
                     ORDER BY id ASC LIMIT 1",
                    params![artifact_id, task_kind],
                    |row| row.get(0),
                )
                .optional()?;

            let outcome = match existing {
                Some(id) => Enqueued::Existing(id),
                None => {
                    tx.execute(
                        "INSERT INTO tasks (artifact_id, task_kind) VALUES (?1, ?2)",
                        params![artifact_id, task_kind],
                    )?;
                    Enqueued::Created(tx.last_insert_rowid())
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically claim up to `limit` pending tasks of `task_kind`, oldest first.
///
/// Returned records are detached copies already marked `processing`.
pub async fn claim_batch(
    db: &Database,
    task_kind: &str,
    limit: usize,
) -> Result<Vec<TaskRecord>, LifetraceError> {
    let task_kind = task_kind.to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let candidates: Vec<i64> = {
                let mut stmt = tx.prepare(
                    "SELECT id FROM tasks
                     WHERE task_kind = ?1 AND status = 'pending'
                     ORDER BY id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![task_kind, limit], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };

            let mut claimed = Vec::with_capacity(candidates.len());
            for id in candidates {
                let changed = tx.execute(
                    "UPDATE tasks SET status = 'processing',
                     claim_token = claim_token + 1,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1 AND status = 'pending'",
                    params![id],
                )?;
                if changed == 1 {
                    let task = tx.query_row(
                        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                        params![id],
                        row_to_task,
                    )?;
                    claimed.push(task);
                }
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark the task held under `claim_token` as completed.
pub async fn complete(db: &Database, task_id: i64, claim_token: i64) -> Result<(), LifetraceError> {
    update_claim(
        db,
        task_id,
        claim_token,
        "UPDATE tasks SET status = 'completed', error_message = NULL,
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?1 AND status = 'processing' AND claim_token = ?2",
        None,
    )
    .await
}

/// Mark the task held under `claim_token` as failed, recording
/// `error_message` and bumping `retry_count`.
pub async fn fail(
    db: &Database,
    task_id: i64,
    claim_token: i64,
    error_message: &str,
) -> Result<(), LifetraceError> {
    update_claim(
        db,
        task_id,
        claim_token,
        "UPDATE tasks SET status = 'failed', error_message = ?3,
         retry_count = retry_count + 1,
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?1 AND status = 'processing' AND claim_token = ?2",
        Some(error_message.to_string()),
    )
    .await
}

/// Refresh the claim age before work on the task starts.
///
/// Fails with `ClaimLost` or `TaskState` when the claim was reset in the
/// meantime; the caller must then leave the task alone.
pub async fn touch_claim(db: &Database, task_id: i64, claim_token: i64) -> Result<(), LifetraceError> {
    update_claim(
        db,
        task_id,
        claim_token,
        "UPDATE tasks SET updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?1 AND status = 'processing' AND claim_token = ?2",
        None,
    )
    .await
}

/// Hand an unstarted claim back to `pending` without charging a retry.
pub async fn release_claim(db: &Database, task_id: i64, claim_token: i64) -> Result<(), LifetraceError> {
    update_claim(
        db,
        task_id,
        claim_token,
        "UPDATE tasks SET status = 'pending',
         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?1 AND status = 'processing' AND claim_token = ?2",
        None,
    )
    .await
}

pub async fn get_task(db: &Database, task_id: i64) -> Result<Option<TaskRecord>, LifetraceError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![task_id],
                row_to_task,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// List tasks in `status`, newest update first.
pub async fn list_tasks(
    db: &Database,
    status: TaskStatus,
    limit: usize,
) -> Result<Vec<TaskRecord>, LifetraceError> {
    let status = status.to_string();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ?1
                 ORDER BY updated_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![status, limit], row_to_task)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Per-status totals, optionally restricted to one task kind.
pub async fn counts(db: &Database, task_kind: Option<&str>) -> Result<TaskCounts, LifetraceError> {
    let task_kind = task_kind.map(str::to_string);
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM tasks
                 WHERE ?1 IS NULL OR task_kind = ?1
                 GROUP BY status",
            )?;
            let mut counts = TaskCounts::default();
            let mut rows = stmt.query(params![task_kind])?;
            while let Some(row) = rows.next()? {
                let n: i64 = row.get(1)?;
                match parse_status(row, 0)? {
                    TaskStatus::Pending => counts.pending = n,
                    TaskStatus::Processing => counts.processing = n,
                    TaskStatus::Completed => counts.completed = n,
                    TaskStatus::Failed => counts.failed = n,
                }
            }
            Ok(counts)
        })
        .await
        .map_err(map_tr_err)
}

/// Return tasks whose claim has not been refreshed for `older_than` to
/// `pending`. Used after a worker crash left claims behind. Workers refresh
/// a claim when they start on the task, so a live task stays fresh as long
/// as processing finishes within `older_than`.
pub async fn reset_stale_claims(
    db: &Database,
    older_than: Duration,
) -> Result<usize, LifetraceError> {
    let modifier = format!("-{} seconds", older_than.as_secs());
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE tasks SET status = 'pending',
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE status = 'processing'
                   AND updated_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?1)",
                params![modifier],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Move failed tasks of `task_kind` with fewer than `max_retries` attempts
/// back to `pending`.
///
/// A failed row whose pair already has a live task is left failed.
pub async fn requeue_failed(
    db: &Database,
    task_kind: &str,
    max_retries: u32,
) -> Result<usize, LifetraceError> {
    let task_kind = task_kind.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE OR IGNORE tasks SET status = 'pending',
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE task_kind = ?1 AND status = 'failed' AND retry_count < ?2",
                params![task_kind, max_retries],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Count tasks whose artifact record no longer exists.
pub async fn count_orphan_tasks(db: &Database) -> Result<i64, LifetraceError> {
    db.connection()
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM tasks t
                 WHERE NOT EXISTS (SELECT 1 FROM artifacts a WHERE a.id = t.artifact_id)",
                [],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}
