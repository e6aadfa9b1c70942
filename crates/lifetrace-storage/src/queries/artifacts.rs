// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Artifact index operations and per-artifact cleanup.

use lifetrace_core::LifetraceError;
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::database::{map_tr_err, Database};
use crate::models::{ArtifactCounts, ArtifactRecord, CleanupSummary, NewArtifact};

const ARTIFACT_COLUMNS: &str = "id, file_path, file_hash, file_size, width, height, \
                                created_at, processed_at, is_processed";

fn row_to_artifact(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_hash: row.get(2)?,
        file_size: row.get(3)?,
        width: row.get(4)?,
        height: row.get(5)?,
        created_at: row.get(6)?,
        processed_at: row.get(7)?,
        is_processed: row.get(8)?,
    })
}

/// Index a new artifact file. Fails if the path is already indexed.
pub async fn insert_artifact(db: &Database, artifact: &NewArtifact) -> Result<i64, LifetraceError> {
    let artifact = artifact.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO artifacts (file_path, file_hash, file_size, width, height)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    artifact.file_path,
                    artifact.file_hash,
                    artifact.file_size,
                    artifact.width,
                    artifact.height,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_artifact(db: &Database, id: i64) -> Result<Option<ArtifactRecord>, LifetraceError> {
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1"),
                params![id],
                row_to_artifact,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_artifact_by_path(
    db: &Database,
    file_path: &str,
) -> Result<Option<ArtifactRecord>, LifetraceError> {
    let file_path = file_path.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE file_path = ?1"),
                params![file_path],
                row_to_artifact,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Every indexed file path, the record side of a reconciliation diff.
pub async fn list_artifact_paths(db: &Database) -> Result<Vec<String>, LifetraceError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare("SELECT file_path FROM artifacts ORDER BY id ASC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn count_artifacts(db: &Database) -> Result<ArtifactCounts, LifetraceError> {
    db.connection()
        .call(|conn| {
            conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_processed), 0) FROM artifacts",
                [],
                |row| {
                    Ok(ArtifactCounts {
                        total: row.get(0)?,
                        processed: row.get(1)?,
                    })
                },
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Flag an artifact as processed. Returns `false` if the record is gone.
pub async fn mark_processed(db: &Database, id: i64) -> Result<bool, LifetraceError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE artifacts SET is_processed = 1,
                 processed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Delete the artifact indexed at `file_path` together with its tasks,
/// OCR results, and search entries, all in one transaction.
///
/// Returns `None` when no record exists for the path.
pub async fn delete_artifact_cascade(
    db: &Database,
    file_path: &str,
) -> Result<Option<CleanupSummary>, LifetraceError> {
    let file_path = file_path.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let artifact_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM artifacts WHERE file_path = ?1",
                    params![file_path],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(artifact_id) = artifact_id else {
                return Ok(None);
            };

            let ocr_results = tx.execute(
                "DELETE FROM ocr_results WHERE artifact_id = ?1",
                params![artifact_id],
            )?;
            let search_entries = tx.execute(
                "DELETE FROM search_index WHERE artifact_id = ?1",
                params![artifact_id],
            )?;
            let tasks = tx.execute("DELETE FROM tasks WHERE artifact_id = ?1", params![artifact_id])?;
            tx.execute("DELETE FROM artifacts WHERE id = ?1", params![artifact_id])?;
            tx.commit()?;

            Ok(Some(CleanupSummary {
                artifact_id,
                tasks,
                ocr_results,
                search_entries,
            }))
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewOcrResult;
    use crate::queries::{derived, tasks};

    fn shot(path: &str) -> NewArtifact {
        NewArtifact {
            file_path: path.to_string(),
            file_hash: format!("hash-{path}"),
            file_size: 1024,
            width: 1920,
            height: 1080,
        }
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let db = Database::open_in_memory().await.unwrap();
        let id = insert_artifact(&db, &shot("/data/shots/1.png")).await.unwrap();

        let by_id = get_artifact(&db, id).await.unwrap().unwrap();
        let by_path = get_artifact_by_path(&db, "/data/shots/1.png").await.unwrap().unwrap();
        assert_eq!(by_id, by_path);
        assert_eq!(by_id.width, 1920);
        assert!(!by_id.is_processed);
        assert!(by_id.processed_at.is_none());

        assert!(insert_artifact(&db, &shot("/data/shots/1.png")).await.is_err());
        assert!(get_artifact(&db, id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_processed_sets_flag_and_time() {
        let db = Database::open_in_memory().await.unwrap();
        let id = insert_artifact(&db, &shot("/a.png")).await.unwrap();
        assert!(mark_processed(&db, id).await.unwrap());
        assert!(!mark_processed(&db, id + 10).await.unwrap());

        let record = get_artifact(&db, id).await.unwrap().unwrap();
        assert!(record.is_processed);
        assert!(record.processed_at.is_some());
        assert_eq!(
            count_artifacts(&db).await.unwrap(),
            ArtifactCounts { total: 1, processed: 1 }
        );
    }

    #[tokio::test]
    async fn cascade_removes_only_that_artifact() {
        let db = Database::open_in_memory().await.unwrap();
        let gone = insert_artifact(&db, &shot("/data/shots/42.png")).await.unwrap();
        let kept = insert_artifact(&db, &shot("/data/shots/43.png")).await.unwrap();
        for id in [gone, kept] {
            tasks::enqueue(&db, id, "ocr").await.unwrap();
            derived::insert_ocr_result(
                &db,
                &NewOcrResult {
                    artifact_id: id,
                    text_content: Some("hello".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
            derived::insert_search_entry(&db, id, "hello", None).await.unwrap();
        }

        let summary = delete_artifact_cascade(&db, "/data/shots/42.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            summary,
            CleanupSummary {
                artifact_id: gone,
                tasks: 1,
                ocr_results: 1,
                search_entries: 1,
            }
        );

        assert_eq!(list_artifact_paths(&db).await.unwrap(), vec!["/data/shots/43.png"]);
        assert_eq!(tasks::counts(&db, None).await.unwrap().total(), 1);
        assert_eq!(derived::ocr_results_for(&db, kept).await.unwrap().len(), 1);
        assert_eq!(tasks::count_orphan_tasks(&db).await.unwrap(), 0);

        assert!(delete_artifact_cascade(&db, "/data/shots/42.png").await.unwrap().is_none());
    }
}
