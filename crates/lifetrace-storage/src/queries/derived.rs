// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rows produced by processing collaborators: OCR text and search entries.

use lifetrace_core::LifetraceError;
use rusqlite::params;

use crate::database::{map_tr_err, Database};
use crate::models::{NewOcrResult, OcrResult, SearchEntry};

pub async fn insert_ocr_result(db: &Database, result: &NewOcrResult) -> Result<i64, LifetraceError> {
    let result = result.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO ocr_results (artifact_id, text_content, confidence, language, \
                 processing_time) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    result.artifact_id,
                    result.text_content,
                    result.confidence,
                    result.language,
                    result.processing_time,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn ocr_results_for(db: &Database, artifact_id: i64) -> Result<Vec<OcrResult>, LifetraceError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, artifact_id, text_content, confidence, language, processing_time, \
                 created_at FROM ocr_results WHERE artifact_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![artifact_id], |row| {
                Ok(OcrResult {
                    id: row.get(0)?,
                    artifact_id: row.get(1)?,
                    text_content: row.get(2)?,
                    confidence: row.get(3)?,
                    language: row.get(4)?,
                    processing_time: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn insert_search_entry(
    db: &Database,
    artifact_id: i64,
    content: &str,
    keywords: Option<&str>,
) -> Result<i64, LifetraceError> {
    let content = content.to_string();
    let keywords = keywords.map(str::to_string);
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO search_index (artifact_id, content, keywords) VALUES (?1, ?2, ?3)",
                params![artifact_id, content, keywords],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn search_entries_for(
    db: &Database,
    artifact_id: i64,
) -> Result<Vec<SearchEntry>, LifetraceError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, artifact_id, content, keywords, created_at FROM search_index \
                 WHERE artifact_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![artifact_id], |row| {
                Ok(SearchEntry {
                    id: row.get(0)?,
                    artifact_id: row.get(1)?,
                    content: row.get(2)?,
                    keywords: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}
