// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All access is serialized through tokio-rusqlite's single background thread,
//! which is also what makes task claims mutually exclusive across workers.
//! Clones share that thread; do not open a second `Database` on the same file
//! for writes within one process.

use std::path::Path;
use std::time::Duration;

use lifetrace_config::model::StorageConfig;
use lifetrace_core::{HealthStatus, LifetraceError};
use tracing::{debug, info};

use crate::migrations;

/// Map a tokio-rusqlite failure into the crate-wide error type.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> LifetraceError {
    LifetraceError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the LifeTrace SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path` with default settings.
    pub async fn open(path: &str) -> Result<Self, LifetraceError> {
        Self::open_with_config(&StorageConfig {
            database_path: path.to_string(),
            ..StorageConfig::default()
        })
        .await
    }

    /// Open the database described by the storage config section.
    ///
    /// Creates the parent directory, applies PRAGMAs, and runs pending
    /// migrations before returning.
    pub async fn open_with_config(config: &StorageConfig) -> Result<Self, LifetraceError> {
        let path = Path::new(&config.database_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| LifetraceError::Storage {
                source: Box::new(e),
            })?;
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| LifetraceError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.initialize(config.wal_mode, config.busy_timeout()).await?;
        info!(path = %config.database_path, "database opened");
        Ok(db)
    }

    /// Open a private in-memory database. Each call yields an independent store.
    pub async fn open_in_memory() -> Result<Self, LifetraceError> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| LifetraceError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.initialize(false, Duration::from_millis(5000)).await?;
        Ok(db)
    }

    async fn initialize(&self, wal_mode: bool, busy_timeout: Duration) -> Result<(), LifetraceError> {
        self.conn
            .call(move |conn| {
                if wal_mode {
                    conn.pragma_update(None, "journal_mode", "WAL")?;
                    conn.pragma_update(None, "synchronous", "NORMAL")?;
                }
                conn.busy_timeout(busy_timeout)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;

        let applied = self
            .conn
            .call(|conn| migrations::run_migrations(conn))
            .await
            .map_err(|e| LifetraceError::Storage {
                source: Box::new(e),
            })?;
        if applied > 0 {
            debug!(applied, "database migrations applied");
        }
        Ok(())
    }

    /// Access the underlying connection for query modules.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Round-trip a trivial query through the connection thread.
    pub async fn health_check(&self) -> HealthStatus {
        let result = self
            .conn
            .call(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .await;
        match result {
            Ok(1) => HealthStatus::Healthy,
            Ok(other) => HealthStatus::Degraded(format!("unexpected probe result {other}")),
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_parent_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/lifetrace.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        assert!(path.exists());

        let tables: Vec<String> = db
            .connection()
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' \
                     AND name NOT LIKE 'refinery%' AND name NOT LIKE 'sqlite%' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<Result<Vec<String>, _>>()
            })
            .await
            .unwrap();
        assert_eq!(tables, vec!["artifacts", "ocr_results", "search_index", "tasks"]);
        assert_eq!(db.health_check().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn reopening_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lifetrace.db");
        let path = path.to_str().unwrap();
        drop(Database::open(path).await.unwrap());
        let db = Database::open(path).await.unwrap();
        let mode: String = db
            .connection()
            .call(|conn| conn.query_row("PRAGMA journal_mode", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
