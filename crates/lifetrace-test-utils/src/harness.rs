// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Temp-directory harness with a migrated database and an artifact folder.

use std::path::{Path, PathBuf};

use lifetrace_config::model::{StorageConfig, SyncConfig};
use lifetrace_core::{LifetraceError, NewArtifact};
use lifetrace_storage::queries::artifacts;
use lifetrace_storage::Database;

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    extensions: Vec<String>,
    wal_mode: bool,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            extensions: vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()],
            wal_mode: true,
        }
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_wal_mode(mut self, enabled: bool) -> Self {
        self.wal_mode = enabled;
        self
    }

    pub async fn build(self) -> Result<TestHarness, LifetraceError> {
        let temp_dir =
            tempfile::TempDir::new().map_err(|e| LifetraceError::Storage { source: e.into() })?;
        let artifact_dir = temp_dir.path().join("screenshots");
        std::fs::create_dir_all(&artifact_dir)
            .map_err(|e| LifetraceError::Storage { source: e.into() })?;

        let db = Database::open_with_config(&StorageConfig {
            database_path: temp_dir.path().join("test.db").to_string_lossy().to_string(),
            wal_mode: self.wal_mode,
            ..StorageConfig::default()
        })
        .await?;

        Ok(TestHarness {
            _temp_dir: temp_dir,
            artifact_dir,
            extensions: self.extensions,
            db,
        })
    }
}

/// An isolated database plus artifact directory, removed on drop.
pub struct TestHarness {
    _temp_dir: tempfile::TempDir,
    artifact_dir: PathBuf,
    extensions: Vec<String>,
    pub db: Database,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub async fn new() -> Result<Self, LifetraceError> {
        Self::builder().build().await
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// A sync config section pointing at the harness directory.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            artifact_dir: self.artifact_dir.to_string_lossy().to_string(),
            extensions: self.extensions.clone(),
            ..SyncConfig::default()
        }
    }

    /// Absolute path of `name` inside the artifact directory.
    pub fn artifact_path(&self, name: &str) -> String {
        self.artifact_dir.join(name).to_string_lossy().to_string()
    }

    /// Write a file named `name` into the artifact directory.
    pub fn write_file(&self, name: &str) -> String {
        let path = self.artifact_path(name);
        std::fs::write(&path, b"\x89PNG fake").expect("write artifact file");
        path
    }

    pub fn remove_file(&self, name: &str) {
        std::fs::remove_file(self.artifact_dir.join(name)).expect("remove artifact file");
    }

    /// Index `name` without touching the filesystem.
    pub async fn index(&self, name: &str) -> i64 {
        let path = self.artifact_path(name);
        artifacts::insert_artifact(
            &self.db,
            &NewArtifact {
                file_hash: format!("sha256:{name}"),
                file_path: path,
                file_size: 9,
                width: 1280,
                height: 800,
            },
        )
        .await
        .expect("index artifact")
    }

    /// Write `name` to disk and index it.
    pub async fn capture(&self, name: &str) -> i64 {
        self.write_file(name);
        self.index(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_isolates_database_and_files() {
        let harness = TestHarness::new().await.unwrap();
        let id = harness.capture("1.png").await;
        let record = artifacts::get_artifact(&harness.db, id).await.unwrap().unwrap();
        assert_eq!(record.file_path, harness.artifact_path("1.png"));
        assert!(Path::new(&record.file_path).exists());
        assert_eq!(harness.sync_config().extensions, vec!["png", "jpg", "jpeg"]);
    }
}
