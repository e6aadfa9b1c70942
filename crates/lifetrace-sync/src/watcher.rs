// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event-driven cleanup of single artifacts between reconciliation passes.
//!
//! Notifications for the artifact directory are coalesced by
//! `notify-debouncer-mini` and bridged onto a tokio channel. A debounced
//! event only says that a path changed, so a path that no longer exists is
//! treated as deleted (this covers the old name of a rename too). Lost
//! notifications are caught by the next reconciliation pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use lifetrace_config::model::SyncConfig;
use lifetrace_core::LifetraceError;
use lifetrace_storage::Database;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::{cleanup_artifact, is_artifact_path, normalize_extensions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatcherStats {
    pub events_seen: u64,
    pub records_cleaned: u64,
    pub errors: u64,
}

pub struct FileSystemWatcher {
    db: Database,
    artifact_dir: PathBuf,
    extensions: Vec<String>,
    debounce: Duration,
    watching: AtomicBool,
    events_seen: AtomicU64,
    records_cleaned: AtomicU64,
    errors: AtomicU64,
}

impl FileSystemWatcher {
    pub fn new(
        db: Database,
        artifact_dir: impl Into<PathBuf>,
        extensions: &[String],
        debounce: Duration,
    ) -> Self {
        Self {
            db,
            artifact_dir: artifact_dir.into(),
            extensions: normalize_extensions(extensions),
            debounce,
            watching: AtomicBool::new(false),
            events_seen: AtomicU64::new(0),
            records_cleaned: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn from_config(db: Database, config: &SyncConfig) -> Self {
        Self::new(
            db,
            &config.artifact_dir,
            &config.extensions,
            config.file_monitor.debounce(),
        )
    }

    /// True once the OS watch is registered and until the loop exits.
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            events_seen: self.events_seen.load(Ordering::Relaxed),
            records_cleaned: self.records_cleaned.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// React to a debounced change of `path`.
    ///
    /// Returns `true` if an index record was removed. Paths with an unknown
    /// extension and paths that still exist are ignored.
    pub async fn handle_path(&self, path: &Path) -> Result<bool, LifetraceError> {
        if !is_artifact_path(path, &self.extensions) {
            return Ok(false);
        }
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        let exists = tokio::fs::try_exists(path).await.map_err(|e| {
            LifetraceError::Reconcile(format!("cannot stat {}: {e}", path.display()))
        })?;
        if exists {
            debug!(path = %path.display(), "artifact still present");
            return Ok(false);
        }
        let path = path.to_string_lossy();
        let cleaned = cleanup_artifact(&self.db, &path).await?.is_some();
        if cleaned {
            self.records_cleaned.fetch_add(1, Ordering::Relaxed);
        }
        Ok(cleaned)
    }

    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run(cancel).await {
                error!(error = %e, "file system watcher failed to start");
            }
        })
    }

    /// Watch the artifact directory until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), LifetraceError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.debounce, move |res: DebounceEventResult| {
            // The receiver is gone only after shutdown.
            let _ = tx.send(res);
        })
        .map_err(|e| LifetraceError::Internal(format!("cannot create file watcher: {e}")))?;
        debouncer
            .watcher()
            .watch(&self.artifact_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                LifetraceError::Reconcile(format!(
                    "cannot watch {}: {e}",
                    self.artifact_dir.display()
                ))
            })?;

        self.watching.store(true, Ordering::Release);
        info!(
            dir = %self.artifact_dir.display(),
            debounce_ms = self.debounce.as_millis() as u64,
            "file system watcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(Ok(events)) => {
                        for event in events {
                            if let Err(e) = self.handle_path(&event.path).await {
                                self.errors.fetch_add(1, Ordering::Relaxed);
                                error!(path = %event.path.display(), error = %e, "targeted cleanup failed");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        self.errors.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "file watcher error");
                    }
                    None => break,
                },
            }
        }

        self.watching.store(false, Ordering::Release);
        drop(debouncer);
        info!("file system watcher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lifetrace_storage::queries::{artifacts, tasks};
    use lifetrace_test_utils::TestHarness;

    use super::*;

    fn watcher(harness: &TestHarness, debounce: Duration) -> FileSystemWatcher {
        let config = harness.sync_config();
        FileSystemWatcher::new(harness.db.clone(), harness.artifact_dir(), &config.extensions, debounce)
    }

    #[tokio::test]
    async fn handle_path_cleans_deleted_artifact() {
        let harness = TestHarness::new().await.unwrap();
        let id = harness.capture("7.png").await;
        let task = tasks::enqueue(&harness.db, id, "ocr").await.unwrap().task_id();
        harness.remove_file("7.png");

        let watcher = watcher(&harness, Duration::from_millis(50));
        let path = PathBuf::from(harness.artifact_path("7.png"));
        assert!(watcher.handle_path(&path).await.unwrap());
        assert!(artifacts::get_artifact(&harness.db, id).await.unwrap().is_none());
        assert!(tasks::get_task(&harness.db, task).await.unwrap().is_none());

        // A repeated notification finds nothing left to clean.
        assert!(!watcher.handle_path(&path).await.unwrap());
        assert_eq!(watcher.stats().records_cleaned, 1);
        assert_eq!(watcher.stats().events_seen, 2);
    }

    #[tokio::test]
    async fn handle_path_ignores_present_and_foreign_files() {
        let harness = TestHarness::new().await.unwrap();
        let id = harness.capture("still-here.png").await;
        let watcher = watcher(&harness, Duration::from_millis(50));

        let present = PathBuf::from(harness.artifact_path("still-here.png"));
        assert!(!watcher.handle_path(&present).await.unwrap());
        assert!(artifacts::get_artifact(&harness.db, id).await.unwrap().is_some());

        let foreign = PathBuf::from(harness.artifact_path("partial.png.tmp"));
        assert!(!watcher.handle_path(&foreign).await.unwrap());
        assert_eq!(watcher.stats().events_seen, 1);
    }

    #[tokio::test]
    async fn deletion_event_triggers_cleanup() {
        let harness = TestHarness::new().await.unwrap();
        let id = harness.capture("watched.png").await;
        let watcher = Arc::new(watcher(&harness, Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        let handle = watcher.start(cancel.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !watcher.is_watching() {
            assert!(tokio::time::Instant::now() < deadline, "watch never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        harness.remove_file("watched.png");
        while watcher.stats().records_cleaned == 0 {
            assert!(tokio::time::Instant::now() < deadline, "deletion never observed");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(artifacts::get_artifact(&harness.db, id).await.unwrap().is_none());

        cancel.cancel();
        handle.await.unwrap();
        assert!(!watcher.is_watching());
    }

    #[tokio::test]
    async fn rename_cleans_the_old_path() {
        let harness = TestHarness::new().await.unwrap();
        let id = harness.capture("before.png").await;
        let watcher = Arc::new(watcher(&harness, Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        let handle = watcher.start(cancel.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while !watcher.is_watching() {
            assert!(tokio::time::Instant::now() < deadline, "watch never registered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        std::fs::rename(
            harness.artifact_path("before.png"),
            harness.artifact_path("after.png"),
        )
        .unwrap();
        while watcher.stats().records_cleaned == 0 {
            assert!(tokio::time::Instant::now() < deadline, "rename never observed");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(artifacts::get_artifact(&harness.db, id).await.unwrap().is_none());
        assert!(Path::new(&harness.artifact_path("after.png")).exists());
        assert_eq!(watcher.stats().records_cleaned, 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn missing_directory_fails_to_start() {
        let harness = TestHarness::new().await.unwrap();
        let watcher = FileSystemWatcher::new(
            harness.db.clone(),
            harness.artifact_dir().join("absent"),
            &["png".to_string()],
            Duration::from_millis(50),
        );
        let err = watcher.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LifetraceError::Reconcile(_)));
    }
}
