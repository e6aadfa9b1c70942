// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic diff of the artifact directory against the artifact index.
//!
//! A pass enumerates the directory into a file set and the index into a
//! record set. Records without a file are removed together with their
//! dependents, one transaction per artifact. Files without a record are
//! only reported since they may be writes that have not been indexed yet.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lifetrace_config::model::SyncConfig;
use lifetrace_core::LifetraceError;
use lifetrace_storage::Database;
use lifetrace_storage::queries::{artifacts, tasks};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::{cleanup_artifact, is_artifact_path, normalize_extensions};

/// Orphan files listed individually in the log before summarizing.
const MAX_LOGGED_ORPHAN_FILES: usize = 5;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub checked_at: DateTime<Utc>,
    pub total_files: usize,
    pub total_records: usize,
    /// Indexed paths whose file was missing when the pass started.
    pub orphan_records: Vec<String>,
    /// Files on disk with no index record. Never deleted.
    pub orphan_files: Vec<String>,
    pub cleaned_records: usize,
    /// Tasks still referencing an artifact that no longer exists.
    pub orphan_tasks: i64,
    pub errors: Vec<String>,
}

/// Counters accumulated across passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilerStats {
    pub total_checks: u64,
    pub orphan_records_found: u64,
    pub orphan_files_found: u64,
    pub cleanup_operations: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilerStatus {
    pub running: bool,
    pub artifact_dir: PathBuf,
    pub interval_secs: u64,
    pub last_check_time: Option<DateTime<Utc>>,
    pub stats: ReconcilerStats,
}

#[derive(Default)]
struct State {
    stats: ReconcilerStats,
    last_check_time: Option<DateTime<Utc>>,
    running: bool,
}

pub struct ConsistencyReconciler {
    db: Database,
    artifact_dir: PathBuf,
    extensions: Vec<String>,
    interval: Duration,
    state: Mutex<State>,
    /// Serializes timer passes and forced passes.
    pass_lock: tokio::sync::Mutex<()>,
}

impl ConsistencyReconciler {
    pub fn new(
        db: Database,
        artifact_dir: impl Into<PathBuf>,
        extensions: &[String],
        interval: Duration,
    ) -> Self {
        Self {
            db,
            artifact_dir: artifact_dir.into(),
            extensions: normalize_extensions(extensions),
            interval,
            state: Mutex::new(State::default()),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(db: Database, config: &SyncConfig) -> Self {
        Self::new(
            db,
            &config.artifact_dir,
            &config.extensions,
            config.consistency_check.interval(),
        )
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one full pass.
    ///
    /// Fails without touching any record if either the directory or the
    /// index cannot be enumerated. Failures cleaning a single orphan are
    /// collected into the report and the pass continues.
    pub async fn run_once(&self) -> Result<ReconcileReport, LifetraceError> {
        let _guard = self.pass_lock.lock().await;
        let checked_at = Utc::now();
        {
            let mut state = self.state();
            state.stats.total_checks += 1;
            state.last_check_time = Some(checked_at);
        }

        let enumerated = self.enumerate().await;
        let (files, records) = match enumerated {
            Ok(sets) => sets,
            Err(e) => {
                self.state().stats.errors += 1;
                return Err(e);
            }
        };

        let orphan_records: Vec<String> = records.difference(&files).cloned().collect();
        let orphan_files: Vec<String> = files.difference(&records).cloned().collect();

        let mut report = ReconcileReport {
            checked_at,
            total_files: files.len(),
            total_records: records.len(),
            orphan_records,
            orphan_files,
            ..ReconcileReport::default()
        };

        for path in &report.orphan_records {
            match self.clean_orphan(path).await {
                Ok(true) => report.cleaned_records += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(path = %path, error = %e, "failed to clean orphan record");
                    report.errors.push(format!("{path}: {e}"));
                }
            }
        }

        match tasks::count_orphan_tasks(&self.db).await {
            Ok(n) => report.orphan_tasks = n,
            Err(e) => {
                warn!(error = %e, "failed to count orphan tasks");
                report.errors.push(format!("orphan task count: {e}"));
            }
        }

        self.log_report(&report);
        {
            let mut state = self.state();
            state.stats.orphan_records_found += report.orphan_records.len() as u64;
            state.stats.orphan_files_found += report.orphan_files.len() as u64;
            state.stats.cleanup_operations += report.cleaned_records as u64;
            state.stats.errors += report.errors.len() as u64;
        }
        Ok(report)
    }

    /// Caller-triggered pass, outside the timer.
    pub async fn force_check(&self) -> Result<ReconcileReport, LifetraceError> {
        info!(dir = %self.artifact_dir.display(), "forced consistency check");
        self.run_once().await
    }

    pub fn status(&self) -> ReconcilerStatus {
        let state = self.state();
        ReconcilerStatus {
            running: state.running,
            artifact_dir: self.artifact_dir.clone(),
            interval_secs: self.interval.as_secs(),
            last_check_time: state.last_check_time,
            stats: state.stats,
        }
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.state().stats
    }

    /// Spawn the timer loop. The first pass runs immediately.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        self.state().running = true;
        info!(
            dir = %self.artifact_dir.display(),
            interval_secs = self.interval.as_secs(),
            "consistency reconciler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "consistency pass aborted; records left untouched");
                    }
                }
            }
        }
        self.state().running = false;
        info!("consistency reconciler stopped");
    }

    /// File set and record set, or an error if either is unavailable.
    async fn enumerate(&self) -> Result<(BTreeSet<String>, BTreeSet<String>), LifetraceError> {
        let dir = self.artifact_dir.clone();
        let extensions = self.extensions.clone();
        let files = tokio::task::spawn_blocking(move || list_artifact_files(&dir, &extensions))
            .await
            .map_err(|e| LifetraceError::Internal(format!("directory scan panicked: {e}")))??;

        let records = artifacts::list_artifact_paths(&self.db)
            .await
            .map_err(|e| LifetraceError::Reconcile(format!("cannot enumerate artifact index: {e}")))?
            .into_iter()
            .collect();
        Ok((files, records))
    }

    /// Remove one orphan unless its file reappeared since enumeration.
    async fn clean_orphan(&self, path: &str) -> Result<bool, LifetraceError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|e| LifetraceError::Reconcile(format!("cannot stat {path}: {e}")))?;
        if exists {
            debug!(path, "file reappeared; keeping record");
            return Ok(false);
        }
        Ok(cleanup_artifact(&self.db, path).await?.is_some())
    }

    fn log_report(&self, report: &ReconcileReport) {
        for path in report.orphan_files.iter().take(MAX_LOGGED_ORPHAN_FILES) {
            warn!(path = %path, "file has no index record");
        }
        if report.orphan_files.len() > MAX_LOGGED_ORPHAN_FILES {
            warn!(
                more = report.orphan_files.len() - MAX_LOGGED_ORPHAN_FILES,
                "further unindexed files omitted"
            );
        }
        if report.orphan_tasks > 0 {
            warn!(count = report.orphan_tasks, "tasks reference missing artifacts");
        }
        info!(
            files = report.total_files,
            records = report.total_records,
            orphan_records = report.orphan_records.len(),
            orphan_files = report.orphan_files.len(),
            cleaned = report.cleaned_records,
            errors = report.errors.len(),
            "consistency pass complete"
        );
    }
}

/// Regular files directly inside `dir` whose extension is recognized.
fn list_artifact_files(dir: &Path, extensions: &[String]) -> Result<BTreeSet<String>, LifetraceError> {
    let unreadable = |e: std::io::Error| {
        LifetraceError::Reconcile(format!("cannot read artifact directory {}: {e}", dir.display()))
    };
    let mut files = BTreeSet::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        if entry.file_type().map_err(unreadable)?.is_file() && is_artifact_path(&path, extensions) {
            files.insert(path.to_string_lossy().into_owned());
        }
    }
    Ok(files)
}
