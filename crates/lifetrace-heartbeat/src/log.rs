// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable per-service heartbeat log with size-based rotation.
//!
//! Each service appends one JSON heartbeat per line to
//! `<dir>/<service>_heartbeat.log`. Once the file grows past the configured
//! size it is renamed to `<service>_heartbeat_<YYYYmmdd_HHMMSS>.log` and only
//! the newest `max_files` backups are kept.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use lifetrace_config::model::LogRotationConfig;
use lifetrace_core::LifetraceError;
use serde::Serialize;
use tracing::{debug, warn};

use crate::wire::Heartbeat;

/// Lines inspected from the end of a log when looking for the last heartbeat.
const TAIL_LINES: usize = 50;

const ACTIVE_SUFFIX: &str = "_heartbeat.log";

fn io_err(context: String, e: std::io::Error) -> LifetraceError {
    LifetraceError::Transport {
        message: context,
        source: Some(Box::new(e)),
    }
}

/// Size and backups of one service's heartbeat log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogInfo {
    pub file_path: PathBuf,
    pub exists: bool,
    pub size_bytes: u64,
    pub max_size_bytes: u64,
    /// Backup file names, newest first.
    pub backup_files: Vec<String>,
}

pub struct HeartbeatLog {
    dir: PathBuf,
    service: String,
    path: PathBuf,
    rotation: LogRotationConfig,
}

impl HeartbeatLog {
    /// Prepare the log for `service` under `dir`, creating the directory.
    pub fn open(dir: &Path, service: &str, rotation: LogRotationConfig) -> Result<Self, LifetraceError> {
        fs::create_dir_all(dir)
            .map_err(|e| io_err(format!("cannot create heartbeat log dir {}", dir.display()), e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            service: service.to_string(),
            path: dir.join(format!("{service}{ACTIVE_SUFFIX}")),
            rotation,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one heartbeat line, rotating afterwards if the file is too big.
    pub fn append(&mut self, heartbeat: &Heartbeat) -> Result<(), LifetraceError> {
        let mut line = serde_json::to_string(heartbeat).map_err(|e| LifetraceError::Transport {
            message: "cannot serialize heartbeat log line".to_string(),
            source: Some(Box::new(e)),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(format!("cannot open {}", self.path.display()), e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_err(format!("cannot write {}", self.path.display()), e))?;

        if self.rotation.enabled && self.size() > self.rotation.max_size_bytes() {
            self.rotate()?;
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Move the active file aside and prune old backups.
    ///
    /// Returns the backup path, or `None` when there was nothing to rotate.
    pub fn rotate(&mut self) -> Result<Option<PathBuf>, LifetraceError> {
        self.rotate_with_tag("")
    }

    /// Rotate unconditionally under a `reset` backup name.
    pub fn reset(&mut self) -> Result<Option<PathBuf>, LifetraceError> {
        self.rotate_with_tag("reset_")
    }

    fn rotate_with_tag(&mut self, tag: &str) -> Result<Option<PathBuf>, LifetraceError> {
        if !self.path.exists() {
            self.prune_backups();
            return Ok(None);
        }

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = format!("{}_heartbeat_{tag}{stamp}", self.service);
        let mut backup = self.dir.join(format!("{base}.log"));
        let mut n = 1;
        while backup.exists() {
            backup = self.dir.join(format!("{base}_{n}.log"));
            n += 1;
        }

        fs::rename(&self.path, &backup)
            .map_err(|e| io_err(format!("cannot rotate {}", self.path.display()), e))?;
        debug!(service = %self.service, backup = %backup.display(), "heartbeat log rotated");
        self.prune_backups();
        Ok(Some(backup))
    }

    /// Backup files for this service, newest modification first.
    pub fn backups(&self) -> Vec<PathBuf> {
        let prefix = format!("{}_heartbeat_", self.service);
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut backups: Vec<(std::time::SystemTime, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&prefix) && name.ends_with(".log")
            })
            .filter_map(|entry| {
                let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
                Some((modified, entry.path()))
            })
            .collect();
        backups.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        backups.into_iter().map(|(_, path)| path).collect()
    }

    fn prune_backups(&self) {
        for old in self.backups().into_iter().skip(self.rotation.max_files) {
            if let Err(e) = fs::remove_file(&old) {
                warn!(path = %old.display(), error = %e, "failed to delete old heartbeat log");
            }
        }
    }

    pub fn info(&self) -> LogInfo {
        let size_bytes = self.size();
        LogInfo {
            file_path: self.path.clone(),
            exists: self.path.exists(),
            size_bytes,
            max_size_bytes: self.rotation.max_size_bytes(),
            backup_files: self
                .backups()
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .collect(),
        }
    }

    /// Newest parseable heartbeat among the last lines of `path`.
    pub fn last_heartbeat(path: &Path) -> Result<Option<Heartbeat>, LifetraceError> {
        let file = File::open(path).map_err(|e| io_err(format!("cannot read {}", path.display()), e))?;
        let mut tail: std::collections::VecDeque<String> = std::collections::VecDeque::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| io_err(format!("cannot read {}", path.display()), e))?;
            if tail.len() == TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Ok(tail
            .iter()
            .rev()
            .find_map(|line| Heartbeat::decode(line.trim().as_bytes()).ok()))
    }

    /// Last heartbeat of every `*_heartbeat.log` in `dir`, sorted by service.
    pub fn scan_dir(dir: &Path) -> Result<Vec<Heartbeat>, LifetraceError> {
        let entries = fs::read_dir(dir)
            .map_err(|e| io_err(format!("cannot list {}", dir.display()), e))?;
        let mut found = Vec::new();
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(ACTIVE_SUFFIX) {
                continue;
            }
            match Self::last_heartbeat(&entry.path()) {
                Ok(Some(heartbeat)) => found.push(heartbeat),
                Ok(None) => {}
                Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping heartbeat log"),
            }
        }
        found.sort_by(|a, b| a.service.cmp(&b.service));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::HeartbeatPayload;

    fn rotation(max_files: usize) -> LogRotationConfig {
        LogRotationConfig {
            enabled: true,
            max_size_mb: 1,
            max_files,
        }
    }

    fn beat(service: &str, ts: f64) -> Heartbeat {
        Heartbeat {
            service: service.to_string(),
            pid: 7,
            timestamp: ts,
            status: "alive".to_string(),
            data: HeartbeatPayload::default(),
        }
    }

    #[test]
    fn append_and_read_back_last() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HeartbeatLog::open(dir.path(), "ocr", rotation(5)).unwrap();
        for ts in 1..=80 {
            log.append(&beat("ocr", ts as f64)).unwrap();
        }
        // A torn final line is skipped.
        OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap()
            .write_all(b"{\"service\":\"ocr\",\"pi")
            .unwrap();

        let last = HeartbeatLog::last_heartbeat(log.path()).unwrap().unwrap();
        assert_eq!(last.timestamp, 80.0);
        assert!(log.path().ends_with("ocr_heartbeat.log"));
    }

    #[test]
    fn rotation_keeps_newest_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HeartbeatLog::open(dir.path(), "worker", rotation(2)).unwrap();
        for i in 0..4 {
            log.append(&beat("worker", i as f64)).unwrap();
            assert!(log.rotate().unwrap().is_some());
        }
        let info = log.info();
        assert!(!info.exists);
        assert_eq!(info.backup_files.len(), 2);
        assert!(info.backup_files.iter().all(|n| n.starts_with("worker_heartbeat_")));

        // Nothing to rotate once the active file is gone.
        assert!(log.rotate().unwrap().is_none());
    }

    #[test]
    fn reset_uses_reset_tag() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HeartbeatLog::open(dir.path(), "sync", rotation(5)).unwrap();
        log.append(&beat("sync", 1.0)).unwrap();
        let backup = log.reset().unwrap().unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("sync_heartbeat_reset_"));
    }

    #[test]
    fn scan_dir_reports_each_service() {
        let dir = tempfile::tempdir().unwrap();
        for (service, ts) in [("recorder", 10.0), ("ocr", 20.0)] {
            let mut log = HeartbeatLog::open(dir.path(), service, rotation(5)).unwrap();
            log.append(&beat(service, ts - 1.0)).unwrap();
            log.append(&beat(service, ts)).unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let found = HeartbeatLog::scan_dir(dir.path()).unwrap();
        let summary: Vec<_> = found.iter().map(|h| (h.service.as_str(), h.timestamp)).collect();
        assert_eq!(summary, vec![("ocr", 20.0), ("recorder", 10.0)]);
    }

    #[test]
    fn append_rotates_once_size_limit_is_passed() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = HeartbeatLog::open(dir.path(), "ocr", rotation(5)).unwrap();
        let limit = rotation(5).max_size_bytes();
        let bulky = |ts: f64| Heartbeat {
            data: HeartbeatPayload {
                extra: Some("x".repeat(1000)),
                ..HeartbeatPayload::default()
            },
            ..beat("ocr", ts)
        };

        let mut ts = 0.0;
        while log.backups().is_empty() {
            ts += 1.0;
            log.append(&bulky(ts)).unwrap();
            assert!(ts < 5000.0, "log never rotated");
        }
        // The rotated file holds everything up to the append that crossed the limit.
        let backup = &log.backups()[0];
        assert!(fs::metadata(backup).unwrap().len() > limit);
        let last_rotated = HeartbeatLog::last_heartbeat(backup).unwrap().unwrap();
        assert_eq!(last_rotated.timestamp, ts);

        log.append(&bulky(ts + 1.0)).unwrap();
        let info = log.info();
        assert!(info.exists);
        assert!(info.size_bytes < limit);
        assert_eq!(info.backup_files.len(), 1);
        assert_eq!(HeartbeatLog::last_heartbeat(log.path()).unwrap().unwrap().timestamp, ts + 1.0);
    }
}
