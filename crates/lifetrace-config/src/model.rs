// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the LifeTrace background pipeline.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level LifeTrace configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LifetraceConfig {
    /// Log verbosity.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// SQLite storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// UDP heartbeat channel settings.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Process supervision settings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Artifact directory reconciliation settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Task queue worker settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,

    /// How long a connection waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_database_path() -> String {
    data_dir().join("lifetrace.db").to_string_lossy().to_string()
}

fn default_wal_mode() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Heartbeat sender/receiver configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HeartbeatConfig {
    /// Start the receiver in the supervisor process.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address the receiver binds and senders target.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_heartbeat_port")]
    pub port: u16,

    /// Seconds between heartbeats emitted by a sender.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: f64,

    /// Silence longer than this marks a service as timed out.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_secs: u64,

    /// Upper bound on a single receive wait, so cancellation is observed promptly.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Directory for per-service heartbeat logs. Logs are disabled when unset.
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default)]
    pub log_rotation: LogRotationConfig,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_heartbeat_port(),
            interval_secs: default_heartbeat_interval(),
            timeout_secs: default_heartbeat_timeout(),
            receive_timeout_ms: default_receive_timeout_ms(),
            log_dir: None,
            log_rotation: LogRotationConfig::default(),
        }
    }
}

impl HeartbeatConfig {
    /// `bind_address:port` as a socket address string.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Sender interval. Non-finite or non-positive values fall back to the default.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_heartbeat_interval()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_heartbeat_port() -> u16 {
    9999
}

fn default_heartbeat_interval() -> f64 {
    1.0
}

fn default_heartbeat_timeout() -> u64 {
    30
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

/// Size-based rotation for heartbeat log files.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogRotationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rotate once the active log exceeds this many megabytes.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,

    /// Rotated files kept per service, newest first.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_mb: default_max_size_mb(),
            max_files: default_max_files(),
        }
    }
}

impl LogRotationConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_max_size_mb() -> u64 {
    10
}

fn default_max_files() -> usize {
    5
}

/// Service supervisor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Restarts allowed inside one reset window before a service is parked.
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Pause between terminating a failed service and relaunching it.
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,

    /// Quiet period after which the restart count starts over.
    #[serde(default = "default_reset_window")]
    pub reset_window_secs: u64,

    /// Time a terminated service gets to exit before it is killed.
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,

    /// How long a freshly started service may stay silent.
    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,

    /// Seconds between health checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Services launched and watched by the supervisor.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_restart_attempts: default_max_restart_attempts(),
            restart_delay_secs: default_restart_delay(),
            reset_window_secs: default_reset_window(),
            terminate_grace_secs: default_terminate_grace(),
            startup_grace_secs: default_startup_grace(),
            check_interval_secs: default_check_interval(),
            services: Vec::new(),
        }
    }
}

impl SupervisorConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_window_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_restart_delay() -> u64 {
    5
}

fn default_reset_window() -> u64 {
    3600
}

fn default_terminate_grace() -> u64 {
    5
}

fn default_startup_grace() -> u64 {
    30
}

fn default_check_interval() -> u64 {
    10
}

/// A single supervised service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Name the service reports in its heartbeats.
    /// `lifetrace sync` and `lifetrace worker` take it from `--service-name`.
    pub name: String,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Overrides `heartbeat.timeout_secs` for this service.
    #[serde(default)]
    pub heartbeat_timeout_secs: Option<u64>,

    #[serde(default)]
    pub working_dir: Option<String>,
}

/// Directory/database reconciliation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Directory holding the captured artifact files.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,

    /// File extensions (without the dot, case-insensitive) treated as artifacts.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub consistency_check: ConsistencyCheckConfig,

    #[serde(default)]
    pub file_monitor: FileMonitorConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
            extensions: default_extensions(),
            consistency_check: ConsistencyCheckConfig::default(),
            file_monitor: FileMonitorConfig::default(),
        }
    }
}

fn default_artifact_dir() -> String {
    data_dir().join("screenshots").to_string_lossy().to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConsistencyCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between full reconciliation passes.
    #[serde(default = "default_consistency_interval")]
    pub interval_secs: u64,
}

impl Default for ConsistencyCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_consistency_interval(),
        }
    }
}

impl ConsistencyCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_consistency_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileMonitorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay before a deletion event is acted on.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for FileMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl FileMonitorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_debounce_ms() -> u64 {
    2000
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Task kind this pool claims.
    #[serde(default = "default_task_kind")]
    pub task_kind: String,

    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum tasks claimed per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Sleep between polls when the queue is empty.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Claims not refreshed for this long are returned to pending. A worker
    /// refreshes a claim when it starts the task, so this must exceed
    /// `processor_timeout_secs`.
    #[serde(default = "default_claim_timeout")]
    pub claim_timeout_secs: u64,

    /// External command run for each task, with the artifact path as last argument.
    #[serde(default)]
    pub processor_command: Option<String>,

    #[serde(default)]
    pub processor_args: Vec<String>,

    #[serde(default = "default_processor_timeout")]
    pub processor_timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_kind: default_task_kind(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            idle_poll_ms: default_idle_poll_ms(),
            claim_timeout_secs: default_claim_timeout(),
            processor_command: None,
            processor_args: Vec::new(),
            processor_timeout_secs: default_processor_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_secs(self.claim_timeout_secs)
    }

    pub fn processor_timeout(&self) -> Duration {
        Duration::from_secs(self.processor_timeout_secs)
    }
}

fn default_task_kind() -> String {
    "ocr".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_batch_size() -> usize {
    10
}

fn default_idle_poll_ms() -> u64 {
    1000
}

fn default_claim_timeout() -> u64 {
    600
}

fn default_processor_timeout() -> u64 {
    300
}

/// Periodic re-queue of failed tasks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Failed tasks with this many retries are left alone.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_interval")]
    pub interval_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            interval_secs: default_retry_interval(),
        }
    }
}

impl RetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    1800
}

fn default_true() -> bool {
    true
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("lifetrace"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = LifetraceConfig::default();
        assert_eq!(config.heartbeat.endpoint(), "127.0.0.1:9999");
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(1));
        assert_eq!(config.heartbeat.timeout(), Duration::from_secs(30));
        assert_eq!(config.heartbeat.log_rotation.max_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.supervisor.max_restart_attempts, 3);
        assert_eq!(config.supervisor.restart_delay(), Duration::from_secs(5));
        assert_eq!(config.supervisor.reset_window(), Duration::from_secs(3600));
        assert_eq!(config.sync.consistency_check.interval(), Duration::from_secs(300));
        assert_eq!(config.sync.file_monitor.debounce(), Duration::from_secs(2));
        assert_eq!(config.sync.extensions, vec!["png", "jpg", "jpeg"]);
        assert_eq!(config.worker.workers, 2);
        assert_eq!(config.worker.batch_size, 10);
        assert!(!config.worker.retry.enabled);
    }

    #[test]
    fn bad_interval_falls_back_to_default() {
        let heartbeat = HeartbeatConfig {
            interval_secs: -2.0,
            ..HeartbeatConfig::default()
        };
        assert_eq!(heartbeat.interval(), Duration::from_secs(1));
    }

    #[test]
    fn unknown_service_key_is_rejected() {
        let result: Result<ServiceConfig, _> =
            serde_json::from_str(r#"{"name":"ocr","command":"x","restart":true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_round_trips_through_serialized_provider() {
        let json = serde_json::to_string(&LifetraceConfig::default()).unwrap();
        let parsed: LifetraceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.worker.task_kind, "ocr");
        assert!(parsed.supervisor.services.is_empty());
    }
}
