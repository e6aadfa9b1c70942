// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Lookup order: `/etc/lifetrace/lifetrace.toml`, then
//! `~/.config/lifetrace/lifetrace.toml`, then `./lifetrace.toml`, with
//! `LIFETRACE_*` environment variables applied last.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::LifetraceConfig;

/// Nested sections first so that `sync_file_monitor_debounce_ms` is not
/// claimed by the shorter `sync_` prefix.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("heartbeat_log_rotation_", "heartbeat.log_rotation."),
    ("sync_consistency_check_", "sync.consistency_check."),
    ("sync_file_monitor_", "sync.file_monitor."),
    ("worker_retry_", "worker.retry."),
    ("logging_", "logging."),
    ("storage_", "storage."),
    ("heartbeat_", "heartbeat."),
    ("supervisor_", "supervisor."),
    ("sync_", "sync."),
    ("worker_", "worker."),
];

/// Config files consulted by [`load_config`], lowest precedence first.
pub fn config_file_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/lifetrace/lifetrace.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("lifetrace/lifetrace.toml"));
    }
    paths.push(PathBuf::from("lifetrace.toml"));
    paths
}

/// Load configuration from the standard XDG hierarchy with env var overrides.
pub fn load_config() -> Result<LifetraceConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no file lookup, no env).
pub fn load_config_from_str(toml_content: &str) -> Result<LifetraceConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LifetraceConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<LifetraceConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LifetraceConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used for hierarchy loading, before extraction.
pub fn build_figment() -> Figment {
    config_file_paths()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(LifetraceConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Map a lowercased, prefix-stripped env var name onto a dotted config key.
///
/// Uses an explicit section table instead of `Env::split("_")` because most
/// keys contain underscores themselves.
pub fn env_key_to_path(key: &str) -> String {
    ENV_SECTIONS
        .iter()
        .find_map(|(prefix, section)| {
            key.strip_prefix(prefix)
                .map(|rest| format!("{section}{rest}"))
        })
        .unwrap_or_else(|| key.to_string())
}

fn env_provider() -> Env {
    Env::prefixed("LIFETRACE_").map(|key| env_key_to_path(key.as_str()).into())
}
