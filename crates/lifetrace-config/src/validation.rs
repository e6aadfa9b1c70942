// SPDX-FileCopyrightText: 2026 LifeTrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as parseable addresses, non-zero pool sizes, and unique service names.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::diagnostic::ConfigError;
use crate::model::LifetraceConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &LifetraceConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.logging.level.to_ascii_lowercase().as_str()) {
        fail(format!(
            "logging.level `{}` must be one of {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        ));
    }

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    let endpoint = config.heartbeat.endpoint();
    if endpoint.parse::<SocketAddr>().is_err() {
        fail(format!(
            "heartbeat.bind_address `{}` is not a valid IP address",
            config.heartbeat.bind_address
        ));
    }

    if !config.heartbeat.interval_secs.is_finite() || config.heartbeat.interval_secs <= 0.0 {
        fail(format!(
            "heartbeat.interval_secs must be a positive number, got {}",
            config.heartbeat.interval_secs
        ));
    }

    if config.heartbeat.port == 0 {
        fail("heartbeat.port must not be 0".to_string());
    }

    if config.heartbeat.timeout_secs == 0 {
        fail("heartbeat.timeout_secs must be greater than 0".to_string());
    } else if (config.heartbeat.timeout_secs as f64) <= config.heartbeat.interval_secs {
        fail(format!(
            "heartbeat.timeout_secs ({}) must exceed heartbeat.interval_secs ({})",
            config.heartbeat.timeout_secs, config.heartbeat.interval_secs
        ));
    }

    if config.heartbeat.log_rotation.enabled && config.heartbeat.log_rotation.max_files == 0 {
        fail("heartbeat.log_rotation.max_files must be at least 1".to_string());
    }

    if config.supervisor.max_restart_attempts == 0 {
        fail("supervisor.max_restart_attempts must be at least 1".to_string());
    }

    if config.supervisor.check_interval_secs == 0 {
        fail("supervisor.check_interval_secs must be greater than 0".to_string());
    }

    let mut names = HashSet::new();
    for (index, service) in config.supervisor.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            fail(format!("supervisor.services[{index}].name must not be empty"));
        } else if !names.insert(service.name.as_str()) {
            fail(format!(
                "supervisor.services: duplicate service name `{}`",
                service.name
            ));
        }
        if service.command.trim().is_empty() {
            fail(format!("supervisor.services[{index}].command must not be empty"));
        }
        if service.heartbeat_timeout_secs == Some(0) {
            fail(format!(
                "supervisor.services[{index}].heartbeat_timeout_secs must be greater than 0"
            ));
        }
    }

    if config.sync.artifact_dir.trim().is_empty() {
        fail("sync.artifact_dir must not be empty".to_string());
    }

    if config.sync.extensions.is_empty() {
        fail("sync.extensions must list at least one extension".to_string());
    }

    if config.sync.consistency_check.enabled && config.sync.consistency_check.interval_secs == 0 {
        fail("sync.consistency_check.interval_secs must be greater than 0".to_string());
    }

    if config.worker.task_kind.trim().is_empty() {
        fail("worker.task_kind must not be empty".to_string());
    }

    if config.worker.workers == 0 {
        fail("worker.workers must be at least 1".to_string());
    }

    if config.worker.batch_size == 0 {
        fail("worker.batch_size must be at least 1".to_string());
    }

    // The sweep runs even with retries disabled; it also recovers stale claims.
    if config.worker.retry.interval_secs == 0 {
        fail("worker.retry.interval_secs must be greater than 0".to_string());
    }

    if config.worker.processor_timeout_secs == 0 {
        fail("worker.processor_timeout_secs must be greater than 0".to_string());
    } else if config.worker.claim_timeout_secs <= config.worker.processor_timeout_secs {
        fail(format!(
            "worker.claim_timeout_secs ({}) must exceed worker.processor_timeout_secs ({})",
            config.worker.claim_timeout_secs, config.worker.processor_timeout_secs
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
