//! Settings validation with path-addressed messages.

use thiserror::Error;

use crate::settings::{AppConfig, SecretMode};

#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// Everything found in one validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError { path: path.into(), message: message.into() });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError { path: path.into(), message: message.into() });
    }
}

pub fn validate(config: &AppConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_logging(config, &mut report);
    validate_sandbox(config, &mut report);
    validate_secrets(config, &mut report);
    validate_chat(config, &mut report);
    report
}

fn validate_logging(config: &AppConfig, report: &mut ValidationReport) {
    let level = config.logging.level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        report.error(
            "logging.level",
            format!("Unknown log level '{}'. Use trace, debug, info, warn or error", config.logging.level),
        );
    }
}

fn validate_sandbox(config: &AppConfig, report: &mut ValidationReport) {
    let sandbox = &config.sandbox;
    if sandbox.max_call_levels == 0 {
        report.error("sandbox.max_call_levels", "max_call_levels must be >= 1 or no hook can run");
    }
    if sandbox.max_operations == 0 {
        report.warn("sandbox.max_operations", "0 disables the limit; a looping plugin will hang the send");
    }
    for (path, value) in [
        ("sandbox.max_string_size", sandbox.max_string_size),
        ("sandbox.max_array_size", sandbox.max_array_size),
        ("sandbox.max_map_size", sandbox.max_map_size),
    ] {
        if value == 0 {
            report.warn(path, "0 disables the limit");
        }
    }
}

fn validate_secrets(config: &AppConfig, report: &mut ValidationReport) {
    let kdf = &config.secrets.kdf;
    if config.secrets.mode == SecretMode::Raw {
        return;
    }
    if kdf.iterations == 0 {
        report.error("secrets.kdf.iterations", "iterations must be >= 1");
    }
    if kdf.parallelism == 0 {
        report.error("secrets.kdf.parallelism", "parallelism must be >= 1");
    }
    if kdf.memory_kib < 8 * kdf.parallelism.max(1) {
        report.error("secrets.kdf.memory_kib", "memory_kib must be at least 8 × parallelism");
    }
}

fn validate_chat(config: &AppConfig, report: &mut ValidationReport) {
    if config.chat.interruption_marker.trim().is_empty() {
        report.warn(
            "chat.interruption_marker",
            "Empty marker; cancelled replies will be indistinguishable from complete ones",
        );
    }
}
