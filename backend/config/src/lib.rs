//! `parley-config`: plugin config resolution and application settings.
//!
//! Provides:
//! - Layered plugin config resolution with deep merge of object options
//! - Raw input coercion for config values entered as text
//! - Typed `config.yaml` settings with defaults
//! - Atomic settings writes with backup rotation
//! - Settings validation

pub mod defaults;
pub mod io;
pub mod resolve;
pub mod settings;
pub mod validation;

pub use io::{config_dir, config_file_path, load_config, write_config};
pub use resolve::{check_schema_defaults, coerce_input, deep_merge, effective_config, resolve};
pub use settings::{
    AppConfig, ChatConfig, KdfConfig, LoggingConfig, SandboxConfig, SecretMode, SecretsConfig,
    StorageConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::Result;
use std::path::Path;

/// Env var that overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "PARLEY_LOG";

/// Load settings, apply environment overrides and log validation findings.
///
/// Validation errors are returned as an error; warnings are only logged.
pub async fn load_and_prepare(path: &Path) -> Result<AppConfig> {
    let mut config = load_config(path).await?;

    if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
        if !level.trim().is_empty() {
            config.logging.level = level;
        }
    }

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.into_iter().next() {
        return Err(first.into());
    }

    Ok(config)
}
