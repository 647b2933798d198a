//! Application settings, stored as `config.yaml` in the config directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Root of `config.yaml`. Every section is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub sandbox: SandboxConfig,
    pub secrets: SecretsConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    /// Directory for the rolling JSON log; defaults to `<config dir>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: DEFAULT_LOG_LEVEL.to_string(), dir: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path; defaults to `<config dir>/parley.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Limits applied to every plugin script evaluation.
/// Zero disables a limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_call_levels: DEFAULT_MAX_CALL_LEVELS,
            max_string_size: DEFAULT_MAX_STRING_SIZE,
            max_array_size: DEFAULT_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_MAX_MAP_SIZE,
        }
    }
}

/// How provider API keys are kept at rest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretMode {
    /// Stored as given.
    #[default]
    Raw,
    /// Encrypted with a key derived from a user password.
    Password,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub mode: SecretMode,
    pub kdf: KdfConfig,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: DEFAULT_KDF_MEMORY_KIB,
            iterations: DEFAULT_KDF_ITERATIONS,
            parallelism: DEFAULT_KDF_PARALLELISM,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub interruption_marker: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { interruption_marker: DEFAULT_INTERRUPTION_MARKER.to_string() }
    }
}

impl AppConfig {
    /// Database path, falling back to the config directory.
    pub fn db_path(&self, config_dir: &Path) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| config_dir.join(DEFAULT_DB_FILE))
    }

    pub fn log_dir(&self, config_dir: &Path) -> PathBuf {
        self.logging
            .dir
            .clone()
            .unwrap_or_else(|| config_dir.join(DEFAULT_LOG_DIR))
    }
}
