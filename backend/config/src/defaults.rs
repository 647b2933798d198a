//! Default values for application settings.

/// Default log level when neither the config file nor the environment sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Database file name inside the config directory.
pub const DEFAULT_DB_FILE: &str = "parley.db";

/// Log directory name inside the config directory.
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Script operations a single hook call may perform.
pub const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;

/// Maximum script call-stack depth.
pub const DEFAULT_MAX_CALL_LEVELS: usize = 64;

/// Maximum script string length, in bytes.
pub const DEFAULT_MAX_STRING_SIZE: usize = 1024 * 1024;

pub const DEFAULT_MAX_ARRAY_SIZE: usize = 10_000;

pub const DEFAULT_MAX_MAP_SIZE: usize = 10_000;

/// Argon2 memory cost, KiB.
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 19 * 1024;

pub const DEFAULT_KDF_ITERATIONS: u32 = 2;

pub const DEFAULT_KDF_PARALLELISM: u32 = 1;

/// Appended to an assistant reply whose provider call was cancelled.
pub const DEFAULT_INTERRUPTION_MARKER: &str = "\n\n(interrupted)";
