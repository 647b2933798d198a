//! Structured logging for parley.
//!
//! Console output plus an optional daily-rotated NDJSON file, and a
//! redaction helper for text that may carry API keys.

pub mod logger;
pub mod redact;

pub use logger::{LogGuard, init_logger};
pub use redact::redact_sensitive_data;
