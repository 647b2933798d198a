use thiserror::Error;

use crate::schema::ConfigKind;
use crate::types::Stage;

/// Plugin source did not evaluate to a well-formed descriptor.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("plugin source failed to compile: {0}")]
    Compile(String),

    #[error("plugin source failed to evaluate: {0}")]
    Eval(String),

    #[error("malformed plugin descriptor: {0}")]
    Malformed(String),

    #[error("plugin '{0}' is attached but not stored")]
    Missing(String),
}

/// A config layer supplied a value of the wrong kind for a schema entry.
#[derive(Debug, Error)]
#[error("config option '{key}' expects a {expected}, got {found}")]
pub struct ConfigTypeError {
    pub key: String,
    pub expected: ConfigKind,
    pub found: String,
}

/// A hook raised an error; the stage it ran in is aborted.
#[derive(Debug, Error)]
#[error("hook '{hook}' of plugin '{plugin_id}' failed during {stage}: {cause}")]
pub struct HookExecutionError {
    pub plugin_id: String,
    pub hook: String,
    pub stage: Stage,
    pub cause: String,
}

/// Secret store failures. Kept apart from other errors so callers can ask
/// the user to re-enter their password instead of failing hard.
#[derive(Debug, Error)]
pub enum DecryptionError {
    #[error("incorrect password")]
    BadPassword,

    #[error("password required to unlock encrypted secrets")]
    PasswordRequired,

    #[error("corrupted ciphertext: {0}")]
    Corrupted(String),

    #[error("cipher error: {0}")]
    Cipher(String),
}

/// Top-level error for conversation operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    ConfigType(#[from] ConfigTypeError),

    #[error(transparent)]
    HookExecution(#[from] HookExecutionError),

    #[error("provider error: {0}")]
    Provider(anyhow::Error),

    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    #[error("storage error: {0}")]
    Storage(anyhow::Error),

    #[error("a send is already in flight for chat '{0}'")]
    SendInFlight(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("chat '{0}' has no provider configured")]
    ProviderNotConfigured(String),

    #[error("message is empty")]
    EmptyInput,
}

impl ChatError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ChatError::NotFound { kind, id: id.into() }
    }

    /// True when the caller should prompt for the password again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            ChatError::Decryption(DecryptionError::BadPassword | DecryptionError::PasswordRequired)
        )
    }
}
