//! Argon2id key derivation for password → encryption key.

use argon2::Argon2;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parley_config::KdfConfig;
use parley_core::DecryptionError;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Argon2id parameters, stored next to the salt so a later unlock derives
/// the same key even if the settings file changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::from(&KdfConfig::default())
    }
}

impl From<&KdfConfig> for KdfParams {
    fn from(cfg: &KdfConfig) -> Self {
        Self { m_cost: cfg.memory_kib, t_cost: cfg.iterations, p_cost: cfg.parallelism }
    }
}

/// Derive a 256-bit key from a password and salt.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, DecryptionError> {
    let argon2_params = argon2::Params::new(params.m_cost, params.t_cost, params.p_cost, Some(32))
        .map_err(|e| DecryptionError::Cipher(format!("invalid KDF params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, argon2_params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, output.as_mut())
        .map_err(|e| DecryptionError::Cipher(format!("KDF failed: {e}")))?;
    Ok(output)
}

/// Random 16-byte salt, base64-encoded.
pub fn generate_salt() -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    STANDARD.encode(salt)
}

pub fn decode_salt(b64: &str) -> Result<Vec<u8>, DecryptionError> {
    STANDARD
        .decode(b64)
        .map_err(|e| DecryptionError::Corrupted(format!("salt: {e}")))
}
