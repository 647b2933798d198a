//! The secret store used for provider API keys.
//!
//! Two modes:
//! - raw: values are stored as given; encrypt and decrypt are identity
//! - keyed: a key derived from the user's password encrypts every value
//!
//! Keyed mode persists a [`CryptoInfo`] holding the salt and an encrypted
//! known text, so a later unlock can tell a wrong password from a right one
//! before any real secret is touched.

use parley_config::{KdfConfig, SecretMode};
use parley_core::{ChatError, ChatStore, DecryptionError, SecretStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::cipher::{decrypt_text, encrypt_text};
use crate::kdf::{KdfParams, decode_salt, derive_key, generate_salt};

/// Encrypted under the derived key at setup, checked on every unlock.
pub const VERIFICATION_TEXT: &str = "Domo, Domino DESU.";

/// Key/value location of the persisted [`CryptoInfo`].
pub const CRYPTO_INFO_CATEGORY: &str = "generic";
pub const CRYPTO_INFO_KEY: &str = "crypto-info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CryptoInfo {
    Raw,
    Encrypted {
        salt: String,
        verification: String,
        kdf: KdfParams,
    },
}

pub struct SecretVault {
    key: Option<Zeroizing<[u8; 32]>>,
}

impl SecretVault {
    pub fn raw() -> Self {
        Self { key: None }
    }

    pub fn is_raw(&self) -> bool {
        self.key.is_none()
    }

    /// First-time setup of keyed mode: fresh salt, derived key and an
    /// encrypted verification text.
    pub fn setup(password: &str, params: &KdfParams) -> Result<(Self, CryptoInfo), DecryptionError> {
        let salt = generate_salt();
        let key = derive_key(password.as_bytes(), &decode_salt(&salt)?, params)?;
        let verification = encrypt_text(&key, VERIFICATION_TEXT)?;
        info!("Secret store initialised in password mode");
        Ok((
            Self { key: Some(key) },
            CryptoInfo::Encrypted { salt, verification, kdf: params.clone() },
        ))
    }

    /// Unlock a previously set-up store. A password that does not decrypt
    /// the verification text is [`DecryptionError::BadPassword`].
    pub fn unlock(info: &CryptoInfo, password: Option<&str>) -> Result<Self, DecryptionError> {
        let CryptoInfo::Encrypted { salt, verification, kdf } = info else {
            return Ok(Self::raw());
        };
        let password = password.ok_or(DecryptionError::PasswordRequired)?;
        let key = derive_key(password.as_bytes(), &decode_salt(salt)?, kdf)?;
        match decrypt_text(&key, verification) {
            Ok(text) if text == VERIFICATION_TEXT => {
                debug!("Secret store unlocked");
                Ok(Self { key: Some(key) })
            }
            Ok(_) | Err(DecryptionError::BadPassword) => Err(DecryptionError::BadPassword),
            Err(other) => Err(other),
        }
    }
}

impl SecretStore for SecretVault {
    fn encrypt(&self, plaintext: &str) -> Result<String, DecryptionError> {
        match &self.key {
            Some(key) if !plaintext.is_empty() => encrypt_text(key, plaintext),
            _ => Ok(plaintext.to_string()),
        }
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptionError> {
        match &self.key {
            Some(key) if !ciphertext.is_empty() => decrypt_text(key, ciphertext),
            _ => Ok(ciphertext.to_string()),
        }
    }
}

pub async fn load_crypto_info(store: &dyn ChatStore) -> anyhow::Result<Option<CryptoInfo>> {
    match store.get_kv(CRYPTO_INFO_CATEGORY, CRYPTO_INFO_KEY).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn save_crypto_info(store: &dyn ChatStore, info: &CryptoInfo) -> anyhow::Result<()> {
    store
        .put_kv(CRYPTO_INFO_CATEGORY, CRYPTO_INFO_KEY, serde_json::to_value(info)?)
        .await
}

/// Open the vault for `store`, setting it up on first use.
///
/// The mode recorded in the store wins over `mode`; `mode` and `kdf` only
/// apply to a store that has never been set up.
pub async fn open_vault(
    store: &dyn ChatStore,
    mode: SecretMode,
    kdf: &KdfConfig,
    password: Option<&str>,
) -> Result<SecretVault, ChatError> {
    if let Some(info) = load_crypto_info(store).await.map_err(ChatError::Storage)? {
        return Ok(SecretVault::unlock(&info, password)?);
    }

    let (vault, info) = match mode {
        SecretMode::Raw => (SecretVault::raw(), CryptoInfo::Raw),
        SecretMode::Password => {
            let password = password.ok_or(DecryptionError::PasswordRequired)?;
            SecretVault::setup(password, &KdfParams::from(kdf))?
        }
    };
    save_crypto_info(store, &info).await.map_err(ChatError::Storage)?;
    Ok(vault)
}
