//! `parley-security`: encryption at rest for provider API keys.

pub mod cipher;
pub mod kdf;
pub mod vault;

pub use kdf::KdfParams;
pub use vault::{
    CRYPTO_INFO_CATEGORY, CRYPTO_INFO_KEY, CryptoInfo, SecretVault, VERIFICATION_TEXT,
    load_crypto_info, open_vault, save_crypto_info,
};
