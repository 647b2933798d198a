//! XChaCha20-Poly1305 over text.
//!
//! Ciphertext format: `base64(nonce):base64(ciphertext + tag)`.

#[allow(deprecated)] // upstream generic-array 0.x deprecation
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parley_core::DecryptionError;
use rand::RngCore;

const NONCE_LEN: usize = 24;

#[allow(deprecated)]
pub fn encrypt_text(key: &[u8; 32], plaintext: &str) -> Result<String, DecryptionError> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| DecryptionError::Cipher(e.to_string()))?;

    Ok(format!("{}:{}", STANDARD.encode(nonce_bytes), STANDARD.encode(ciphertext)))
}

/// Authentication failure means the key is wrong (or the data was
/// tampered with) and is reported as [`DecryptionError::BadPassword`].
#[allow(deprecated)]
pub fn decrypt_text(key: &[u8; 32], encoded: &str) -> Result<String, DecryptionError> {
    let (nonce_b64, ct_b64) = encoded
        .split_once(':')
        .ok_or_else(|| DecryptionError::Corrupted("expected nonce:ciphertext".into()))?;
    let nonce_bytes = STANDARD
        .decode(nonce_b64)
        .map_err(|e| DecryptionError::Corrupted(format!("nonce: {e}")))?;
    let ciphertext = STANDARD
        .decode(ct_b64)
        .map_err(|e| DecryptionError::Corrupted(format!("ciphertext: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(DecryptionError::Corrupted(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce_bytes.len()
        )));
    }

    let cipher = XChaCha20Poly1305::new(key.into());
    let plaintext = cipher
        .decrypt(XNonce::from_slice(&nonce_bytes), ciphertext.as_slice())
        .map_err(|_| DecryptionError::BadPassword)?;
    String::from_utf8(plaintext).map_err(|e| DecryptionError::Corrupted(e.to_string()))
}
