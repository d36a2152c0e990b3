//! AES cipher wrapper with hex-string keys.
//!
//! One mode, used everywhere: AES-128-GCM with a random nonce. The blob
//! layout is `nonce(12) || ciphertext+tag`, so a blob decrypts with the
//! key alone. Keys arrive as hex strings and must decode to at least 16
//! bytes of valid hexadecimal; the first 16 decoded bytes key the cipher.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};

use crate::rand::random_array;

/// AES-128 key size in bytes.
pub const KEY_LEN: usize = 16;
/// GCM nonce size in bytes.
pub const NONCE_LEN: usize = 12;
/// Minimum hex characters a key string must carry.
pub const MIN_HEX_KEY_LEN: usize = KEY_LEN * 2;

/// Error type for cipher operations.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key must be at least 32 hex characters")]
    KeyTooShort,
    #[error("key contains invalid hex")]
    KeyNotHex,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed")]
    DecryptFailed,
    #[error("invalid blob: too short")]
    InvalidBlob,
    #[error("RNG failed")]
    Rng,
}

fn cipher_for(hex_key: &str) -> Result<Aes128Gcm, CryptoError> {
    if hex_key.len() < MIN_HEX_KEY_LEN {
        return Err(CryptoError::KeyTooShort);
    }
    let bytes = hex::decode(hex_key).map_err(|_| CryptoError::KeyNotHex)?;
    Aes128Gcm::new_from_slice(&bytes[..KEY_LEN]).map_err(|_| CryptoError::KeyTooShort)
}

/// Encrypt `plain` under the given hex key.
///
/// Returns `nonce(12) || ciphertext+tag`. Fails without partial output if
/// the key string is too short or not valid hex.
pub fn encrypt(plain: &[u8], hex_key: &str) -> Result<Vec<u8>, CryptoError> {
    let aead = cipher_for(hex_key)?;
    let nonce = random_array::<NONCE_LEN>()?;

    let ct = aead
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|_| CryptoError::EncryptFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`] under the given hex key.
///
/// Expects `nonce(12) || ciphertext+tag`.
pub fn decrypt(blob: &[u8], hex_key: &str) -> Result<Vec<u8>, CryptoError> {
    let aead = cipher_for(hex_key)?;
    if blob.len() < NONCE_LEN {
        return Err(CryptoError::InvalidBlob);
    }
    let (nonce, ct) = blob.split_at(NONCE_LEN);
    aead.decrypt(Nonce::from_slice(nonce), ct)
        .map_err(|_| CryptoError::DecryptFailed)
}
