//! Byte-level archive transforms: zstd compression and AES-256-GCM encryption.
//!
//! Encrypted payloads are laid out as `nonce (12 bytes) || ciphertext || tag`.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::BackupError;

const ZSTD_LEVEL: i32 = 3;
const NONCE_LEN: usize = 12;

pub fn compress(data: &[u8]) -> Result<Vec<u8>, BackupError> {
    zstd::encode_all(data, ZSTD_LEVEL).map_err(|e| BackupError::Compression(e.to_string()))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, BackupError> {
    zstd::decode_all(data).map_err(|e| BackupError::Decompression(e.to_string()))
}

/// 256-bit archive key.
#[derive(Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Builds a key from the configured secret.
    ///
    /// 64 hex characters are taken as the raw key; anything else is treated as
    /// a passphrase and hashed with SHA-256.
    pub fn from_secret(secret: Option<&str>) -> Result<Self, BackupError> {
        let secret = secret
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(BackupError::EncryptionKeyMissing)?;

        let mut key = [0u8; 32];
        if secret.len() == 64 && secret.bytes().all(|b| b.is_ascii_hexdigit()) {
            hex::decode_to_slice(secret, &mut key)
                .map_err(|e| BackupError::InvalidEncryptionKey(e.to_string()))?;
        } else {
            key.copy_from_slice(&Sha256::digest(secret.as_bytes()));
        }
        Ok(Self(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

pub fn encrypt(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, BackupError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), data)
        .map_err(|e| BackupError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn decrypt(data: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, BackupError> {
    if data.len() < NONCE_LEN {
        return Err(BackupError::Decryption(format!(
            "payload is {} bytes, shorter than the nonce",
            data.len()
        )));
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| BackupError::Decryption("authentication failed".to_owned()))
}
