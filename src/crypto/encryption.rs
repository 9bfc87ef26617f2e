//! # Identity-Mapping Encryption
//!
//! AES-256-GCM sealing of the `fingerprint:pseudonym_id` link under a role
//! key.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    MAPPING ENCRYPTION FLOW                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  plaintext  = fingerprint ":" pseudonym_id                             │
//! │  aes_key    = SHA-256(role_key_data)                                   │
//! │  nonce      = 12 random bytes (never reused with the same key)         │
//! │  ciphertext = nonce ‖ AES-256-GCM(aes_key, nonce, plaintext)           │
//! │                                                                         │
//! │  Decryption under any other key fails the GCM tag check and returns    │
//! │  DecryptionMismatch — no partial data. This fail-closed property IS    │
//! │  the scope-isolation mechanism: a self_correlation key cannot open a   │
//! │  correlation mapping and vice versa, with no key-identifying header    │
//! │  on the ciphertext.                                                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

fn cipher_for(key_data: &[u8]) -> Result<Aes256Gcm> {
    // Hash the role key down to the AES key so any key-data length binds to
    // a full 256-bit cipher key.
    let key = Sha256::digest(key_data);
    Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::EncryptionFailed(format!("invalid cipher key: {}", e)))
}

/// Seal a `fingerprint:pseudonym_id` mapping under a role key.
///
/// Returns the packed `nonce ‖ ciphertext ‖ tag` blob stored in the
/// `encrypted_real_identity` column.
pub fn encrypt_identity_mapping(
    fingerprint: &str,
    pseudonym_id: &str,
    key_data: &[u8],
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key_data)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let plaintext = format!("{}:{}", fingerprint, pseudonym_id);
    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|e| Error::EncryptionFailed(format!("sealing failed: {}", e)))?;

    let mut packed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    packed.extend_from_slice(&nonce);
    packed.extend_from_slice(&ciphertext);
    Ok(packed)
}

/// Open a sealed mapping, returning `(fingerprint, pseudonym_id)`.
///
/// Fails closed with [`Error::DecryptionMismatch`] whenever the key does not
/// match the one that sealed the blob. Callers resolving a pseudonym are
/// expected to try each candidate mapping in turn and treat this error as
/// "not my scope", not as corruption.
pub fn decrypt_identity_mapping(ciphertext: &[u8], key_data: &[u8]) -> Result<(String, String)> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(Error::DecryptionMismatch);
    }
    let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

    let cipher = cipher_for(key_data)?;
    let plaintext = cipher
        .decrypt(AesNonce::from_slice(nonce), sealed)
        .map_err(|_| Error::DecryptionMismatch)?;

    let plaintext = String::from_utf8(plaintext)
        .map_err(|_| Error::StorageCorrupted("mapping plaintext is not UTF-8".into()))?;

    match plaintext.split_once(':') {
        Some((fingerprint, pseudonym_id)) if !fingerprint.is_empty() && !pseudonym_id.is_empty() => {
            Ok((fingerprint.to_string(), pseudonym_id.to_string()))
        }
        _ => Err(Error::StorageCorrupted(
            "decrypted mapping has invalid format".into(),
        )),
    }
}

// ============================================================================
// TESTS
// ============================================================================
