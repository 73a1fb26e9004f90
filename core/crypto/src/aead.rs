//! Authenticated encryption using AES-256-GCM.
//!
//! Every call to [`encrypt`] draws a fresh 96-bit nonce from the OS entropy
//! source. Nonces are never supplied by callers, so a nonce cannot be reused
//! under one key short of a random collision.

use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm,
};
use serde::{Deserialize, Serialize};

use crate::keys::SessionKey;
use passbox_common::{Error, Result};

/// Nonce size for AES-GCM (12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Output of one encryption call.
///
/// `ciphertext` carries the GCM tag in its last [`TAG_SIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(rename = "nonce_b64", with = "crate::encoding::base64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(rename = "ciphertext_b64", with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
}

/// Encrypt plaintext using AES-256-GCM.
///
/// # Postconditions
/// - The nonce is randomly generated
/// - The ciphertext length is plaintext length + TAG_SIZE
///
/// # Errors
/// - Returns error if encryption fails
pub fn encrypt(key: &SessionKey, plaintext: &[u8]) -> Result<EncryptedPayload> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&nonce);

    Ok(EncryptedPayload {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt a payload using AES-256-GCM.
///
/// # Errors
/// - Returns [`Error::Decryption`] if the ciphertext is shorter than a tag
/// - Returns [`Error::Decryption`] if authentication fails (wrong key or
///   tampered data); both cases are indistinguishable here
pub fn decrypt(key: &SessionKey, payload: &EncryptedPayload) -> Result<Vec<u8>> {
    if payload.ciphertext.len() < TAG_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(
            GenericArray::from_slice(&payload.nonce),
            payload.ciphertext.as_slice(),
        )
        .map_err(|_| Error::Decryption("Authentication tag mismatch".to_string()))
}
