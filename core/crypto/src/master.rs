//! Master-password records.
//!
//! A record stores the KDF parameters plus a validator: a fixed constant
//! encrypted under the derived key. Unlocking re-derives the key and checks
//! that the validator decrypts back to the constant, so the password itself
//! is never stored.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::aead::{decrypt, encrypt, EncryptedPayload};
use crate::kdf::{derive_key, KdfParams};
use crate::keys::SessionKey;
use passbox_common::Result;

/// Plaintext sealed into every validator.
pub const VALIDATION_PLAINTEXT: &[u8] = b"PASSBOX_MASTER_PASSWORD_VALID";

/// Persisted proof-of-password for one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterPasswordRecord {
    kdf: KdfParams,
    validator: EncryptedPayload,
}

impl MasterPasswordRecord {
    /// Create a record for `password` using a fresh salt.
    ///
    /// # Errors
    /// - Password empty
    /// - `iterations` below the KDF minimum
    pub fn create(password: &[u8], iterations: u32) -> Result<Self> {
        let kdf = KdfParams::generate(iterations)?;
        let key = derive_key(password, &kdf)?;
        let validator = encrypt(&key, VALIDATION_PLAINTEXT)?;

        debug!(iterations, "Created master password record");
        Ok(Self { kdf, validator })
    }

    /// Re-derive the key for `password` and check it against the validator.
    ///
    /// Returns the key only when the validator authenticates and decrypts to
    /// [`VALIDATION_PLAINTEXT`]. Wrong passwords, tampered validators and
    /// empty passwords all yield `None`.
    pub fn verify(&self, password: &[u8]) -> Option<SessionKey> {
        let key = derive_key(password, &self.kdf).ok()?;
        let plaintext = decrypt(&key, &self.validator).ok()?;

        if bool::from(plaintext.as_slice().ct_eq(VALIDATION_PLAINTEXT)) {
            Some(key)
        } else {
            None
        }
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn validator(&self) -> &EncryptedPayload {
        &self.validator
    }
}
