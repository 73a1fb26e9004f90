//! The cipher facade used by vault sessions.

use crate::aead::{self, EncryptedPayload};
use crate::kdf::{check_iterations, DEFAULT_ITERATIONS};
use crate::keys::SessionKey;
use crate::master::MasterPasswordRecord;
use passbox_common::Result;

/// Stateless entry point for every cryptographic operation a vault needs.
///
/// The only configuration is the PBKDF2 iteration count applied to *new*
/// master-password records; verification always uses the count stored in
/// the record being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherCore {
    iterations: u32,
}

impl CipherCore {
    /// Create a cipher using [`DEFAULT_ITERATIONS`].
    pub fn new() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Create a cipher with a custom iteration count for new records.
    ///
    /// # Errors
    /// - Returns error if `iterations` is below the KDF minimum
    pub fn with_iterations(iterations: u32) -> Result<Self> {
        check_iterations(iterations)?;
        Ok(Self { iterations })
    }

    /// Iteration count applied to new records.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Build a fresh master-password record.
    pub fn create_master_password_record(&self, password: &[u8]) -> Result<MasterPasswordRecord> {
        MasterPasswordRecord::create(password, self.iterations)
    }

    /// Verify `password` against `record`, returning the session key on success.
    pub fn verify_master_password(
        &self,
        password: &[u8],
        record: &MasterPasswordRecord,
    ) -> Option<SessionKey> {
        record.verify(password)
    }

    /// Encrypt an arbitrary payload under `key` with a fresh nonce.
    pub fn encrypt_payload(&self, plaintext: &[u8], key: &SessionKey) -> Result<EncryptedPayload> {
        aead::encrypt(key, plaintext)
    }

    /// Decrypt and authenticate a payload under `key`.
    pub fn decrypt_payload(&self, payload: &EncryptedPayload, key: &SessionKey) -> Result<Vec<u8>> {
        aead::decrypt(key, payload)
    }
}

impl Default for CipherCore {
    fn default() -> Self {
        Self::new()
    }
}
