//! The persisted vault envelope.
//!
//! One envelope per user is the unit of persistence. It is stored as JSON:
//!
//! ```text
//! { "master": { "kdf": {...}, "validator": { "nonce_b64", "ciphertext_b64" } },
//!   "vault": null | { "nonce_b64", "ciphertext_b64", "version", "ownerId", "updatedAt" },
//!   "config": { "inactivityTimeoutMs" } }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{VaultConfig, SCHEMA_VERSION};
use passbox_common::{Error, Result, UserId};
use passbox_crypto::{EncryptedPayload, MasterPasswordRecord};

/// The encrypted credential set plus its metadata.
///
/// Replaced wholesale on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedVaultRecord {
    #[serde(flatten)]
    pub payload: EncryptedPayload,
    pub version: u32,
    #[serde(rename = "ownerId")]
    pub owner_id: UserId,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl EncryptedVaultRecord {
    /// Refuse records this build must not interpret.
    ///
    /// # Errors
    /// - [`Error::UnsupportedVersion`] for any version other than [`SCHEMA_VERSION`]
    /// - [`Error::Integrity`] if the record belongs to a different user
    pub fn ensure_readable_by(&self, user: &UserId) -> Result<()> {
        if self.version != SCHEMA_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        if &self.owner_id != user {
            return Err(Error::Integrity(
                "Vault record belongs to a different user".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything persisted for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEnvelope {
    pub master: MasterPasswordRecord,
    #[serde(default)]
    pub vault: Option<EncryptedVaultRecord>,
    pub config: VaultConfig,
}

impl VaultEnvelope {
    /// A freshly configured, empty vault.
    pub fn new(master: MasterPasswordRecord, config: VaultConfig) -> Self {
        Self {
            master,
            vault: None,
            config,
        }
    }

    /// Serialize to bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}
