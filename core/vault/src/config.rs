//! Vault configuration and format constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use passbox_common::{Error, Result};

/// Schema version stamped into every encrypted vault record.
pub const SCHEMA_VERSION: u32 = 1;

/// Default inactivity timeout (5 minutes).
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Minimum master password length, in characters, accepted at setup.
pub const MASTER_PASSWORD_MIN_LENGTH: usize = 10;

/// User-adjustable vault settings, persisted inside the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "VaultConfigRepr")]
pub struct VaultConfig {
    inactivity_timeout_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VaultConfigRepr {
    inactivity_timeout_ms: u64,
}

impl TryFrom<VaultConfigRepr> for VaultConfig {
    type Error = Error;

    fn try_from(repr: VaultConfigRepr) -> Result<Self> {
        Self::new(repr.inactivity_timeout_ms)
    }
}

impl VaultConfig {
    /// Create a configuration.
    ///
    /// # Errors
    /// - Returns error if `inactivity_timeout_ms` is zero
    pub fn new(inactivity_timeout_ms: u64) -> Result<Self> {
        if inactivity_timeout_ms == 0 {
            return Err(Error::InvalidInput(
                "Inactivity timeout must be positive".to_string(),
            ));
        }
        Ok(Self {
            inactivity_timeout_ms,
        })
    }

    pub fn inactivity_timeout_ms(&self) -> u64 {
        self.inactivity_timeout_ms
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
        }
    }
}
