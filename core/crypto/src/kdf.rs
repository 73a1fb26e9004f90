//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! The algorithm and hash are fixed; only the iteration count and salt vary
//! between records. Parameters read back from storage are validated on
//! parse, so a record with an unknown algorithm or a weakened iteration
//! count never reaches the derivation code.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{Salt, SessionKey, KEY_LENGTH};
use passbox_common::{Error, Result};

/// Lowest iteration count accepted for new or stored records.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Iteration count used for new records unless configured otherwise.
pub const DEFAULT_ITERATIONS: u32 = 310_000;

/// Password-based key derivation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfAlgorithm {
    #[serde(rename = "PBKDF2")]
    Pbkdf2,
}

/// Hash function used inside the KDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfHash {
    #[serde(rename = "SHA-256")]
    Sha256,
}

/// Parameters for PBKDF2 key derivation.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "KdfParamsRepr")]
pub struct KdfParams {
    algorithm: KdfAlgorithm,
    hash: KdfHash,
    iterations: u32,
    #[serde(rename = "salt_b64")]
    salt: Salt,
}

#[derive(Deserialize)]
struct KdfParamsRepr {
    algorithm: KdfAlgorithm,
    hash: KdfHash,
    iterations: u32,
    salt_b64: Salt,
}

impl TryFrom<KdfParamsRepr> for KdfParams {
    type Error = Error;

    fn try_from(repr: KdfParamsRepr) -> Result<Self> {
        check_iterations(repr.iterations)?;
        Ok(Self {
            algorithm: repr.algorithm,
            hash: repr.hash,
            iterations: repr.iterations,
            salt: repr.salt_b64,
        })
    }
}

impl KdfParams {
    /// Create parameters with a freshly generated salt.
    ///
    /// # Errors
    /// - Returns error if `iterations` is below [`MIN_ITERATIONS`]
    pub fn generate(iterations: u32) -> Result<Self> {
        Self::with_salt(iterations, Salt::generate())
    }

    /// Create parameters with a caller-provided salt.
    ///
    /// # Errors
    /// - Returns error if `iterations` is below [`MIN_ITERATIONS`]
    pub fn with_salt(iterations: u32, salt: Salt) -> Result<Self> {
        check_iterations(iterations)?;
        Ok(Self {
            algorithm: KdfAlgorithm::Pbkdf2,
            hash: KdfHash::Sha256,
            iterations,
            salt,
        })
    }

    pub fn algorithm(&self) -> KdfAlgorithm {
        self.algorithm
    }

    pub fn hash(&self) -> KdfHash {
        self.hash
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn salt(&self) -> &Salt {
        &self.salt
    }
}

pub(crate) fn check_iterations(iterations: u32) -> Result<()> {
    if iterations < MIN_ITERATIONS {
        return Err(Error::Crypto(format!(
            "KDF iteration count {} is below the minimum of {}",
            iterations, MIN_ITERATIONS
        )));
    }
    Ok(())
}

/// Derive a session key from a password.
///
/// # Preconditions
/// - `password` must not be empty
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - Returns error if password is empty
///
/// # Security
/// - Password is not stored or logged
/// - The intermediate buffer is zeroized after the key is built
pub fn derive_key(password: &[u8], params: &KdfParams) -> Result<SessionKey> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let mut key_bytes = [0u8; KEY_LENGTH];
    match (params.algorithm, params.hash) {
        (KdfAlgorithm::Pbkdf2, KdfHash::Sha256) => {
            pbkdf2_hmac::<Sha256>(
                password,
                params.salt.as_bytes(),
                params.iterations,
                &mut key_bytes,
            );
        }
    }

    let key = SessionKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
