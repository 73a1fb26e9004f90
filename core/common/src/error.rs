//! Common error types for PassBox.

use thiserror::Error;

/// Top-level error type for PassBox operations.
///
/// A wrong master password is not an error: verification and unlock report
/// it as `None` / `false`.
#[derive(Debug, Error)]
pub enum Error {
    /// Cryptographic operation failed (bad parameters, key derivation).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Authenticated decryption failed: wrong key or modified ciphertext.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// The stored credential payload did not authenticate under a key that
    /// passed master-password verification.
    #[error("Vault integrity error: {0}")]
    Integrity(String),

    /// A persisted record uses a schema version this build cannot read.
    #[error("Unsupported vault version: {0}")]
    UnsupportedVersion(u32),

    /// Operation requires an unlocked session.
    #[error("Session is locked")]
    SessionLocked,

    /// Operation is not valid in the current session state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Storage collaborator failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Identity collaborator could not supply a user.
    #[error("Identity error: {0}")]
    Identity(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
