//! Vault engine for PassBox.
//!
//! This module provides:
//! - The persisted envelope format and vault configuration
//! - Credential entries and the plaintext credential set
//! - The storage and identity collaborator traits
//! - [`VaultSession`], the lock state machine with inactivity auto-lock
//!
//! # Architecture
//! The session sits between the front end and the storage collaborator. It
//! verifies the master password through `passbox-crypto`, holds the session
//! key only while unlocked and re-encrypts the whole credential set on every
//! mutation.

pub mod config;
pub mod entry;
pub mod envelope;
pub mod identity;
pub mod session;
pub mod storage;
mod watchdog;

pub use config::{
    VaultConfig, DEFAULT_INACTIVITY_TIMEOUT_MS, MASTER_PASSWORD_MIN_LENGTH, SCHEMA_VERSION,
};
pub use entry::{CredentialEntry, EntryInput, EntrySummary};
pub use envelope::{EncryptedVaultRecord, VaultEnvelope};
pub use identity::{IdentityProvider, LocalIdentity};
pub use session::{LockReason, SessionState, SessionStatus, VaultSession};
pub use storage::{BlobVaultStorage, VaultStorage};
