//! Cryptographic primitives for PassBox.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256
//! - Authenticated encryption using AES-256-GCM
//! - Master-password records (salted KDF parameters plus an encrypted validator)
//! - The [`CipherCore`] facade used by vault sessions
//!
//! # Security Guarantees
//! - Session keys are zeroized on drop and never serialized
//! - No plaintext or key material is ever logged
//! - Validator plaintext is compared in constant time

pub mod aead;
pub mod cipher;
pub mod encoding;
pub mod kdf;
pub mod keys;
pub mod master;

pub use aead::{decrypt, encrypt, EncryptedPayload, NONCE_SIZE, TAG_SIZE};
pub use cipher::CipherCore;
pub use kdf::{derive_key, KdfAlgorithm, KdfHash, KdfParams, DEFAULT_ITERATIONS, MIN_ITERATIONS};
pub use keys::{Salt, SessionKey, KEY_LENGTH, SALT_LENGTH};
pub use master::{MasterPasswordRecord, VALIDATION_PLAINTEXT};
