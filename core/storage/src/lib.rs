//! Blob storage for PassBox.
//!
//! A vault is persisted as one opaque blob per user. This crate provides the
//! [`BlobStore`] trait and two implementations: an in-memory store for tests
//! and a local directory store.
//!
//! # Design Principles
//! - Stores never see plaintext: blobs are already-encrypted envelopes
//! - Async operations: All I/O operations are async
//! - Single-write atomicity only; callers must not assume more

pub mod local;
pub mod memory;
pub mod provider;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use provider::BlobStore;
