//! Blob store trait definition.

use async_trait::async_trait;

use passbox_common::{Result, UserId};

/// Per-user blob storage.
///
/// Each user owns at most one blob. Implementations only promise that a
/// single `write` is atomic: readers see either the previous blob or the new
/// one, never a torn mix. No guarantee spans multiple calls.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read the blob for `user`.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` if a blob exists
    /// - `Ok(None)` if the user has no blob
    async fn read(&self, user: &UserId) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the blob for `user`.
    async fn write(&self, user: &UserId, data: Vec<u8>) -> Result<()>;

    /// Remove the blob for `user`. Removing a missing blob succeeds.
    async fn remove(&self, user: &UserId) -> Result<()>;

    /// Check whether `user` has a blob.
    async fn exists(&self, user: &UserId) -> Result<bool> {
        Ok(self.read(user).await?.is_some())
    }
}
