//! Storage collaborator: envelope persistence keyed by user.

use async_trait::async_trait;
use tracing::debug;

use crate::envelope::VaultEnvelope;
use passbox_common::{Result, UserId};
use passbox_storage::{BlobStore, MemoryBlobStore};

/// Loads and saves whole envelopes.
///
/// `save` must be atomic for one envelope. Nothing else is guaranteed, and
/// errors are returned to the caller without retries.
#[async_trait]
pub trait VaultStorage: Send + Sync {
    /// Load the envelope for `user`, or `None` if the vault was never set up.
    async fn load(&self, user: &UserId) -> Result<Option<VaultEnvelope>>;

    /// Replace the envelope for `user`.
    async fn save(&self, user: &UserId, envelope: &VaultEnvelope) -> Result<()>;

    /// Erase everything stored for `user`.
    async fn clear(&self, user: &UserId) -> Result<()>;
}

/// [`VaultStorage`] that stores each envelope as a JSON blob.
pub struct BlobVaultStorage<B> {
    blobs: B,
}

impl<B: BlobStore> BlobVaultStorage<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    /// The underlying blob store.
    pub fn blobs(&self) -> &B {
        &self.blobs
    }
}

impl BlobVaultStorage<MemoryBlobStore> {
    /// Storage backed by a fresh in-memory blob store.
    pub fn in_memory() -> Self {
        Self::new(MemoryBlobStore::new())
    }
}

#[async_trait]
impl<B: BlobStore> VaultStorage for BlobVaultStorage<B> {
    async fn load(&self, user: &UserId) -> Result<Option<VaultEnvelope>> {
        match self.blobs.read(user).await? {
            Some(bytes) => Ok(Some(VaultEnvelope::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, user: &UserId, envelope: &VaultEnvelope) -> Result<()> {
        let bytes = envelope.to_bytes()?;
        debug!(store = self.blobs.name(), user = %user, size = bytes.len(), "Saving envelope");
        self.blobs.write(user, bytes).await
    }

    async fn clear(&self, user: &UserId) -> Result<()> {
        debug!(store = self.blobs.name(), user = %user, "Clearing envelope");
        self.blobs.remove(user).await
    }
}
