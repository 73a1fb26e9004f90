//! In-memory blob store for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::provider::BlobStore;
use passbox_common::{Error, Result, UserId};

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory and
/// lost on drop. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    storage: Arc<RwLock<HashMap<UserId, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with a stored blob.
    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Check if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> Error {
    Error::Storage("Memory store lock poisoned".to_string())
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read(&self, user: &UserId) -> Result<Option<Vec<u8>>> {
        let storage = self.storage.read().map_err(poisoned)?;
        Ok(storage.get(user).cloned())
    }

    async fn write(&self, user: &UserId, data: Vec<u8>) -> Result<()> {
        self.storage
            .write()
            .map_err(poisoned)?
            .insert(user.clone(), data);
        Ok(())
    }

    async fn remove(&self, user: &UserId) -> Result<()> {
        self.storage.write().map_err(poisoned)?.remove(user);
        Ok(())
    }
}
