//! Local filesystem blob store.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::provider::BlobStore;
use passbox_common::{Result, UserId};

/// Extension of stored blobs.
const BLOB_EXTENSION: &str = "vault";

/// Local filesystem blob store.
///
/// Stores one file per user in a flat directory. User ids are
/// percent-encoded into file names so arbitrary ids cannot escape the root.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, user: &UserId) -> PathBuf {
        let name = utf8_percent_encode(user.as_str(), NON_ALPHANUMERIC).to_string();
        self.root.join(format!("{}.{}", name, BLOB_EXTENSION))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn read(&self, user: &UserId) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(user)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, user: &UserId, data: Vec<u8>) -> Result<()> {
        let path = self.blob_path(user);
        let tmp_path = path.with_extension(format!("{}.tmp", BLOB_EXTENSION));

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &path).await?;

        debug!(store = "local", size = data.len(), "Blob written");
        Ok(())
    }

    async fn remove(&self, user: &UserId) -> Result<()> {
        match fs::remove_file(self.blob_path(user)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
