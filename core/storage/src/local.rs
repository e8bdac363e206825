//! Local filesystem storage provider.
//!
//! Treats a directory as the remote backend. Useful for removable media,
//! network mounts, and as a reference implementation of the contract.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::provider::StorageProvider;
use vaultic_common::{Error, RemoteKey, Result};

/// Local filesystem storage provider.
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
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

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a RemoteKey to a filesystem path.
    fn to_fs_path(&self, key: &RemoteKey) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in key.components() {
            fs_path.push(component);
        }
        fs_path
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn download_blob(&self, remote_key: &RemoteKey, local_dest: &Path) -> Result<()> {
        let src = self.to_fs_path(remote_key);

        match fs::metadata(&src).await {
            Ok(meta) if meta.is_dir() => {
                return Err(Error::InvalidInput(format!(
                    "Remote key is a directory: {}",
                    remote_key
                )));
            }
            Ok(_) => {}
            Err(e) => return Err(Error::from_backend_io(e, &remote_key.as_string())),
        }

        let bytes = fs::copy(&src, local_dest)
            .await
            .map_err(|e| Error::from_backend_io(e, &remote_key.as_string()))?;

        debug!(key = %remote_key, bytes, "Downloaded blob");
        Ok(())
    }

    async fn upload_blob(&self, local_src: &Path, remote_key: &RemoteKey) -> Result<()> {
        let dest = self.to_fs_path(remote_key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Copy next to the target, then rename so readers never see a partial object
        let part = dest.with_file_name(format!("{}.part", remote_key.name()));
        if let Err(e) = fs::copy(local_src, &part).await {
            let _ = fs::remove_file(&part).await;
            return Err(Error::from_backend_io(e, &remote_key.as_string()));
        }
        fs::rename(&part, &dest).await?;

        debug!(key = %remote_key, "Uploaded blob");
        Ok(())
    }
}
