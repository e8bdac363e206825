//! Storage provider trait definition.

use async_trait::async_trait;
use std::path::Path;

use vaultic_common::{RemoteKey, Result};

/// Storage provider trait for remote blob backends.
///
/// The core only ever moves whole artifacts between a local file and a
/// named remote object. Implementations handle their own authentication
/// and rate limiting.
///
/// # Error contract
/// - `Error::NotFound` when the remote object does not exist
/// - `Error::Transient` for timeouts and connection failures; callers may
///   retry these a bounded number of times
/// - anything else is a permanent failure
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Get the provider name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Download a remote object into `local_dest`.
    ///
    /// # Preconditions
    /// - The parent directory of `local_dest` exists
    ///
    /// # Postconditions
    /// - On success `local_dest` holds the complete object
    /// - On failure `local_dest` may hold a partial write the caller removes
    async fn download_blob(&self, remote_key: &RemoteKey, local_dest: &Path) -> Result<()>;

    /// Upload the file at `local_src` as a remote object, replacing any
    /// existing object under the same key.
    async fn upload_blob(&self, local_src: &Path, remote_key: &RemoteKey) -> Result<()>;
}
