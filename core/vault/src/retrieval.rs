//! The vault's get-file and put-file protocols.
//!
//! Retrieval walks a fixed sequence of states and stops at the first
//! failure:
//!
//! ```text
//! VaultResolved -> MetadataLoaded -> PassphraseVerified -> IndexLoaded
//!   -> HashResolved -> BlobLocated -> IntegrityVerified -> Decrypted -> Finalized
//! ```
//!
//! Ciphertext fetched from the remote backend lives in the scratch area,
//! keyed by content hash and logical path, under a lease that is released
//! on every exit path. Plaintext only appears at the destination once the
//! whole artifact authenticated.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::cipher::IntegrityCipher;
use crate::content::ContentStore;
use crate::index::{IndexEntry, IndexManager, IndexSource};
use crate::keys::KeyManager;
use crate::manager::ResolvedVault;
use crate::metadata::VaultMetadata;
use crate::task::run_blocking;
use vaultic_common::{ContentHash, Error, RemoteKey, Result, SensitiveBytes, VaultId};
use vaultic_crypto::digest_bytes;
use vaultic_storage::{ScratchArea, ScratchLease, StorageProvider};

/// States of a retrieval, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalState {
    VaultResolved,
    MetadataLoaded,
    PassphraseVerified,
    IndexLoaded,
    HashResolved,
    BlobLocated,
    IntegrityVerified,
    Decrypted,
    Finalized,
}

/// Where one artifact of a blob came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSource {
    Local,
    Remote,
}

/// Origin of the two artifacts used for a retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobOrigin {
    pub ciphertext: ArtifactSource,
    pub hmac: ArtifactSource,
}

impl BlobOrigin {
    /// Neither artifact needed the remote backend.
    pub fn is_local(&self) -> bool {
        self.ciphertext == ArtifactSource::Local && self.hmac == ArtifactSource::Local
    }
}

/// Result of a successful retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub operation_id: Uuid,
    pub destination: PathBuf,
    pub hash: ContentHash,
    pub bytes_written: u64,
    /// Provenance of the manifest the path was resolved against.
    pub index_source: IndexSource,
    pub origin: BlobOrigin,
}

/// Result of a successful store.
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub operation_id: Uuid,
    pub hash: ContentHash,
    pub size: u64,
    /// `false` when an identical blob was already stored.
    pub newly_stored: bool,
    /// Whether both artifacts were uploaded to the remote backend.
    pub uploaded: bool,
}

/// One artifact ready to read, holding its scratch lease if downloaded.
struct Artifact {
    path: PathBuf,
    source: ArtifactSource,
    _lease: Option<ScratchLease>,
}

/// Scratch name shared by the two artifacts fetched for `hash` under
/// `logical_path`.
///
/// Remote copies are keyed by logical path, and two paths holding the same
/// content may carry different encryptions of it, so a slot is only shared
/// by retrievals of the same hash through the same path.
fn scratch_slot(hash: &ContentHash, logical_path: &str) -> Result<String> {
    let path_digest = digest_bytes(logical_path.as_bytes())?;
    let tag = path_digest.as_str().get(..16).unwrap_or(path_digest.as_str());
    Ok(format!("{}.{}", hash.as_str(), tag))
}

/// Orchestrates the key, index, content and storage components.
pub struct RetrievalCoordinator {
    indexes: Arc<IndexManager>,
    provider: Option<Arc<dyn StorageProvider>>,
    scratch: ScratchArea,
    retain_index_cache: bool,
}

impl RetrievalCoordinator {
    /// Create a coordinator.
    ///
    /// `provider` is consulted only for artifacts missing locally.
    pub fn new(
        indexes: Arc<IndexManager>,
        provider: Option<Arc<dyn StorageProvider>>,
        scratch: ScratchArea,
        retain_index_cache: bool,
    ) -> Self {
        Self {
            indexes,
            provider,
            scratch,
            retain_index_cache,
        }
    }

    pub fn index_manager(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn scratch(&self) -> &ScratchArea {
        &self.scratch
    }

    /// Restore `logical_path` from `vault` into `dest`.
    ///
    /// # Postconditions
    /// - On success `dest` holds the verified plaintext
    /// - On failure nothing is written at `dest`
    /// - Scratch artifacts are gone in both cases, including when the
    ///   returned future is dropped early
    pub async fn retrieve(
        &self,
        vault: &ResolvedVault,
        logical_path: &str,
        passphrase: &SensitiveBytes,
        dest: &Path,
    ) -> Result<RetrievalOutcome> {
        let operation_id = Uuid::new_v4();
        let span = info_span!("retrieve", op = %operation_id, vault = %vault.id(), path = logical_path);
        self.run_retrieve(operation_id, vault, logical_path, passphrase, dest)
            .instrument(span)
            .await
    }

    async fn run_retrieve(
        &self,
        operation_id: Uuid,
        vault: &ResolvedVault,
        logical_path: &str,
        passphrase: &SensitiveBytes,
        dest: &Path,
    ) -> Result<RetrievalOutcome> {
        debug!(state = ?RetrievalState::VaultResolved, root = %vault.layout().root().display());

        let cipher = self.unlock(vault, passphrase).await?;
        debug!(state = ?RetrievalState::PassphraseVerified);

        let mut lease = self.indexes.load(vault.id(), vault.layout(), &cipher).await?;
        if !self.retain_index_cache {
            lease.evict_when_idle();
        }
        let index_source = lease.source();
        debug!(state = ?RetrievalState::IndexLoaded, source = %index_source);

        let hash = ContentStore::resolve_hash(logical_path, lease.index())?;
        drop(lease);
        debug!(state = ?RetrievalState::HashResolved, hash = %hash);

        let store = ContentStore::new(vault.layout().clone());
        let location = store.locate_local(&hash);
        let slot = scratch_slot(&hash, logical_path)?;
        let ciphertext = self
            .obtain(vault.id(), &hash, &slot, location.ciphertext, false, logical_path)
            .await?;
        let hmac = self
            .obtain(vault.id(), &hash, &slot, location.hmac, true, logical_path)
            .await?;
        let origin = BlobOrigin {
            ciphertext: ciphertext.source,
            hmac: hmac.source,
        };
        debug!(state = ?RetrievalState::BlobLocated, ?origin);

        let staged = {
            let cipher = cipher.clone();
            let (ct_path, hmac_path) = (ciphertext.path.clone(), hmac.path.clone());
            let dest = dest.to_path_buf();
            run_blocking("Decryption", move || {
                let verified = cipher.verify_file(&ct_path, &hmac_path)?;
                debug!(state = ?RetrievalState::IntegrityVerified);
                let staged = cipher.decrypt_staged(verified, &dest)?;
                debug!(state = ?RetrievalState::Decrypted);
                Ok(staged)
            })
            .await?
        };

        let bytes_written = staged.commit()?;
        drop(ciphertext);
        drop(hmac);
        debug!(state = ?RetrievalState::Finalized, bytes = bytes_written);
        info!(bytes = bytes_written, dest = %dest.display(), "Restored file");

        Ok(RetrievalOutcome {
            operation_id,
            destination: dest.to_path_buf(),
            hash,
            bytes_written,
            index_source,
            origin,
        })
    }

    /// Load metadata and verify the passphrase, off the async executor.
    async fn unlock(&self, vault: &ResolvedVault, passphrase: &SensitiveBytes) -> Result<IntegrityCipher> {
        let metadata_path = vault.layout().metadata_path();
        let passphrase = passphrase.clone();
        run_blocking("Unlock", move || {
            let metadata = VaultMetadata::load(&metadata_path)?;
            debug!(state = ?RetrievalState::MetadataLoaded);
            let keys = KeyManager::unlock(passphrase.as_bytes(), &metadata)?;
            Ok(IntegrityCipher::new(keys))
        })
        .await
    }

    /// Use the local artifact if present, otherwise download it into the
    /// scratch area.
    async fn obtain(
        &self,
        vault: &VaultId,
        hash: &ContentHash,
        slot: &str,
        local: Option<PathBuf>,
        is_hmac: bool,
        logical_path: &str,
    ) -> Result<Artifact> {
        if let Some(path) = local {
            return Ok(Artifact {
                path,
                source: ArtifactSource::Local,
                _lease: None,
            });
        }

        let what = if is_hmac { "HMAC" } else { "ciphertext" };
        let provider = self.provider.as_ref().ok_or_else(|| {
            Error::BlobUnavailable(format!(
                "{} for {} is not stored locally and no provider is configured",
                what, hash
            ))
        })?;

        let (remote_key, scratch_name) = if is_hmac {
            (RemoteKey::hmac_for(logical_path)?, format!("{}.hmac", slot))
        } else {
            (RemoteKey::ciphertext_for(logical_path)?, slot.to_string())
        };

        let lease = self.scratch.lease(vault, &scratch_name)?;
        debug!(key = %remote_key, provider = provider.name(), "Fetching {} from remote", what);
        lease
            .fill_with(|path| async move { provider.download_blob(&remote_key, &path).await })
            .await
            .map_err(|e| match e {
                Error::NotFound(msg) => {
                    Error::BlobUnavailable(format!("{} for {}: {}", what, hash, msg))
                }
                other => other,
            })?;

        Ok(Artifact {
            path: lease.path().to_path_buf(),
            source: ArtifactSource::Remote,
            _lease: Some(lease),
        })
    }

    /// Store `source` as `logical_path` in `vault`.
    ///
    /// The blob is written (or found already present) before the manifest
    /// references it, and uploaded under `<logical_path>.enc` and
    /// `<logical_path>.enc.hmac` when a provider is configured.
    pub async fn store(
        &self,
        vault: &ResolvedVault,
        logical_path: &str,
        source: &Path,
        passphrase: &SensitiveBytes,
    ) -> Result<StoreOutcome> {
        let operation_id = Uuid::new_v4();
        let span = info_span!("store", op = %operation_id, vault = %vault.id(), path = logical_path);
        self.run_store(operation_id, vault, logical_path, source, passphrase)
            .instrument(span)
            .await
    }

    async fn run_store(
        &self,
        operation_id: Uuid,
        vault: &ResolvedVault,
        logical_path: &str,
        source: &Path,
        passphrase: &SensitiveBytes,
    ) -> Result<StoreOutcome> {
        let ciphertext_key = RemoteKey::ciphertext_for(logical_path)?;
        let hmac_key = RemoteKey::hmac_for(logical_path)?;

        let cipher = self.unlock(vault, passphrase).await?;

        let file_meta = tokio::fs::metadata(source).await?;
        if !file_meta.is_file() {
            return Err(Error::InvalidInput(format!(
                "Not a regular file: {}",
                source.display()
            )));
        }
        let modified: Option<DateTime<Utc>> = file_meta.modified().ok().map(DateTime::from);

        let (hash, size, newly_stored) = {
            let store = ContentStore::new(vault.layout().clone());
            let cipher = cipher.clone();
            let source = source.to_path_buf();
            run_blocking("Blob store", move || {
                let hash = ContentStore::compute_content_hash(&source)?;
                let size = std::fs::metadata(&source)?.len();
                let newly_stored = store.store_blob(&source, &hash, &cipher)?;
                Ok((hash, size, newly_stored))
            })
            .await?
        };
        debug!(hash = %hash, newly_stored, "Blob ready");

        let uploaded = match &self.provider {
            Some(provider) => {
                provider
                    .upload_blob(&vault.layout().blob_path(&hash), &ciphertext_key)
                    .await?;
                provider
                    .upload_blob(&vault.layout().blob_hmac_path(&hash), &hmac_key)
                    .await?;
                true
            }
            None => false,
        };

        let mut entry = IndexEntry::new(&hash).with_size(size);
        if let Some(modified) = modified {
            entry = entry.with_modified(modified);
        }
        let path = logical_path.to_string();
        self.indexes
            .update(vault.id(), vault.layout(), &cipher, move |index| {
                index.insert(path, entry);
                Ok(())
            })
            .await?;
        if !self.retain_index_cache {
            self.indexes.clear_cache(vault.id());
        }

        info!(hash = %hash, size, uploaded, "Stored file");
        Ok(StoreOutcome {
            operation_id,
            hash,
            size,
            newly_stored,
            uploaded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_slot_is_per_path() {
        let hash = ContentHash::parse("abc123").unwrap();

        let a = scratch_slot(&hash, "docs/a.txt").unwrap();
        let b = scratch_slot(&hash, "docs/b.txt").unwrap();

        assert_eq!(a, scratch_slot(&hash, "docs/a.txt").unwrap());
        assert_ne!(a, b);
        assert!(a.starts_with("abc123."));
        assert!(!a.contains('/'));
    }
}
