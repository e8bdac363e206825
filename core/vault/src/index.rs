//! The vault manifest: logical path to content hash.
//!
//! The manifest is stored encrypted (`index.json.enc` plus its HMAC). Vaults
//! written by older tooling may only carry the plaintext `index.json`, which
//! is read as a lower-trust fallback.
//!
//! `IndexManager` owns one cache slot per vault. Readers take an
//! [`IndexLease`]; a cached manifest is only evicted once no lease on it is
//! alive, and writers serialize on a per-vault lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cipher::IntegrityCipher;
use crate::layout::VaultLayout;
use crate::task::run_blocking;
use vaultic_common::{ContentHash, Error, Result, VaultId};

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Number of logical paths reported with a missing-path error.
pub const AVAILABLE_SAMPLE_SIZE: usize = 5;

/// One manifest record.
///
/// Fields this version does not know about are kept in `extra` and written
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Content hash of the blob holding this path's data.
    #[serde(default)]
    pub hash: String,
    /// Plaintext size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Modification time of the source file when it was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IndexEntry {
    /// Create an entry pointing at `hash`.
    pub fn new(hash: &ContentHash) -> Self {
        Self {
            hash: hash.as_str().to_string(),
            size: None,
            modified: None,
            extra: Map::new(),
        }
    }

    /// Set the plaintext size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the modification time.
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Validated content hash of this entry.
    ///
    /// # Errors
    /// - `InvalidInput` if the hash is missing or not a safe identifier
    pub fn content_hash(&self) -> Result<ContentHash> {
        if self.hash.is_empty() {
            return Err(Error::InvalidInput("File hash missing in index".to_string()));
        }
        ContentHash::parse(self.hash.as_str())
    }
}

#[derive(Serialize, Deserialize)]
struct ManifestDocument {
    version: u32,
    files: BTreeMap<String, IndexEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestRepr {
    Versioned(ManifestDocument),
    Bare(BTreeMap<String, IndexEntry>),
}

/// Mapping of logical path to [`IndexEntry`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Index {
    files: BTreeMap<String, IndexEntry>,
}

impl Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&IndexEntry> {
        self.files.get(path)
    }

    /// Insert or replace the entry for `path`, returning the previous one.
    pub fn insert(&mut self, path: impl Into<String>, entry: IndexEntry) -> Option<IndexEntry> {
        self.files.insert(path.into(), entry)
    }

    pub fn remove(&mut self, path: &str) -> Option<IndexEntry> {
        self.files.remove(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Iterate over entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.files.iter()
    }

    /// The first `limit` logical paths, in sorted order.
    pub fn sample_paths(&self, limit: usize) -> Vec<String> {
        self.files.keys().take(limit).cloned().collect()
    }

    /// Parse a manifest, versioned or a bare legacy map.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let repr: ManifestRepr =
            serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        match repr {
            ManifestRepr::Versioned(doc) if doc.version == MANIFEST_VERSION => {
                Ok(Self { files: doc.files })
            }
            ManifestRepr::Versioned(doc) => Err(Error::Serialization(format!(
                "Unsupported manifest version: {}",
                doc.version
            ))),
            ManifestRepr::Bare(files) => Ok(Self { files }),
        }
    }

    /// Serialize as a versioned manifest.
    pub fn to_json_vec(&self) -> Result<Vec<u8>> {
        let doc = ManifestDocument {
            version: MANIFEST_VERSION,
            files: self.files.clone(),
        };
        serde_json::to_vec(&doc).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Which representation a loaded index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSource {
    /// The authenticated, encrypted manifest.
    Encrypted,
    /// The plaintext fallback. Not authenticated.
    Legacy,
}

impl IndexSource {
    /// Whether the manifest was authenticated with the vault key.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, IndexSource::Encrypted)
    }
}

impl fmt::Display for IndexSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexSource::Encrypted => write!(f, "encrypted"),
            IndexSource::Legacy => write!(f, "legacy"),
        }
    }
}

/// An index together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedIndex {
    pub index: Index,
    pub source: IndexSource,
}

/// Read the manifest from disk: encrypted first, legacy as fallback.
fn read_manifest(vault: &VaultId, layout: &VaultLayout, cipher: &IntegrityCipher) -> Result<LoadedIndex> {
    let ct_path = layout.manifest_path();
    let hmac_path = layout.manifest_hmac_path();

    let mut encrypted_failure = None;
    if ct_path.exists() || hmac_path.exists() {
        let opened = cipher
            .open_from(&ct_path, &hmac_path)
            .and_then(|bytes| Index::from_json_slice(&bytes));
        match opened {
            Ok(index) => {
                debug!(vault = %vault, entries = index.len(), "Loaded encrypted manifest");
                return Ok(LoadedIndex {
                    index,
                    source: IndexSource::Encrypted,
                });
            }
            Err(e) => {
                warn!(vault = %vault, error = %e, "Could not load encrypted manifest");
                encrypted_failure = Some(e);
            }
        }
    }

    let legacy_path = layout.legacy_manifest_path();
    match std::fs::read(&legacy_path) {
        Ok(bytes) => {
            let index = Index::from_json_slice(&bytes)?;
            warn!(vault = %vault, entries = index.len(), "Using legacy unencrypted manifest");
            Ok(LoadedIndex {
                index,
                source: IndexSource::Legacy,
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => match encrypted_failure {
            Some(cause) => Err(Error::IndexIntegrityFailure(cause.to_string())),
            None => Err(Error::IndexNotFound(vault.to_string())),
        },
        Err(e) => Err(e.into()),
    }
}

async fn read_manifest_blocking(
    vault: &VaultId,
    layout: &VaultLayout,
    cipher: &IntegrityCipher,
) -> Result<LoadedIndex> {
    let (vault, layout, cipher) = (vault.clone(), layout.clone(), cipher.clone());
    run_blocking("Manifest load", move || read_manifest(&vault, &layout, &cipher)).await
}

async fn write_manifest_blocking(
    layout: &VaultLayout,
    cipher: &IntegrityCipher,
    index: &Index,
) -> Result<()> {
    let bytes = index.to_json_vec()?;
    let (layout, cipher) = (layout.clone(), cipher.clone());
    run_blocking("Manifest save", move || {
        cipher.seal_to(&bytes, &layout.manifest_path(), &layout.manifest_hmac_path())
    })
    .await
}

#[derive(Default)]
struct CacheState {
    loaded: Option<Arc<LoadedIndex>>,
    readers: usize,
    evict_pending: bool,
}

#[derive(Default)]
struct VaultCache {
    manifest: RwLock<()>,
    state: Mutex<CacheState>,
}

impl VaultCache {
    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lease(self: &Arc<Self>) -> Option<IndexLease> {
        let mut state = self.state();
        let loaded = state.loaded.clone()?;
        state.readers += 1;
        Some(IndexLease {
            cache: self.clone(),
            loaded,
            evict_on_release: false,
        })
    }

    fn install(&self, loaded: Arc<LoadedIndex>) {
        self.state().loaded = Some(loaded);
    }

    fn install_and_lease(self: &Arc<Self>, loaded: Arc<LoadedIndex>) -> IndexLease {
        let mut state = self.state();
        let loaded = state.loaded.get_or_insert(loaded).clone();
        state.readers += 1;
        IndexLease {
            cache: self.clone(),
            loaded,
            evict_on_release: false,
        }
    }
}

/// Result of [`IndexManager::clear_cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// The cached index was released.
    Cleared,
    /// Readers still hold the index; it is released when the last one drops.
    Deferred,
    /// Nothing was cached.
    NotCached,
}

/// A reader's hold on a cached index.
pub struct IndexLease {
    cache: Arc<VaultCache>,
    loaded: Arc<LoadedIndex>,
    evict_on_release: bool,
}

impl IndexLease {
    pub fn index(&self) -> &Index {
        &self.loaded.index
    }

    pub fn source(&self) -> IndexSource {
        self.loaded.source
    }

    /// Ask for the cached index to be released once no reader holds it.
    pub fn evict_when_idle(&mut self) {
        self.evict_on_release = true;
    }
}

impl Drop for IndexLease {
    fn drop(&mut self) {
        let mut state = self.cache.state();
        state.readers = state.readers.saturating_sub(1);
        if self.evict_on_release {
            state.evict_pending = true;
        }
        if state.readers == 0 && state.evict_pending {
            state.loaded = None;
            state.evict_pending = false;
            debug!("Released cached manifest");
        }
    }
}

/// Loads, saves and caches vault manifests.
#[derive(Default)]
pub struct IndexManager {
    vaults: Mutex<HashMap<VaultId, Arc<VaultCache>>>,
}

impl IndexManager {
    /// Create a manager with an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_for(&self, vault: &VaultId) -> Arc<VaultCache> {
        let mut vaults = self.vaults.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        vaults.entry(vault.clone()).or_default().clone()
    }

    /// Load the manifest of `vault`, from cache when possible.
    ///
    /// `cipher` must hold key material that was already verified against the
    /// vault metadata.
    ///
    /// # Errors
    /// - `IndexNotFound` if neither representation exists
    /// - `IndexIntegrityFailure` if the encrypted manifest is unusable and
    ///   there is no legacy manifest
    /// - `Serialization` if the legacy manifest cannot be parsed
    pub async fn load(
        &self,
        vault: &VaultId,
        layout: &VaultLayout,
        cipher: &IntegrityCipher,
    ) -> Result<IndexLease> {
        let cache = self.cache_for(vault);
        if let Some(lease) = cache.try_lease() {
            debug!(vault = %vault, "Manifest cache hit");
            return Ok(lease);
        }

        let _guard = cache.manifest.read().await;
        if let Some(lease) = cache.try_lease() {
            return Ok(lease);
        }

        let loaded = read_manifest_blocking(vault, layout, cipher).await?;
        Ok(cache.install_and_lease(Arc::new(loaded)))
    }

    /// Encrypt and write `index` as the vault's manifest, replacing the
    /// cached copy. Readers holding a lease keep the index they loaded.
    pub async fn save(
        &self,
        vault: &VaultId,
        layout: &VaultLayout,
        cipher: &IntegrityCipher,
        index: Index,
    ) -> Result<()> {
        let cache = self.cache_for(vault);
        let _guard = cache.manifest.write().await;

        write_manifest_blocking(layout, cipher, &index).await?;
        cache.install(Arc::new(LoadedIndex {
            index,
            source: IndexSource::Encrypted,
        }));
        debug!(vault = %vault, "Saved encrypted manifest");
        Ok(())
    }

    /// Read-modify-write the manifest under the vault's write lock.
    ///
    /// A vault without any manifest starts from an empty index. A legacy
    /// manifest is rewritten in encrypted form.
    pub async fn update<F, R>(
        &self,
        vault: &VaultId,
        layout: &VaultLayout,
        cipher: &IntegrityCipher,
        apply: F,
    ) -> Result<R>
    where
        F: FnOnce(&mut Index) -> Result<R>,
    {
        let cache = self.cache_for(vault);
        let _guard = cache.manifest.write().await;

        let cached = cache.state().loaded.clone();
        let mut index = match cached {
            Some(loaded) => loaded.index.clone(),
            None => match read_manifest_blocking(vault, layout, cipher).await {
                Ok(loaded) => loaded.index,
                Err(Error::IndexNotFound(_)) => Index::new(),
                Err(e) => return Err(e),
            },
        };

        let result = apply(&mut index)?;
        write_manifest_blocking(layout, cipher, &index).await?;
        cache.install(Arc::new(LoadedIndex {
            index,
            source: IndexSource::Encrypted,
        }));
        Ok(result)
    }

    /// Release the cached manifest of `vault`.
    ///
    /// Never invalidates an index a reader still holds: with live leases the
    /// release is deferred until the last one drops.
    pub fn clear_cache(&self, vault: &VaultId) -> ClearOutcome {
        let cache = {
            let vaults = self.vaults.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match vaults.get(vault) {
                Some(cache) => cache.clone(),
                None => return ClearOutcome::NotCached,
            }
        };

        let mut state = cache.state();
        if state.loaded.is_none() {
            return ClearOutcome::NotCached;
        }
        if state.readers == 0 {
            state.loaded = None;
            state.evict_pending = false;
            ClearOutcome::Cleared
        } else {
            state.evict_pending = true;
            ClearOutcome::Deferred
        }
    }

    /// Whether an index for `vault` is currently cached.
    pub fn is_cached(&self, vault: &VaultId) -> bool {
        let vaults = self.vaults.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        vaults
            .get(vault)
            .map(|cache| cache.state().loaded.is_some())
            .unwrap_or(false)
    }

    /// Number of live leases on the cached index of `vault`.
    pub fn readers(&self, vault: &VaultId) -> usize {
        let vaults = self.vaults.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        vaults
            .get(vault)
            .map(|cache| cache.state().readers)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use vaultic_crypto::{DerivedKeyMaterial, EncryptionKey, MacKey};

    fn cipher() -> IntegrityCipher {
        IntegrityCipher::new(DerivedKeyMaterial::from_parts(
            EncryptionKey::from_bytes([4; 32]),
            MacKey::from_bytes([5; 32]),
        ))
    }

    fn vault() -> VaultId {
        VaultId::new("v1").unwrap()
    }

    fn sample_index() -> Index {
        let mut index = Index::new();
        index.insert(
            "test.txt",
            IndexEntry::new(&ContentHash::parse("test.txt").unwrap()).with_size(13),
        );
        index.insert(
            "docs/a.md",
            IndexEntry::new(&ContentHash::parse("9f86d081").unwrap()),
        );
        index
    }

    fn write_legacy(layout: &VaultLayout, json: &str) {
        let path = layout.legacy_manifest_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, json).unwrap();
    }

    #[test]
    fn test_legacy_bare_map_keeps_unknown_fields() {
        let json = r#"{"test.txt": {"hash": "test.txt", "size": 13, "owner": "alice"}}"#;
        let index = Index::from_json_slice(json.as_bytes()).unwrap();

        let entry = index.get("test.txt").unwrap();
        assert_eq!(entry.size, Some(13));
        assert_eq!(entry.extra.get("owner"), Some(&Value::from("alice")));

        let reparsed = Index::from_json_slice(&index.to_json_vec().unwrap()).unwrap();
        assert_eq!(reparsed, index);
    }

    #[test]
    fn test_unknown_manifest_version_rejected() {
        let json = r#"{"version": 9, "files": {}}"#;
        assert!(matches!(
            Index::from_json_slice(json.as_bytes()),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_missing_hash_is_invalid() {
        let entry: IndexEntry = serde_json::from_str(r#"{"size": 1}"#).unwrap();
        assert!(matches!(entry.content_hash(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_sample_paths_sorted_and_bounded() {
        let mut index = Index::new();
        for name in ["f", "b", "d", "a", "e", "c"] {
            index.insert(name, IndexEntry::new(&ContentHash::parse(name).unwrap()));
        }
        assert_eq!(index.sample_paths(AVAILABLE_SAMPLE_SIZE), ["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_save_then_load_encrypted() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());
        let manager = IndexManager::new();

        manager.save(&vault(), &layout, &cipher(), sample_index()).await.unwrap();
        manager.clear_cache(&vault());

        let lease = manager.load(&vault(), &layout, &cipher()).await.unwrap();
        assert_eq!(lease.source(), IndexSource::Encrypted);
        assert_eq!(lease.index(), &sample_index());
    }

    #[tokio::test]
    async fn test_fallback_equivalence() {
        let encrypted_dir = TempDir::new().unwrap();
        let legacy_dir = TempDir::new().unwrap();
        let encrypted_layout = VaultLayout::new(encrypted_dir.path());
        let legacy_layout = VaultLayout::new(legacy_dir.path());

        IndexManager::new()
            .save(&vault(), &encrypted_layout, &cipher(), sample_index())
            .await
            .unwrap();
        write_legacy(
            &legacy_layout,
            r#"{"test.txt": {"hash": "test.txt", "size": 13}, "docs/a.md": {"hash": "9f86d081"}}"#,
        );

        let a = IndexManager::new()
            .load(&vault(), &encrypted_layout, &cipher())
            .await
            .unwrap();
        let b = IndexManager::new()
            .load(&vault(), &legacy_layout, &cipher())
            .await
            .unwrap();

        assert_eq!(a.source(), IndexSource::Encrypted);
        assert_eq!(b.source(), IndexSource::Legacy);
        assert_eq!(a.index(), b.index());
    }

    #[tokio::test]
    async fn test_tampered_manifest_falls_back_to_legacy() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());
        let manager = IndexManager::new();

        manager.save(&vault(), &layout, &cipher(), sample_index()).await.unwrap();
        manager.clear_cache(&vault());
        write_legacy(&layout, r#"{"old.txt": {"hash": "old"}}"#);

        let mut ct = fs::read(layout.manifest_path()).unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0x80;
        fs::write(layout.manifest_path(), ct).unwrap();

        let lease = manager.load(&vault(), &layout, &cipher()).await.unwrap();
        assert_eq!(lease.source(), IndexSource::Legacy);
        assert!(lease.index().get("old.txt").is_some());
    }

    #[tokio::test]
    async fn test_tampered_manifest_without_legacy() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());
        let manager = IndexManager::new();

        manager.save(&vault(), &layout, &cipher(), sample_index()).await.unwrap();
        manager.clear_cache(&vault());
        fs::write(layout.manifest_hmac_path(), b"").unwrap();

        let result = manager.load(&vault(), &layout, &cipher()).await;
        assert!(matches!(result, Err(Error::IndexIntegrityFailure(_))));
    }

    #[tokio::test]
    async fn test_no_manifest_at_all() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());

        let result = IndexManager::new().load(&vault(), &layout, &cipher()).await;
        assert!(matches!(result, Err(Error::IndexNotFound(_))));
    }

    #[tokio::test]
    async fn test_clear_cache_waits_for_readers() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());
        let manager = IndexManager::new();
        manager.save(&vault(), &layout, &cipher(), sample_index()).await.unwrap();

        let first = manager.load(&vault(), &layout, &cipher()).await.unwrap();
        let second = manager.load(&vault(), &layout, &cipher()).await.unwrap();
        assert_eq!(manager.readers(&vault()), 2);

        assert_eq!(manager.clear_cache(&vault()), ClearOutcome::Deferred);
        drop(first);
        assert!(manager.is_cached(&vault()));
        assert_eq!(second.index().len(), 2);

        drop(second);
        assert!(!manager.is_cached(&vault()));
        assert_eq!(manager.clear_cache(&vault()), ClearOutcome::NotCached);
    }

    #[tokio::test]
    async fn test_cached_index_survives_file_removal() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());
        let manager = IndexManager::new();
        manager.save(&vault(), &layout, &cipher(), sample_index()).await.unwrap();

        fs::remove_file(layout.manifest_path()).unwrap();
        let lease = manager.load(&vault(), &layout, &cipher()).await.unwrap();
        assert_eq!(lease.index().len(), 2);
    }

    #[tokio::test]
    async fn test_evict_when_idle() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());
        let manager = IndexManager::new();
        manager.save(&vault(), &layout, &cipher(), sample_index()).await.unwrap();

        let mut lease = manager.load(&vault(), &layout, &cipher()).await.unwrap();
        lease.evict_when_idle();
        let other = manager.load(&vault(), &layout, &cipher()).await.unwrap();

        drop(lease);
        assert!(manager.is_cached(&vault()));
        drop(other);
        assert!(!manager.is_cached(&vault()));
    }

    #[tokio::test]
    async fn test_update_migrates_legacy_manifest() {
        let temp = TempDir::new().unwrap();
        let layout = VaultLayout::new(temp.path());
        let manager = IndexManager::new();
        write_legacy(&layout, r#"{"old.txt": {"hash": "old"}}"#);

        manager
            .update(&vault(), &layout, &cipher(), |index| {
                index.insert("new.txt", IndexEntry::new(&ContentHash::parse("new")?));
                Ok(())
            })
            .await
            .unwrap();
        manager.clear_cache(&vault());

        let lease = manager.load(&vault(), &layout, &cipher()).await.unwrap();
        assert_eq!(lease.source(), IndexSource::Encrypted);
        assert_eq!(lease.index().sample_paths(5), ["new.txt", "old.txt"]);
    }
}
