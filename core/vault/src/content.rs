//! Content-addressed blob store.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cipher::IntegrityCipher;
use crate::index::{Index, AVAILABLE_SAMPLE_SIZE};
use crate::layout::VaultLayout;
use vaultic_common::{ContentHash, Error, Result};
use vaultic_crypto::digest_reader;

/// Where the two artifacts of a blob were found locally.
///
/// Either may be present without the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobLocation {
    pub ciphertext: Option<PathBuf>,
    pub hmac: Option<PathBuf>,
}

impl BlobLocation {
    /// Both artifacts are present.
    pub fn is_complete(&self) -> bool {
        self.ciphertext.is_some() && self.hmac.is_some()
    }
}

/// Locates and stores encrypted blobs of one vault by content hash.
pub struct ContentStore {
    layout: VaultLayout,
}

impl ContentStore {
    pub fn new(layout: VaultLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    /// Look up the content hash of `logical_path`.
    ///
    /// # Errors
    /// - `FileNotFoundInIndex`, carrying a few paths that do exist
    /// - `InvalidInput` if the entry has no usable hash
    pub fn resolve_hash(logical_path: &str, index: &Index) -> Result<ContentHash> {
        match index.get(logical_path) {
            Some(entry) => entry.content_hash(),
            None => Err(Error::FileNotFoundInIndex {
                path: logical_path.to_string(),
                available: index.sample_paths(AVAILABLE_SAMPLE_SIZE),
            }),
        }
    }

    /// Check the local blob directories for the artifacts of `hash`.
    pub fn locate_local(&self, hash: &ContentHash) -> BlobLocation {
        let ciphertext = self.layout.blob_path(hash);
        let hmac = self.layout.blob_hmac_path(hash);
        BlobLocation {
            ciphertext: ciphertext.is_file().then_some(ciphertext),
            hmac: hmac.is_file().then_some(hmac),
        }
    }

    /// SHA-256 of the file's bytes. Depends on content only.
    pub fn compute_content_hash(plaintext: &Path) -> Result<ContentHash> {
        digest_reader(BufReader::new(File::open(plaintext)?))
    }

    /// Encrypt `plaintext` into the blob store under `hash`.
    ///
    /// Returns `false` without writing anything when both artifacts already
    /// exist. A blob with only one artifact present is rewritten whole.
    pub fn store_blob(
        &self,
        plaintext: &Path,
        hash: &ContentHash,
        cipher: &IntegrityCipher,
    ) -> Result<bool> {
        if self.locate_local(hash).is_complete() {
            debug!(hash = %hash, "Blob already stored");
            return Ok(false);
        }

        let bytes = cipher.encrypt_file(
            plaintext,
            &self.layout.blob_path(hash),
            &self.layout.blob_hmac_path(hash),
        )?;
        debug!(hash = %hash, bytes, "Stored blob");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexEntry;
    use std::fs;
    use tempfile::TempDir;
    use vaultic_crypto::{DerivedKeyMaterial, EncryptionKey, MacKey};

    fn cipher() -> IntegrityCipher {
        IntegrityCipher::new(DerivedKeyMaterial::from_parts(
            EncryptionKey::from_bytes([1; 32]),
            MacKey::from_bytes([2; 32]),
        ))
    }

    #[test]
    fn test_resolve_hash() {
        let mut index = Index::new();
        index.insert("test.txt", IndexEntry::new(&ContentHash::parse("test.txt").unwrap()));

        let hash = ContentStore::resolve_hash("test.txt", &index).unwrap();
        assert_eq!(hash.as_str(), "test.txt");

        match ContentStore::resolve_hash("missing.txt", &index) {
            Err(Error::FileNotFoundInIndex { path, available }) => {
                assert_eq!(path, "missing.txt");
                assert_eq!(available, ["test.txt"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_content_hash_depends_on_content_only() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.txt");
        let b = temp.path().join("nested-b.bin");
        fs::write(&a, b"Hello Vaultic").unwrap();
        fs::write(&b, b"Hello Vaultic").unwrap();

        let hash = ContentStore::compute_content_hash(&a).unwrap();
        assert_eq!(
            hash.as_str(),
            "4d67c8d24e6dbb31f243c9da8074b54606db4ce9b1c3c9cc80375dbc9a92bce5"
        );
        assert_eq!(ContentStore::compute_content_hash(&b).unwrap(), hash);
    }

    #[test]
    fn test_store_deduplicates() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(VaultLayout::new(temp.path().join("vault")));
        let src = temp.path().join("src");
        fs::write(&src, b"payload").unwrap();
        let hash = ContentStore::compute_content_hash(&src).unwrap();

        assert!(store.store_blob(&src, &hash, &cipher()).unwrap());
        let first = fs::read(store.layout().blob_path(&hash)).unwrap();

        assert!(!store.store_blob(&src, &hash, &cipher()).unwrap());
        assert_eq!(fs::read(store.layout().blob_path(&hash)).unwrap(), first);
        assert!(store.locate_local(&hash).is_complete());
    }

    #[test]
    fn test_locate_reports_each_artifact() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::new(VaultLayout::new(temp.path()));
        let src = temp.path().join("src");
        fs::write(&src, b"payload").unwrap();
        let hash = ContentStore::compute_content_hash(&src).unwrap();

        assert_eq!(store.locate_local(&hash), BlobLocation::default());

        store.store_blob(&src, &hash, &cipher()).unwrap();
        fs::remove_file(store.layout().blob_hmac_path(&hash)).unwrap();

        let location = store.locate_local(&hash);
        assert!(location.ciphertext.is_some());
        assert!(location.hmac.is_none());

        // A half-present blob is rewritten whole
        assert!(store.store_blob(&src, &hash, &cipher()).unwrap());
        assert!(store.locate_local(&hash).is_complete());
    }
}
