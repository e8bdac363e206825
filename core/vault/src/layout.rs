//! On-disk layout of a vault directory.
//!
//! ```text
//! <root>/keys/vault-meta.json
//! <root>/encrypted/content/<hash>
//! <root>/encrypted/hmac/<hash>.hmac
//! <root>/encrypted/content/index.json.enc
//! <root>/encrypted/hmac/index.json.enc.hmac
//! <root>/encrypted/index.json            (legacy, plaintext)
//! ```

use std::path::{Path, PathBuf};

use vaultic_common::ContentHash;

/// Directory holding the vault metadata.
pub const KEYS_DIRNAME: &str = "keys";

/// Metadata file name inside [`KEYS_DIRNAME`].
pub const METADATA_FILENAME: &str = "vault-meta.json";

/// Directory holding everything encrypted.
pub const ENCRYPTED_DIRNAME: &str = "encrypted";

/// Ciphertext directory inside [`ENCRYPTED_DIRNAME`].
pub const CONTENT_DIRNAME: &str = "content";

/// HMAC directory inside [`ENCRYPTED_DIRNAME`].
pub const HMAC_DIRNAME: &str = "hmac";

/// Suffix of a detached HMAC artifact.
pub const HMAC_SUFFIX: &str = ".hmac";

/// Encrypted manifest file name inside [`CONTENT_DIRNAME`].
pub const MANIFEST_FILENAME: &str = "index.json.enc";

/// Legacy plaintext manifest file name inside [`ENCRYPTED_DIRNAME`].
pub const LEGACY_MANIFEST_FILENAME: &str = "index.json";

/// Resolved paths of one vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    root: PathBuf,
}

impl VaultLayout {
    /// Create a layout rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(KEYS_DIRNAME).join(METADATA_FILENAME)
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join(ENCRYPTED_DIRNAME).join(CONTENT_DIRNAME)
    }

    pub fn hmac_dir(&self) -> PathBuf {
        self.root.join(ENCRYPTED_DIRNAME).join(HMAC_DIRNAME)
    }

    /// Ciphertext artifact of a blob.
    pub fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        self.content_dir().join(hash.as_str())
    }

    /// Detached HMAC artifact of a blob.
    pub fn blob_hmac_path(&self, hash: &ContentHash) -> PathBuf {
        self.hmac_dir().join(format!("{}{}", hash.as_str(), HMAC_SUFFIX))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.content_dir().join(MANIFEST_FILENAME)
    }

    pub fn manifest_hmac_path(&self) -> PathBuf {
        self.hmac_dir()
            .join(format!("{}{}", MANIFEST_FILENAME, HMAC_SUFFIX))
    }

    pub fn legacy_manifest_path(&self) -> PathBuf {
        self.root.join(ENCRYPTED_DIRNAME).join(LEGACY_MANIFEST_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = VaultLayout::new("/vaults/v1");
        let hash = ContentHash::parse("abc123").unwrap();

        assert_eq!(
            layout.metadata_path(),
            PathBuf::from("/vaults/v1/keys/vault-meta.json")
        );
        assert_eq!(
            layout.blob_path(&hash),
            PathBuf::from("/vaults/v1/encrypted/content/abc123")
        );
        assert_eq!(
            layout.blob_hmac_path(&hash),
            PathBuf::from("/vaults/v1/encrypted/hmac/abc123.hmac")
        );
        assert_eq!(
            layout.manifest_hmac_path(),
            PathBuf::from("/vaults/v1/encrypted/hmac/index.json.enc.hmac")
        );
        assert_eq!(
            layout.legacy_manifest_path(),
            PathBuf::from("/vaults/v1/encrypted/index.json")
        );
    }
}
