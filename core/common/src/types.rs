//! Common types used throughout Vaultic.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Check that a string is usable as a single file name on every platform.
fn validate_file_name(value: &str, what: &str) -> crate::Result<()> {
    if value.is_empty() {
        return Err(crate::Error::InvalidInput(format!("{} cannot be empty", what)));
    }
    if value == "." || value == ".." {
        return Err(crate::Error::InvalidInput(format!(
            "{} cannot be a relative path marker",
            what
        )));
    }
    if value.contains('/') || value.contains('\\') || value.contains('\0') {
        return Err(crate::Error::InvalidInput(format!(
            "{} cannot contain separators",
            what
        )));
    }
    Ok(())
}

/// Unique identifier for a vault.
///
/// The id doubles as the vault's directory name, so it is restricted to a
/// single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VaultId(String);

impl VaultId {
    /// Create a new VaultId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty, `.`/`..`, or contains a separator
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        validate_file_name(&id, "VaultId")?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for VaultId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<VaultId> for String {
    fn from(id: VaultId) -> Self {
        id.0
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage identifier of an encrypted blob.
///
/// Produced by hashing plaintext content, so identical content shares one
/// blob. Older vaults may carry arbitrary file-name-like identifiers here,
/// which are accepted as long as they are a single safe path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a content hash.
    ///
    /// # Errors
    /// - Returns error if the value is empty or not a single path component
    pub fn parse(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        validate_file_name(&value, "Content hash")?;
        Ok(Self(value))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentHash {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an object on a remote storage backend.
///
/// Remote objects are addressed by logical path (`<logical_path>.enc` and
/// `<logical_path>.enc.hmac`), not by content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteKey {
    components: Vec<String>,
}

/// Suffix of a remote ciphertext object.
pub const REMOTE_CIPHERTEXT_SUFFIX: &str = ".enc";

/// Suffix of a remote HMAC object.
pub const REMOTE_HMAC_SUFFIX: &str = ".enc.hmac";

impl RemoteKey {
    /// Parse a key string into components.
    ///
    /// Uses '/' as separator. Leading and trailing separators are ignored.
    ///
    /// # Errors
    /// - Returns error if the key is empty or has an empty, `.` or `..` component
    pub fn parse(key: &str) -> crate::Result<Self> {
        let trimmed = key.trim_matches('/');
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Remote key cannot be empty".to_string(),
            ));
        }
        let components: Vec<String> = trimmed.split('/').map(String::from).collect();
        for comp in &components {
            validate_file_name(comp, "Remote key component")?;
        }
        Ok(Self { components })
    }

    /// Remote key of the ciphertext stored for a logical path.
    pub fn ciphertext_for(logical_path: &str) -> crate::Result<Self> {
        Self::parse(&format!("{}{}", logical_path, REMOTE_CIPHERTEXT_SUFFIX))
    }

    /// Remote key of the detached HMAC stored for a logical path.
    pub fn hmac_for(logical_path: &str) -> crate::Result<Self> {
        Self::parse(&format!("{}{}", logical_path, REMOTE_HMAC_SUFFIX))
    }

    /// Get the key components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Get the final component.
    pub fn name(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// Convert to the canonical `a/b/c` form.
    pub fn as_string(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.components.join("/"))
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SensitiveBytes {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for SensitiveBytes {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vault_id_creation() {
        let id = VaultId::new("test-vault").unwrap();
        assert_eq!(id.as_str(), "test-vault");
    }

    #[test]
    fn test_vault_id_rejects_traversal() {
        assert!(VaultId::new("").is_err());
        assert!(VaultId::new("..").is_err());
        assert!(VaultId::new("a/b").is_err());
    }

    #[test]
    fn test_content_hash_accepts_file_names() {
        assert!(ContentHash::parse("test.txt").is_ok());
        assert!(ContentHash::parse("9f86d081884c7d65").is_ok());
        assert!(ContentHash::parse("").is_err());
        assert!(ContentHash::parse("../escape").is_err());
    }

    #[test]
    fn test_content_hash_deserialize_validates() {
        let ok: ContentHash = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<ContentHash>("\"\"").is_err());
    }

    #[test]
    fn test_remote_key_naming() {
        let ct = RemoteKey::ciphertext_for("docs/report.pdf").unwrap();
        assert_eq!(ct.as_string(), "docs/report.pdf.enc");
        assert_eq!(ct.name(), "report.pdf.enc");

        let mac = RemoteKey::hmac_for("test.txt").unwrap();
        assert_eq!(mac.as_string(), "test.txt.enc.hmac");
    }

    #[test]
    fn test_remote_key_rejects_dot_components() {
        assert!(RemoteKey::parse("a/../b").is_err());
        assert!(RemoteKey::parse("a//b").is_err());
        assert!(RemoteKey::parse("/").is_err());
    }

    #[test]
    fn test_sensitive_bytes_debug_redacts() {
        let secret = SensitiveBytes::from("hunter2");
        assert_eq!(format!("{:?}", secret), "SensitiveBytes([REDACTED; 7 bytes])");
    }
}
