//! Vault metadata: key-derivation parameters and the passphrase
//! verification tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

use vaultic_common::{Error, Result};
use vaultic_crypto::{derive_key, KdfParams, Salt, VerificationTag};

/// Current metadata format version.
pub const METADATA_VERSION: u32 = 1;

/// The only key-derivation algorithm vaults are created with.
pub const KDF_ALGORITHM: &str = "argon2id";

/// Key-derivation settings stored in the metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfSettings {
    /// Algorithm name, always `argon2id`.
    pub algorithm: String,
    /// Salt for master key derivation.
    pub salt: Salt,
    /// Argon2id cost parameters.
    #[serde(flatten)]
    pub params: KdfParams,
}

/// Immutable per-vault metadata.
///
/// Written once when the vault is created; every later operation only
/// reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultMetadata {
    /// Metadata format version.
    pub version: u32,
    /// Key-derivation settings.
    pub kdf: KdfSettings,
    /// Tag derived from the correct passphrase.
    pub verification_tag: VerificationTag,
    /// Vault creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl VaultMetadata {
    /// Create metadata for a new vault.
    ///
    /// # Postconditions
    /// - Salt is randomly generated
    /// - The verification tag matches `passphrase` and nothing else
    ///
    /// # Errors
    /// - Passphrase empty
    /// - KDF failure
    pub fn generate(passphrase: &[u8], params: KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let master_key = derive_key(passphrase, &salt, &params)?;

        Ok(Self {
            version: METADATA_VERSION,
            kdf: KdfSettings {
                algorithm: KDF_ALGORITHM.to_string(),
                salt,
                params,
            },
            verification_tag: master_key.verification_tag(),
            created_at: Utc::now(),
        })
    }

    /// Load and validate the metadata file at `path`.
    ///
    /// # Errors
    /// - `MetadataNotFound` if the file does not exist
    /// - `Serialization` if it cannot be parsed
    /// - `InvalidInput` for an unsupported version or algorithm, or KDF
    ///   costs out of range
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MetadataNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let metadata = Self::from_bytes(&bytes)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Write the metadata file, creating its directory if needed.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.version != METADATA_VERSION {
            return Err(Error::InvalidInput(format!(
                "Unsupported metadata version: {}",
                self.version
            )));
        }
        if !self.kdf.algorithm.eq_ignore_ascii_case(KDF_ALGORITHM) {
            return Err(Error::InvalidInput(format!(
                "Unsupported key derivation algorithm: {}",
                self.kdf.algorithm
            )));
        }
        self.kdf.params.validate()
    }

    /// Serialize metadata to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize metadata from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_metadata_file_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("keys").join("vault-meta.json");

        let metadata = VaultMetadata::generate(b"strongpass", fast_params()).unwrap();
        metadata.write_to(&path).unwrap();

        let loaded = VaultMetadata::load(&path).unwrap();
        assert_eq!(loaded.kdf, metadata.kdf);
        assert!(loaded.verification_tag.matches(&metadata.verification_tag));
    }

    #[test]
    fn test_metadata_json_shape() {
        let metadata = VaultMetadata::generate(b"strongpass", fast_params()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&metadata.to_json().unwrap()).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["kdf"]["algorithm"], "argon2id");
        assert_eq!(value["kdf"]["memory_cost"], 1024);
        assert!(value["kdf"]["salt"].is_string());
        assert!(value["verification_tag"].is_string());
    }

    #[test]
    fn test_missing_metadata() {
        let temp = TempDir::new().unwrap();
        let result = VaultMetadata::load(&temp.path().join("absent.json"));
        assert!(matches!(result, Err(Error::MetadataNotFound(_))));
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("meta.json");

        let mut metadata = VaultMetadata::generate(b"strongpass", fast_params()).unwrap();
        metadata.kdf.algorithm = "scrypt".to_string();
        metadata.write_to(&path).unwrap();

        assert!(matches!(
            VaultMetadata::load(&path),
            Err(Error::InvalidInput(_))
        ));
    }
}
