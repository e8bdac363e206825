//! Passphrase handling: key derivation and verification against the
//! stored metadata.

use tracing::debug;

use crate::metadata::VaultMetadata;
use vaultic_common::{Error, Result};
use vaultic_crypto::{derive_key, DerivedKeyMaterial, MasterKey};

/// Derives and verifies key material for a vault.
///
/// Argon2id is deliberately slow; async callers run these functions on the
/// blocking pool.
pub struct KeyManager;

impl KeyManager {
    fn master_key(passphrase: &[u8], metadata: &VaultMetadata) -> Result<MasterKey> {
        derive_key(passphrase, &metadata.kdf.salt, &metadata.kdf.params)
    }

    /// Derive the encryption and MAC subkeys for `passphrase`.
    ///
    /// Deterministic for a given (passphrase, metadata) pair. Does not check
    /// the passphrase; see [`KeyManager::unlock`].
    pub fn derive_key(passphrase: &[u8], metadata: &VaultMetadata) -> Result<DerivedKeyMaterial> {
        Ok(Self::master_key(passphrase, metadata)?.split())
    }

    /// Check `passphrase` against the metadata's verification tag.
    ///
    /// # Errors
    /// - `InvalidPassphrase` if it does not match (an empty passphrase never does)
    pub fn verify_passphrase(passphrase: &[u8], metadata: &VaultMetadata) -> Result<()> {
        Self::unlock(passphrase, metadata).map(|_| ())
    }

    /// Verify `passphrase` and return its key material, deriving only once.
    pub fn unlock(passphrase: &[u8], metadata: &VaultMetadata) -> Result<DerivedKeyMaterial> {
        if passphrase.is_empty() {
            return Err(Error::InvalidPassphrase);
        }

        let master_key = Self::master_key(passphrase, metadata)?;
        if !master_key.verification_tag().matches(&metadata.verification_tag) {
            debug!("Verification tag mismatch");
            return Err(Error::InvalidPassphrase);
        }

        Ok(master_key.split())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vaultic_crypto::KdfParams;

    fn metadata(passphrase: &[u8]) -> VaultMetadata {
        let params = KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        };
        VaultMetadata::generate(passphrase, params).unwrap()
    }

    #[test]
    fn test_correct_passphrase_verifies() {
        let meta = metadata(b"strongpass");
        KeyManager::verify_passphrase(b"strongpass", &meta).unwrap();
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let meta = metadata(b"strongpass");
        assert!(matches!(
            KeyManager::verify_passphrase(b"wrongpass", &meta),
            Err(Error::InvalidPassphrase)
        ));
        assert!(matches!(
            KeyManager::unlock(b"", &meta),
            Err(Error::InvalidPassphrase)
        ));
    }

    #[test]
    fn test_unlock_matches_derive() {
        let meta = metadata(b"strongpass");
        let unlocked = KeyManager::unlock(b"strongpass", &meta).unwrap();
        let derived = KeyManager::derive_key(b"strongpass", &meta).unwrap();

        assert_eq!(
            unlocked.encryption_key().as_bytes(),
            derived.encryption_key().as_bytes()
        );
        assert_eq!(unlocked.mac_key().as_bytes(), derived.mac_key().as_bytes());
    }

    #[test]
    fn test_different_salts_give_different_keys() {
        let a = KeyManager::derive_key(b"strongpass", &metadata(b"strongpass")).unwrap();
        let b = KeyManager::derive_key(b"strongpass", &metadata(b"strongpass")).unwrap();
        assert_ne!(a.encryption_key().as_bytes(), b.encryption_key().as_bytes());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_other_passphrases_rejected(other in "[a-zA-Z0-9]{1,24}") {
            prop_assume!(other != "strongpass");
            let meta = metadata(b"strongpass");
            prop_assert!(matches!(
                KeyManager::verify_passphrase(other.as_bytes(), &meta),
                Err(Error::InvalidPassphrase)
            ));
        }
    }
}
