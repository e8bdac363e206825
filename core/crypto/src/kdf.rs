//! Passphrase stretching with Argon2id.
//!
//! The parameters travel with the vault metadata, so a vault created with
//! one preset can be opened on a machine whose default is another.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::keys::{MasterKey, Salt, KEY_LENGTH};
use vaultic_common::{Error, Result};

/// Upper bound on memory cost accepted from metadata (4 GiB).
pub const MAX_MEMORY_COST: u32 = 4 * 1024 * 1024;

/// Upper bound on iterations accepted from metadata.
pub const MAX_TIME_COST: u32 = 64;

/// Upper bound on lanes accepted from metadata.
pub const MAX_PARALLELISM: u32 = 64;

/// Argon2id cost parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of passes over memory.
    pub time_cost: u32,
    /// Number of lanes.
    pub parallelism: u32,
}

impl KdfParams {
    /// Default for desktop use, around a second of derivation.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Lighter preset for small machines and CI.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Expensive preset for long-term archives.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Reject parameters that are unusable or unreasonably expensive.
    ///
    /// Metadata is read from disk before the passphrase is checked, so its
    /// cost parameters are bounded here rather than trusted.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(Error::InvalidInput(format!(
                "KDF parallelism out of range: {}",
                self.parallelism
            )));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(Error::InvalidInput(format!(
                "KDF time cost out of range: {}",
                self.time_cost
            )));
        }
        // Argon2 needs at least 8 KiB per lane.
        if self.memory_cost < 8 * self.parallelism || self.memory_cost > MAX_MEMORY_COST {
            return Err(Error::InvalidInput(format!(
                "KDF memory cost out of range: {} KiB",
                self.memory_cost
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Stretch `passphrase` into a master key.
///
/// Deterministic for a given passphrase, salt and parameters.
///
/// # Errors
/// - `InvalidInput` if the passphrase is empty or the parameters are out of range
/// - `Crypto` if Argon2 rejects the parameters or fails
pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<MasterKey> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
    }
    params.validate()?;

    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| Error::Crypto(format!("Invalid KDF parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut output = [0u8; KEY_LENGTH];
    let derived = argon2.hash_password_into(passphrase, salt.as_bytes(), &mut output);
    let result = derived
        .map(|()| MasterKey::from_bytes(output))
        .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)));
    output.zeroize();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_same_inputs_same_key() {
        let salt = Salt::from_bytes([42u8; 32]);

        let key1 = derive_key(b"strongpass", &salt, &fast_params()).unwrap();
        let key2 = derive_key(b"strongpass", &salt, &fast_params()).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_each_input_changes_key() {
        let salt = Salt::from_bytes([1u8; 32]);
        let base = derive_key(b"strongpass", &salt, &fast_params()).unwrap();

        let other_salt = derive_key(b"strongpass", &Salt::from_bytes([2u8; 32]), &fast_params()).unwrap();
        let other_pass = derive_key(b"wrongpass", &salt, &fast_params()).unwrap();
        let other_cost = derive_key(
            b"strongpass",
            &salt,
            &KdfParams {
                time_cost: 2,
                ..fast_params()
            },
        )
        .unwrap();

        assert_ne!(base.as_bytes(), other_salt.as_bytes());
        assert_ne!(base.as_bytes(), other_pass.as_bytes());
        assert_ne!(base.as_bytes(), other_cost.as_bytes());
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(
            derive_key(b"", &Salt::generate(), &fast_params()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_presets_are_valid() {
        for params in [KdfParams::interactive(), KdfParams::moderate(), KdfParams::sensitive()] {
            params.validate().unwrap();
        }
    }

    #[test]
    fn test_out_of_range_params_rejected() {
        let too_hungry = KdfParams {
            memory_cost: MAX_MEMORY_COST + 1,
            ..fast_params()
        };
        let no_passes = KdfParams {
            time_cost: 0,
            ..fast_params()
        };
        let starved = KdfParams {
            memory_cost: 8,
            parallelism: 4,
            ..fast_params()
        };

        for params in [too_hungry, no_passes, starved] {
            assert!(matches!(
                derive_key(b"pw", &Salt::generate(), &params),
                Err(Error::InvalidInput(_))
            ));
        }
    }
}
