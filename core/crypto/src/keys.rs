//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::aead::{rand_core::RngCore, OsRng};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of the KDF salt in bytes.
pub const SALT_LENGTH: usize = 32;

const ENCRYPTION_LABEL: &[u8] = b"vaultic/subkey/encryption/v1";
const MAC_LABEL: &[u8] = b"vaultic/subkey/mac/v1";
const VERIFICATION_LABEL: &[u8] = b"vaultic/subkey/verification/v1";

/// Hash `key || label` into a 256-bit subkey with BLAKE2b.
fn derive_subkey(key: &[u8; KEY_LENGTH], label: &[u8]) -> [u8; KEY_LENGTH] {
    use blake2::digest::consts::U32;
    use blake2::{Blake2b, Digest};

    let mut hasher = Blake2b::<U32>::new();
    hasher.update(key);
    hasher.update(label);

    let result = hasher.finalize();
    let mut derived = [0u8; KEY_LENGTH];
    derived.copy_from_slice(&result);
    derived
}

/// Root key derived from the vault passphrase.
///
/// Never used directly for encryption. It only exists long enough to
/// split into subkeys and the verification tag.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LENGTH],
}

impl MasterKey {
    /// Create a master key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Split into the encryption and MAC subkeys.
    pub fn split(&self) -> DerivedKeyMaterial {
        DerivedKeyMaterial {
            encryption: EncryptionKey::from_bytes(derive_subkey(&self.key, ENCRYPTION_LABEL)),
            mac: MacKey::from_bytes(derive_subkey(&self.key, MAC_LABEL)),
        }
    }

    /// Compute the passphrase verification tag.
    ///
    /// The tag is a one-way function of the key, independent of the
    /// encryption and MAC subkeys, so storing it reveals neither.
    pub fn verification_tag(&self) -> VerificationTag {
        VerificationTag(derive_subkey(&self.key, VERIFICATION_LABEL))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

/// Subkey for encrypting blob and manifest contents.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; KEY_LENGTH],
}

impl EncryptionKey {
    /// Create an encryption key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

/// Subkey for the detached HMAC over ciphertext artifacts.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MacKey {
    key: [u8; KEY_LENGTH],
}

impl MacKey {
    /// Create a MAC key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl fmt::Debug for MacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacKey([REDACTED])")
    }
}

/// Key material for one vault operation.
///
/// Process-local and never persisted. Both subkeys are zeroized when this
/// value is dropped.
#[derive(Clone)]
pub struct DerivedKeyMaterial {
    encryption: EncryptionKey,
    mac: MacKey,
}

impl DerivedKeyMaterial {
    /// Build key material from explicit subkeys.
    pub fn from_parts(encryption: EncryptionKey, mac: MacKey) -> Self {
        Self { encryption, mac }
    }

    /// Get the encryption subkey.
    pub fn encryption_key(&self) -> &EncryptionKey {
        &self.encryption
    }

    /// Get the MAC subkey.
    pub fn mac_key(&self) -> &MacKey {
        &self.mac
    }
}

impl fmt::Debug for DerivedKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKeyMaterial([REDACTED])")
    }
}

/// Value stored in vault metadata to reject wrong passphrases early.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationTag([u8; KEY_LENGTH]);

impl VerificationTag {
    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the tag bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Compare two tags in constant time.
    pub fn matches(&self, other: &VerificationTag) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for VerificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerificationTag(..)")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

fn decode_fixed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
    let encoded = String::deserialize(deserializer)?;
    let bytes = STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| de::Error::invalid_length(v.len(), &"32 bytes"))
}

impl Serialize for Salt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Salt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decode_fixed(deserializer).map(Self)
    }
}

impl Serialize for VerificationTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(self.0))
    }
}

impl<'de> Deserialize<'de> for VerificationTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        decode_fixed(deserializer).map(Self)
    }
}
