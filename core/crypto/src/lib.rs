//! Cryptographic primitives for Vaultic.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Domain-separated subkeys for encryption, authentication and passphrase checks
//! - Chunked XChaCha20-Poly1305 encryption of blob artifacts
//! - Detached HMAC-SHA256 tags over whole artifacts
//! - SHA-256 content digests for content addressing
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Constant-time operations for tag and verifier comparisons

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod mac;
pub mod stream;

pub use hash::{digest_bytes, digest_reader};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DerivedKeyMaterial, EncryptionKey, MacKey, MasterKey, Salt, VerificationTag};
pub use mac::{compute_tag, verify_tag, MacWriter, TAG_LENGTH};
pub use stream::{DecryptingStream, EncryptingStream};
