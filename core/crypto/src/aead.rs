//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation. Blob artifacts
//! are sealed chunk by chunk; each chunk nonce is the per-file nonce with
//! the chunk counter folded into its tail.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305,
};

use crate::keys::EncryptionKey;
use vaultic_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Generate a fresh random file nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let mut out = [0u8; NONCE_SIZE];
    out.copy_from_slice(&nonce);
    out
}

/// Nonce for chunk `counter` of a file whose base nonce is `base`.
pub fn chunk_nonce(base: &[u8; NONCE_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    for (byte, c) in nonce[NONCE_SIZE - 8..]
        .iter_mut()
        .zip(counter.to_le_bytes().iter())
    {
        *byte ^= c;
    }
    nonce
}

/// Associated data binding a chunk to its position and finality.
fn chunk_aad(counter: u64, last: bool) -> [u8; 9] {
    let mut aad = [0u8; 9];
    aad[..8].copy_from_slice(&counter.to_le_bytes());
    aad[8] = u8::from(last);
    aad
}

/// Encrypt one chunk.
///
/// # Postconditions
/// - Returns ciphertext || tag, `plaintext.len() + TAG_SIZE` bytes
pub fn seal_chunk(
    key: &EncryptionKey,
    base_nonce: &[u8; NONCE_SIZE],
    counter: u64,
    last: bool,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = chunk_nonce(base_nonce, counter);
    let aad = chunk_aad(counter, last);

    cipher
        .encrypt(
            GenericArray::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))
}

/// Decrypt one chunk.
///
/// # Errors
/// - `Decryption` if the chunk is shorter than a tag or fails authentication
pub fn open_chunk(
    key: &EncryptionKey,
    base_nonce: &[u8; NONCE_SIZE],
    counter: u64,
    last: bool,
    sealed: &[u8],
) -> Result<Vec<u8>> {
    if sealed.len() < TAG_SIZE {
        return Err(Error::Decryption("Chunk too short".to_string()));
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = chunk_nonce(base_nonce, counter);
    let aad = chunk_aad(counter, last);

    cipher
        .decrypt(
            GenericArray::from_slice(&nonce),
            Payload {
                msg: sealed,
                aad: &aad,
            },
        )
        .map_err(|_| Error::Decryption(format!("Chunk {} failed authentication", counter)))
}
