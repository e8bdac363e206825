//! Streaming encryption of blob artifacts.
//!
//! Plaintext is processed in fixed-size chunks so files never have to fit
//! in memory. Every chunk is independently authenticated and bound to its
//! position and to whether it is the final chunk, so reordering or
//! truncation is detected even without the detached HMAC.
//!
//! # Format
//! ```text
//! [version: 1][nonce: 24][chunk_size: u32 LE][chunk 0]...[chunk n]
//! ```
//! Every chunk except the last holds exactly `chunk_size + TAG_SIZE` bytes.
//! The last chunk holds the remainder plus a tag, so empty plaintext
//! produces a single tag-only chunk.

use std::io::{self, Read, Write};

use crate::aead::{generate_nonce, open_chunk, seal_chunk, NONCE_SIZE, TAG_SIZE};
use crate::keys::EncryptionKey;
use vaultic_common::{Error, Result};

/// Default chunk size for streaming encryption (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk size a reader will accept (16 MiB).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Header size: version (1) + nonce (24) + chunk_size (4).
pub const HEADER_SIZE: usize = 1 + NONCE_SIZE + 4;

/// Artifact format version.
pub const STREAM_VERSION: u8 = 1;

/// Read until `buffer` is full or the reader is exhausted.
fn fill<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Encrypting stream that processes data in chunks.
pub struct EncryptingStream<'a> {
    key: &'a EncryptionKey,
    chunk_size: usize,
}

impl<'a> EncryptingStream<'a> {
    /// Create a new encrypting stream.
    pub fn new(key: &'a EncryptionKey) -> Self {
        Self {
            key,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set custom chunk size.
    ///
    /// # Errors
    /// - Returns error if size is zero or above `MAX_CHUNK_SIZE`
    pub fn with_chunk_size(mut self, size: usize) -> Result<Self> {
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidInput(format!("Invalid chunk size: {}", size)));
        }
        self.chunk_size = size;
        Ok(self)
    }

    /// Encrypt data from reader and write the artifact to writer.
    ///
    /// A fresh random nonce is generated for every call.
    ///
    /// # Returns
    /// Number of plaintext bytes consumed.
    pub fn encrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let nonce = generate_nonce();

        writer.write_all(&[STREAM_VERSION])?;
        writer.write_all(&nonce)?;
        writer.write_all(&(self.chunk_size as u32).to_le_bytes())?;

        let mut current = vec![0u8; self.chunk_size];
        let mut next = vec![0u8; self.chunk_size];
        let mut len = fill(&mut reader, &mut current)?;
        let mut counter = 0u64;
        let mut total_bytes = 0u64;

        loop {
            // Look one chunk ahead to learn whether this one is final
            let next_len = if len == self.chunk_size {
                fill(&mut reader, &mut next)?
            } else {
                0
            };
            let last = next_len == 0;

            let sealed = seal_chunk(self.key, &nonce, counter, last, &current[..len])?;
            writer.write_all(&sealed)?;
            total_bytes += len as u64;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            len = next_len;
            counter += 1;
        }

        writer.flush()?;
        Ok(total_bytes)
    }
}

/// Decrypting stream that processes encrypted chunks.
pub struct DecryptingStream<'a> {
    key: &'a EncryptionKey,
}

impl<'a> DecryptingStream<'a> {
    /// Create a new decrypting stream.
    pub fn new(key: &'a EncryptionKey) -> Self {
        Self { key }
    }

    /// Decrypt an artifact from reader and write plaintext to writer.
    ///
    /// Plaintext for a chunk is written only after that chunk authenticated.
    /// Callers that must not expose partial output write into a temporary
    /// location and discard it on error.
    ///
    /// # Errors
    /// - `Decryption` on an unknown version, bad header, truncated or
    ///   unauthenticated chunk
    /// - I/O errors
    pub fn decrypt_stream<R: Read, W: Write>(&self, mut reader: R, mut writer: W) -> Result<u64> {
        let mut header = [0u8; HEADER_SIZE];
        if fill(&mut reader, &mut header)? != HEADER_SIZE {
            return Err(Error::Decryption("Artifact header truncated".to_string()));
        }
        if header[0] != STREAM_VERSION {
            return Err(Error::Decryption(format!(
                "Unsupported artifact version: {}",
                header[0]
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&header[1..1 + NONCE_SIZE]);

        let mut size_bytes = [0u8; 4];
        size_bytes.copy_from_slice(&header[1 + NONCE_SIZE..]);
        let chunk_size = u32::from_le_bytes(size_bytes) as usize;
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Decryption(format!(
                "Invalid chunk size in header: {}",
                chunk_size
            )));
        }

        let sealed_size = chunk_size + TAG_SIZE;
        let mut current = vec![0u8; sealed_size];
        let mut next = vec![0u8; sealed_size];
        let mut len = fill(&mut reader, &mut current)?;
        let mut counter = 0u64;
        let mut total_bytes = 0u64;

        loop {
            if len < TAG_SIZE {
                return Err(Error::Decryption("Artifact truncated".to_string()));
            }
            let next_len = if len == sealed_size {
                fill(&mut reader, &mut next)?
            } else {
                0
            };
            let last = next_len == 0;

            let plaintext = open_chunk(self.key, &nonce, counter, last, &current[..len])?;
            writer.write_all(&plaintext)?;
            total_bytes += plaintext.len() as u64;

            if last {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            len = next_len;
            counter += 1;
        }

        writer.flush()?;
        Ok(total_bytes)
    }
}

/// Encrypt a complete byte slice into an artifact.
pub fn encrypt_bytes(key: &EncryptionKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(HEADER_SIZE + data.len() + TAG_SIZE);
    EncryptingStream::new(key).encrypt_stream(data, &mut output)?;
    Ok(output)
}

/// Decrypt a complete artifact held in memory.
pub fn decrypt_bytes(key: &EncryptionKey, data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len());
    DecryptingStream::new(key).decrypt_stream(data, &mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;
    use proptest::prelude::*;

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey::from_bytes([byte; KEY_LENGTH])
    }

    #[test]
    fn test_stream_encrypt_decrypt_roundtrip() {
        let plaintext = b"Hello, streaming encryption!";

        let encrypted = encrypt_bytes(&key(42), plaintext).unwrap();
        let decrypted = decrypt_bytes(&key(42), &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_stream_multiple_chunks() {
        // Data that spans several chunks, with a partial tail
        let plaintext = vec![0xAB; DEFAULT_CHUNK_SIZE * 3 + 1000];

        let encrypted = encrypt_bytes(&key(42), &plaintext).unwrap();
        assert_eq!(
            encrypted.len(),
            HEADER_SIZE + plaintext.len() + 4 * TAG_SIZE
        );

        let decrypted = decrypt_bytes(&key(42), &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_stream_exact_chunk_multiple() {
        let plaintext = vec![0x11; 64];
        let k = key(9);
        let stream = EncryptingStream::new(&k).with_chunk_size(16).unwrap();
        let mut encrypted = Vec::new();
        stream.encrypt_stream(&plaintext[..], &mut encrypted).unwrap();

        // Four full chunks, the fourth flagged as last
        assert_eq!(encrypted.len(), HEADER_SIZE + 4 * (16 + TAG_SIZE));
        assert_eq!(decrypt_bytes(&key(9), &encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_stream_empty_data() {
        let encrypted = encrypt_bytes(&key(42), b"").unwrap();
        assert_eq!(encrypted.len(), HEADER_SIZE + TAG_SIZE);

        let decrypted = decrypt_bytes(&key(42), &encrypted).unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_stream_wrong_key_fails() {
        let encrypted = encrypt_bytes(&key(1), b"Secret streaming data").unwrap();
        let result = decrypt_bytes(&key(2), &encrypted);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_dropped_final_chunk_detected() {
        let plaintext = vec![0x22; 48];
        let k = key(7);
        let stream = EncryptingStream::new(&k).with_chunk_size(16).unwrap();
        let mut encrypted = Vec::new();
        stream.encrypt_stream(&plaintext[..], &mut encrypted).unwrap();

        encrypted.truncate(encrypted.len() - (16 + TAG_SIZE));
        assert!(matches!(
            decrypt_bytes(&key(7), &encrypted),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_stream_header_format() {
        let encrypted = encrypt_bytes(&key(42), b"Test").unwrap();

        assert_eq!(encrypted[0], STREAM_VERSION);
        let chunk_size =
            u32::from_le_bytes(encrypted[1 + NONCE_SIZE..HEADER_SIZE].try_into().unwrap());
        assert_eq!(chunk_size as usize, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut encrypted = encrypt_bytes(&key(42), b"Test").unwrap();
        encrypted[0] = 99;
        assert!(matches!(
            decrypt_bytes(&key(42), &encrypted),
            Err(Error::Decryption(_))
        ));
    }

    #[test]
    fn test_invalid_chunk_size_rejected() {
        assert!(EncryptingStream::new(&key(1)).with_chunk_size(0).is_err());
        assert!(EncryptingStream::new(&key(1))
            .with_chunk_size(MAX_CHUNK_SIZE + 1)
            .is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip_any_plaintext(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            chunk in 1usize..300,
        ) {
            let k = key(3);
            let stream = EncryptingStream::new(&k).with_chunk_size(chunk).unwrap();
            let mut encrypted = Vec::new();
            stream.encrypt_stream(&data[..], &mut encrypted).unwrap();
            prop_assert_eq!(decrypt_bytes(&key(3), &encrypted).unwrap(), data);
        }
    }
}
