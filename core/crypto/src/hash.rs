//! SHA-256 content digests.
//!
//! A blob's storage identifier depends only on plaintext bytes, never on
//! its logical path or timestamps, so unchanged content always maps to the
//! same blob.

use sha2::{Digest, Sha256};
use std::io::{self, Read};

use vaultic_common::{ContentHash, Result};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest everything `reader` yields into a lowercase hex content hash.
pub fn digest_reader<R: Read>(mut reader: R) -> Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..n]);
    }
    ContentHash::parse(format!("{:x}", hasher.finalize()))
}

/// Digest an in-memory buffer.
pub fn digest_bytes(data: &[u8]) -> Result<ContentHash> {
    ContentHash::parse(format!("{:x}", Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // SHA-256("abc")
        assert_eq!(
            digest_bytes(b"abc").unwrap().as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data = vec![0x5Au8; 200_000];
        assert_eq!(digest_reader(&data[..]).unwrap(), digest_bytes(&data).unwrap());
    }

    #[test]
    fn test_empty_input_has_digest() {
        assert_eq!(
            digest_bytes(b"").unwrap().as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
