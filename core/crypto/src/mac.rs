//! Detached HMAC-SHA256 tags over ciphertext artifacts.
//!
//! The tag covers the whole artifact (header, nonce and sealed chunks) and
//! is stored next to it. It is checked before any chunk is decrypted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::{self, Read, Write};

use crate::keys::MacKey;
use vaultic_common::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 tag in bytes.
pub const TAG_LENGTH: usize = 32;

const READ_BUFFER_SIZE: usize = 64 * 1024;

fn new_mac(key: &MacKey) -> Result<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Crypto(format!("Invalid HMAC key: {}", e)))
}

/// Writer adapter that authenticates every byte passed through it.
pub struct MacWriter<W> {
    inner: W,
    mac: HmacSha256,
}

impl<W: Write> MacWriter<W> {
    /// Wrap `inner`, authenticating with `key`.
    pub fn new(key: &MacKey, inner: W) -> Result<Self> {
        Ok(Self {
            inner,
            mac: new_mac(key)?,
        })
    }

    /// Finish and return the inner writer together with the tag.
    pub fn finalize(self) -> (W, [u8; TAG_LENGTH]) {
        let tag = self.mac.finalize().into_bytes();
        let mut out = [0u8; TAG_LENGTH];
        out.copy_from_slice(&tag);
        (self.inner, out)
    }
}

impl<W: Write> Write for MacWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.mac.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn feed<R: Read>(mac: &mut HmacSha256, mut reader: R) -> Result<u64> {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        mac.update(&buffer[..n]);
        total += n as u64;
    }
    Ok(total)
}

/// Compute the tag over everything `reader` yields.
pub fn compute_tag<R: Read>(key: &MacKey, reader: R) -> Result<[u8; TAG_LENGTH]> {
    let mut mac = new_mac(key)?;
    feed(&mut mac, reader)?;
    let mut out = [0u8; TAG_LENGTH];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Verify `expected` against the tag of everything `reader` yields.
///
/// The comparison is constant-time (`Mac::verify_slice`).
///
/// # Errors
/// - `Integrity` if the expected tag is empty, has the wrong length,
///   the artifact is empty, or the tags differ
pub fn verify_tag<R: Read>(key: &MacKey, reader: R, expected: &[u8]) -> Result<()> {
    if expected.is_empty() {
        return Err(Error::Integrity("HMAC artifact is empty".to_string()));
    }
    if expected.len() != TAG_LENGTH {
        return Err(Error::Integrity(format!(
            "HMAC artifact has invalid length {}",
            expected.len()
        )));
    }

    let mut mac = new_mac(key)?;
    let total = feed(&mut mac, reader)?;
    if total == 0 {
        return Err(Error::Integrity("Ciphertext artifact is empty".to_string()));
    }

    mac.verify_slice(expected)
        .map_err(|_| Error::Integrity("HMAC mismatch".to_string()))
}
