//! Authenticated encryption of single files and manifests.
//!
//! Encrypt-then-MAC: the ciphertext artifact is produced by the chunked
//! XChaCha20-Poly1305 stream and the detached HMAC-SHA256 is computed over
//! the whole artifact. Decryption verifies the HMAC over the complete
//! artifact first and only then decrypts, into a temporary file next to the
//! destination that is renamed into place after the last chunk authenticates.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use vaultic_common::{Error, Result};
use vaultic_crypto::stream::{decrypt_bytes, encrypt_bytes};
use vaultic_crypto::{
    compute_tag, verify_tag, DecryptingStream, DerivedKeyMaterial, EncryptingStream, MacWriter,
    TAG_LENGTH,
};

/// File and byte encryption under one vault's key material.
#[derive(Clone)]
pub struct IntegrityCipher {
    keys: DerivedKeyMaterial,
}

/// A ciphertext artifact whose HMAC has been checked.
pub struct VerifiedCiphertext {
    source: File,
}

/// Fully decrypted plaintext waiting to be moved to its destination.
///
/// Dropping it without committing removes the temporary file.
pub struct StagedPlaintext {
    temp: NamedTempFile,
    dest: PathBuf,
    bytes: u64,
}

impl StagedPlaintext {
    /// Plaintext length in bytes.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// Move the plaintext into place, replacing any existing file.
    pub fn commit(self) -> Result<u64> {
        persist(self.temp, &self.dest)?;
        Ok(self.bytes)
    }
}

/// Ciphertext and detached tag of an in-memory payload.
pub struct SealedBytes {
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_LENGTH],
}

fn open_artifact(path: &Path, what: &str) -> Result<File> {
    match File::open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::Integrity(format!(
            "{} artifact missing: {}",
            what,
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

fn read_tag(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(tag) => Ok(tag),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::Integrity(format!(
            "HMAC artifact missing: {}",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Directory a temporary sibling of `path` is created in.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn temp_sibling(path: &Path) -> Result<NamedTempFile> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;
    Ok(NamedTempFile::new_in(dir)?)
}

fn persist(temp: NamedTempFile, dest: &Path) -> Result<()> {
    temp.persist(dest).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Write a ciphertext and its tag; both land or neither does.
fn write_pair(ciphertext: NamedTempFile, ct_dest: &Path, tag: &[u8], hmac_dest: &Path) -> Result<()> {
    let mut mac_tmp = temp_sibling(hmac_dest)?;
    mac_tmp.write_all(tag)?;
    mac_tmp.as_file().sync_all()?;

    persist(ciphertext, ct_dest)?;
    if let Err(e) = persist(mac_tmp, hmac_dest) {
        let _ = fs::remove_file(ct_dest);
        return Err(e);
    }
    Ok(())
}

impl IntegrityCipher {
    /// Create a cipher for the given key material.
    pub fn new(keys: DerivedKeyMaterial) -> Self {
        Self { keys }
    }

    /// Encrypt the file at `plaintext` into a ciphertext artifact and a
    /// detached HMAC artifact.
    ///
    /// A fresh random nonce is generated for every call. Both artifacts are
    /// written through temporary files and renamed into place.
    ///
    /// Returns the number of plaintext bytes encrypted.
    pub fn encrypt_file(&self, plaintext: &Path, ct_dest: &Path, hmac_dest: &Path) -> Result<u64> {
        let input = File::open(plaintext)?;
        let mut ct_tmp = temp_sibling(ct_dest)?;

        let mut writer = MacWriter::new(self.keys.mac_key(), BufWriter::new(ct_tmp.as_file_mut()))?;
        let bytes = EncryptingStream::new(self.keys.encryption_key())
            .encrypt_stream(BufReader::new(input), &mut writer)?;
        let (buffered, tag) = writer.finalize();
        buffered.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        ct_tmp.as_file().sync_all()?;

        write_pair(ct_tmp, ct_dest, &tag, hmac_dest)?;
        Ok(bytes)
    }

    /// Verify and decrypt a ciphertext artifact into `dest`.
    ///
    /// # Postconditions
    /// - On success `dest` holds the complete plaintext
    /// - On any failure nothing is written at `dest`
    ///
    /// # Errors
    /// - `Integrity` if either artifact is missing or empty, or the HMAC
    ///   does not match; no decryption is attempted
    /// - `Decryption` if a chunk fails to authenticate after the HMAC matched
    pub fn decrypt_file(&self, ciphertext: &Path, hmac: &Path, dest: &Path) -> Result<u64> {
        let verified = self.verify_file(ciphertext, hmac)?;
        self.decrypt_staged(verified, dest)?.commit()
    }

    /// Check the detached HMAC over the whole ciphertext artifact.
    ///
    /// The returned handle keeps the artifact open, so decryption reads the
    /// same file that was verified.
    pub fn verify_file(&self, ciphertext: &Path, hmac: &Path) -> Result<VerifiedCiphertext> {
        let expected = read_tag(hmac)?;
        let mut source = open_artifact(ciphertext, "Ciphertext")?;

        verify_tag(self.keys.mac_key(), BufReader::new(&source), &expected)?;

        source.seek(SeekFrom::Start(0))?;
        Ok(VerifiedCiphertext { source })
    }

    /// Decrypt a verified artifact into a temporary file next to `dest`.
    ///
    /// Nothing is visible at `dest` until [`StagedPlaintext::commit`].
    pub fn decrypt_staged(&self, verified: VerifiedCiphertext, dest: &Path) -> Result<StagedPlaintext> {
        let mut temp = temp_sibling(dest)?;
        let bytes = DecryptingStream::new(self.keys.encryption_key())
            .decrypt_stream(BufReader::new(verified.source), BufWriter::new(temp.as_file_mut()))?;
        temp.as_file().sync_all()?;

        Ok(StagedPlaintext {
            temp,
            dest: dest.to_path_buf(),
            bytes,
        })
    }

    /// Encrypt an in-memory payload.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBytes> {
        let ciphertext = encrypt_bytes(self.keys.encryption_key(), plaintext)?;
        let tag = compute_tag(self.keys.mac_key(), ciphertext.as_slice())?;
        Ok(SealedBytes { ciphertext, tag })
    }

    /// Verify and decrypt an in-memory payload.
    pub fn open(&self, ciphertext: &[u8], tag: &[u8]) -> Result<Vec<u8>> {
        verify_tag(self.keys.mac_key(), ciphertext, tag)?;
        decrypt_bytes(self.keys.encryption_key(), ciphertext)
    }

    /// Seal `plaintext` and write both artifacts.
    pub fn seal_to(&self, plaintext: &[u8], ct_dest: &Path, hmac_dest: &Path) -> Result<()> {
        let sealed = self.seal(plaintext)?;
        let mut ct_tmp = temp_sibling(ct_dest)?;
        ct_tmp.write_all(&sealed.ciphertext)?;
        ct_tmp.as_file().sync_all()?;
        write_pair(ct_tmp, ct_dest, &sealed.tag, hmac_dest)
    }

    /// Read both artifacts and open them.
    pub fn open_from(&self, ciphertext: &Path, hmac: &Path) -> Result<Vec<u8>> {
        let tag = read_tag(hmac)?;
        let data = match fs::read(ciphertext) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::Integrity(format!(
                    "Ciphertext artifact missing: {}",
                    ciphertext.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        self.open(&data, &tag)
    }
}
