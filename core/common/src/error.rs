//! Common error types for Vaultic.

use std::fmt;

use thiserror::Error;

/// Top-level error type for Vaultic operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No vault directory exists for the requested id.
    #[error("Vault not found: {0}")]
    VaultNotFound(String),

    /// The vault exists but its metadata file is absent.
    #[error("Vault metadata not found: {0}")]
    MetadataNotFound(String),

    /// The passphrase does not match the vault's verification tag.
    #[error("Invalid passphrase")]
    InvalidPassphrase,

    /// Neither the encrypted nor the legacy manifest exists.
    #[error("No index found for vault: {0}")]
    IndexNotFound(String),

    /// The encrypted manifest could not be authenticated or parsed.
    #[error("Index integrity failure: {0}")]
    IndexIntegrityFailure(String),

    /// The logical path is absent from the loaded index.
    #[error("File not found in vault: {path}")]
    FileNotFoundInIndex {
        /// The path that was requested.
        path: String,
        /// A short sample of logical paths that do exist.
        available: Vec<String>,
    },

    /// A blob artifact is neither stored locally nor obtainable remotely.
    #[error("Blob unavailable: {0}")]
    BlobUnavailable(String),

    /// Network-level failure that may succeed on retry.
    #[error("Transient error: {0}")]
    Transient(String),

    /// HMAC verification failed.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Authenticated decryption failed after the HMAC was accepted.
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A background task was cancelled before it finished.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

/// Stable discriminant of [`Error`], independent of the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    VaultNotFound,
    MetadataNotFound,
    InvalidPassphrase,
    IndexNotFound,
    IndexIntegrityFailure,
    FileNotFoundInIndex,
    BlobUnavailable,
    Transient,
    Integrity,
    Decryption,
    Crypto,
    Io,
    Serialization,
    InvalidInput,
    NotFound,
    AlreadyExists,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::VaultNotFound(_) => ErrorKind::VaultNotFound,
            Error::MetadataNotFound(_) => ErrorKind::MetadataNotFound,
            Error::InvalidPassphrase => ErrorKind::InvalidPassphrase,
            Error::IndexNotFound(_) => ErrorKind::IndexNotFound,
            Error::IndexIntegrityFailure(_) => ErrorKind::IndexIntegrityFailure,
            Error::FileNotFoundInIndex { .. } => ErrorKind::FileNotFoundInIndex,
            Error::BlobUnavailable(_) => ErrorKind::BlobUnavailable,
            Error::Transient(_) => ErrorKind::Transient,
            Error::Integrity(_) => ErrorKind::Integrity,
            Error::Decryption(_) => ErrorKind::Decryption,
            Error::Crypto(_) => ErrorKind::Crypto,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    /// Whether a bounded retry may turn this failure into a success.
    ///
    /// Only transient network failures qualify. Cryptographic and integrity
    /// failures are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// Classify an I/O error raised while talking to a storage backend.
    ///
    /// Timeouts and connection-level failures become [`Error::Transient`],
    /// a missing object becomes [`Error::NotFound`], anything else stays I/O.
    pub fn from_backend_io(err: std::io::Error, what: &str) -> Self {
        use std::io::ErrorKind as IoKind;
        match err.kind() {
            IoKind::NotFound => Error::NotFound(what.to_string()),
            IoKind::TimedOut
            | IoKind::ConnectionReset
            | IoKind::ConnectionAborted
            | IoKind::ConnectionRefused
            | IoKind::NotConnected
            | IoKind::BrokenPipe
            | IoKind::Interrupted
            | IoKind::WouldBlock => Error::Transient(format!("{}: {}", what, err)),
            _ => Error::Io(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
