//! Common utilities and types shared across the Vaultic crates.
//!
//! This module provides the error taxonomy every operation reports through,
//! and the small identifier types that flow between the storage, crypto and
//! vault layers.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{ContentHash, RemoteKey, SensitiveBytes, VaultId};
