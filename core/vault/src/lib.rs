//! Vault engine for Vaultic.
//!
//! This module provides:
//! - Passphrase verification against stored vault metadata
//! - Authenticated encryption of blobs and the manifest
//! - The content-addressed blob store and the cached manifest
//! - The retrieval and store protocols that tie these together
//!
//! # Architecture
//! `VaultEngine` resolves a vault id to its directory and owns a
//! `RetrievalCoordinator`, which drives `KeyManager`, `IndexManager`,
//! `ContentStore` and `IntegrityCipher` and falls back to the configured
//! `StorageProvider` only for artifacts missing locally.

pub mod cipher;
pub mod config;
pub mod content;
pub mod index;
pub mod keys;
pub mod layout;
pub mod manager;
pub mod metadata;
pub mod retrieval;
mod task;

pub use cipher::{IntegrityCipher, StagedPlaintext, VerifiedCiphertext};
pub use config::{EngineSettings, ProviderSettings, RetrySettings};
pub use content::{BlobLocation, ContentStore};
pub use index::{ClearOutcome, Index, IndexEntry, IndexLease, IndexManager, IndexSource, LoadedIndex};
pub use keys::KeyManager;
pub use layout::VaultLayout;
pub use manager::{ResolvedVault, VaultEngine};
pub use metadata::{KdfSettings, VaultMetadata};
pub use retrieval::{
    ArtifactSource, BlobOrigin, RetrievalCoordinator, RetrievalOutcome, RetrievalState,
    StoreOutcome,
};
