//! Storage provider abstraction for Vaultic.
//!
//! This module provides a trait-based interface for remote blob backends,
//! a provider registry resolved once at startup, a bounded-retry wrapper,
//! and the process-local scratch area that holds downloaded ciphertext
//! while a retrieval is in flight.
//!
//! # Design Principles
//! - Provider isolation: No provider-specific logic in vault or crypto modules
//! - Async operations: All I/O operations are async
//! - Unified error semantics: `NotFound` and `Transient` mean the same thing
//!   for every backend

pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod retry;
pub mod scratch;

pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::StorageProvider;
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use retry::{RetryConfig, RetryExecutor, RetryingProvider};
pub use scratch::{ScratchArea, ScratchLease};
