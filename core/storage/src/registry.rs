//! Provider registry for resolving a backend at startup.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::StorageProvider;
use vaultic_common::{Error, Result};

/// Factory function type for creating providers.
pub type ProviderFactory = Box<dyn Fn(Value) -> Result<Arc<dyn StorageProvider>> + Send + Sync>;

/// Registry for storage provider factories.
///
/// Resolution happens once, when the engine is built from its settings.
/// The retrieval path only ever sees the resolved `StorageProvider`.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a provider by name and configuration.
    ///
    /// # Errors
    /// - Provider not registered
    /// - Configuration invalid for the provider
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn StorageProvider>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Provider '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in providers.
///
/// - `memory`: process-local, for tests and dry runs
/// - `local`: a directory acting as the remote, config `{"root": "<path>"}`
pub fn create_default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    registry.factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryProvider::new()))),
    );

    registry.factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local provider requires 'root' path".to_string())
                })?;
            Ok(Arc::new(crate::local::LocalProvider::new(root)?))
        }),
    );

    registry
}
