//! Vault engine: resolves vaults and wires the retrieval components.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::EngineSettings;
use crate::index::IndexManager;
use crate::layout::VaultLayout;
use crate::metadata::VaultMetadata;
use crate::retrieval::{RetrievalCoordinator, RetrievalOutcome, StoreOutcome};
use vaultic_common::{Error, Result, SensitiveBytes, VaultId};
use vaultic_crypto::KdfParams;
use vaultic_storage::{
    create_default_registry, ProviderRegistry, RetryingProvider, ScratchArea, StorageProvider,
};

/// A vault that exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVault {
    id: VaultId,
    layout: VaultLayout,
}

impl ResolvedVault {
    pub fn id(&self) -> &VaultId {
        &self.id
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }
}

/// Entry point for vault operations.
///
/// The storage provider is resolved once, here; the retrieval path only
/// sees the resulting `StorageProvider`.
pub struct VaultEngine {
    settings: EngineSettings,
    coordinator: RetrievalCoordinator,
}

impl VaultEngine {
    /// Create an engine with the built-in providers.
    ///
    /// # Errors
    /// - Provider not registered
    /// - Provider configuration invalid
    pub fn from_settings(settings: EngineSettings) -> Result<Self> {
        Self::with_registry(settings, &create_default_registry())
    }

    /// Create an engine resolving the provider through `registry`.
    pub fn with_registry(settings: EngineSettings, registry: &ProviderRegistry) -> Result<Self> {
        let provider = match &settings.provider {
            Some(provider) => Some(registry.resolve(&provider.kind, provider.config.clone())?),
            None => None,
        };
        Ok(Self::with_provider(settings, provider))
    }

    /// Create an engine around an already constructed provider.
    ///
    /// The provider is wrapped with the configured retry policy.
    pub fn with_provider(
        settings: EngineSettings,
        provider: Option<Arc<dyn StorageProvider>>,
    ) -> Self {
        let provider = provider.map(|inner| {
            Arc::new(RetryingProvider::new(inner, settings.retry.to_retry_config()))
                as Arc<dyn StorageProvider>
        });
        let coordinator = RetrievalCoordinator::new(
            Arc::new(IndexManager::new()),
            provider,
            ScratchArea::new(settings.scratch_dir.clone()),
            settings.retain_index_cache,
        );
        Self {
            settings,
            coordinator,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn coordinator(&self) -> &RetrievalCoordinator {
        &self.coordinator
    }

    /// Validate `vault_id` and compute its directory.
    ///
    /// The scratch area may live inside `vaults_root`; its directory is
    /// never a vault.
    fn vault_dir(&self, vault_id: &str) -> Result<(VaultId, PathBuf)> {
        let id = VaultId::new(vault_id)?;
        let root = self.settings.vaults_root.join(id.as_str());
        if root == self.settings.scratch_dir {
            return Err(Error::InvalidInput(format!(
                "'{}' is reserved for the scratch area",
                id
            )));
        }
        Ok((id, root))
    }

    /// Map a vault id to its directory.
    ///
    /// # Errors
    /// - `InvalidInput` if the id is not a plain directory name, or names
    ///   the scratch area
    /// - `VaultNotFound` if the directory does not exist
    pub fn resolve(&self, vault_id: &str) -> Result<ResolvedVault> {
        let (id, root) = self.vault_dir(vault_id)?;
        if !root.is_dir() {
            return Err(Error::VaultNotFound(id.to_string()));
        }
        Ok(ResolvedVault {
            id,
            layout: VaultLayout::new(root),
        })
    }

    /// Create an empty vault with fresh metadata.
    ///
    /// # Errors
    /// - `AlreadyExists` if the vault already has metadata
    pub fn create_vault(
        &self,
        vault_id: &str,
        passphrase: &[u8],
        params: KdfParams,
    ) -> Result<ResolvedVault> {
        let (id, root) = self.vault_dir(vault_id)?;
        let layout = VaultLayout::new(root);
        if layout.metadata_path().exists() {
            return Err(Error::AlreadyExists(format!("Vault already exists: {}", id)));
        }

        VaultMetadata::generate(passphrase, params)?.write_to(&layout.metadata_path())?;
        std::fs::create_dir_all(layout.content_dir())?;
        std::fs::create_dir_all(layout.hmac_dir())?;

        info!(vault = %id, "Created vault");
        Ok(ResolvedVault { id, layout })
    }

    /// Resolve `vault_id` and restore `logical_path` into `dest`.
    pub async fn restore(
        &self,
        vault_id: &str,
        logical_path: &str,
        passphrase: &SensitiveBytes,
        dest: &Path,
    ) -> Result<RetrievalOutcome> {
        let vault = self.resolve(vault_id)?;
        self.coordinator
            .retrieve(&vault, logical_path, passphrase, dest)
            .await
    }

    /// Resolve `vault_id` and store `source` as `logical_path`.
    pub async fn store(
        &self,
        vault_id: &str,
        logical_path: &str,
        source: &Path,
        passphrase: &SensitiveBytes,
    ) -> Result<StoreOutcome> {
        let vault = self.resolve(vault_id)?;
        self.coordinator
            .store(&vault, logical_path, source, passphrase)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use tempfile::TempDir;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_resolve_missing_vault() {
        let temp = TempDir::new().unwrap();
        let engine = VaultEngine::from_settings(EngineSettings::with_root(temp.path())).unwrap();

        assert!(matches!(engine.resolve("nope"), Err(Error::VaultNotFound(_))));
        assert!(matches!(engine.resolve("../etc"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_create_then_resolve() {
        let temp = TempDir::new().unwrap();
        let engine = VaultEngine::from_settings(EngineSettings::with_root(temp.path())).unwrap();

        let created = engine.create_vault("v1", b"strongpass", fast_params()).unwrap();
        assert!(created.layout().metadata_path().exists());
        assert_eq!(engine.resolve("v1").unwrap(), created);

        assert!(matches!(
            engine.create_vault("v1", b"strongpass", fast_params()),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_scratch_dir_is_not_a_vault() {
        let temp = TempDir::new().unwrap();
        let settings = EngineSettings::with_root(temp.path());
        std::fs::create_dir_all(&settings.scratch_dir).unwrap();
        let engine = VaultEngine::from_settings(settings).unwrap();

        assert!(matches!(engine.resolve("temp"), Err(Error::InvalidInput(_))));
        assert!(matches!(
            engine.create_vault("temp", b"strongpass", fast_params()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_provider_kind() {
        let settings = EngineSettings {
            provider: Some(ProviderSettings {
                kind: "ftp".to_string(),
                config: serde_json::Value::Null,
            }),
            ..EngineSettings::default()
        };
        assert!(matches!(
            VaultEngine::from_settings(settings),
            Err(Error::NotFound(_))
        ));
    }
}
