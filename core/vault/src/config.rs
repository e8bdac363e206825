//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use vaultic_common::{Error, Result};
use vaultic_storage::RetryConfig;

/// Default directory holding all vaults.
pub const DEFAULT_VAULTS_ROOT: &str = ".vaultic";

/// Default scratch directory for downloaded artifacts.
pub const DEFAULT_SCRATCH_DIR: &str = ".vaultic/temp";

/// Remote backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Registered provider name (e.g., "local", "memory").
    pub kind: String,
    /// Provider-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Retry policy for transient backend failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Convert into the storage layer's retry policy.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
    }
}

/// Settings for a [`crate::VaultEngine`].
///
/// Every field has a default, so `{}` is a valid settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory containing one subdirectory per vault.
    pub vaults_root: PathBuf,
    /// Scratch directory for artifacts downloaded during retrieval.
    pub scratch_dir: PathBuf,
    /// Remote backend, if any.
    pub provider: Option<ProviderSettings>,
    /// Retry policy applied around the provider.
    pub retry: RetrySettings,
    /// Keep manifests cached after a retrieval finishes.
    pub retain_index_cache: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            vaults_root: PathBuf::from(DEFAULT_VAULTS_ROOT),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            provider: None,
            retry: RetrySettings::default(),
            retain_index_cache: false,
        }
    }
}

impl EngineSettings {
    /// Settings rooted at `vaults_root`, with the scratch area inside it.
    pub fn with_root(vaults_root: impl Into<PathBuf>) -> Self {
        let vaults_root = vaults_root.into();
        Self {
            scratch_dir: vaults_root.join("temp"),
            vaults_root,
            ..Self::default()
        }
    }

    /// Deserialize settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Read settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let settings = EngineSettings::from_json("{}").unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.vaults_root, PathBuf::from(".vaultic"));
        assert_eq!(settings.scratch_dir, PathBuf::from(".vaultic/temp"));
        assert!(settings.provider.is_none());
        assert!(!settings.retain_index_cache);
    }

    #[test]
    fn test_provider_and_partial_retry() {
        let settings = EngineSettings::from_json(
            r#"{
                "vaults_root": "/data/vaults",
                "provider": { "kind": "local", "config": { "root": "/mnt/backup" } },
                "retry": { "max_retries": 5 }
            }"#,
        )
        .unwrap();

        let provider = settings.provider.unwrap();
        assert_eq!(provider.kind, "local");
        assert_eq!(provider.config["root"], "/mnt/backup");
        assert_eq!(settings.retry.max_retries, 5);
        assert_eq!(settings.retry.initial_delay_ms, 200);

        let retry = settings.retry.to_retry_config();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(400));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            EngineSettings::from_json("{not json"),
            Err(Error::Serialization(_))
        ));
    }
}
