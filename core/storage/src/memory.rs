//! In-memory storage provider for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::provider::StorageProvider;
use vaultic_common::{Error, RemoteKey, Result};

/// In-memory storage provider.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Call counters and injectable failures let tests
/// observe how the core drives a backend.
pub struct MemoryProvider {
    objects: RwLock<HashMap<String, Vec<u8>>>,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
    pending_failures: AtomicU32,
    latency: Option<Duration>,
}

impl MemoryProvider {
    /// Create a new empty memory provider.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
            pending_failures: AtomicU32::new(0),
            latency: None,
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store an object directly.
    pub async fn insert(&self, key: &RemoteKey, data: Vec<u8>) {
        self.objects.write().await.insert(key.as_string(), data);
    }

    /// Read an object directly.
    pub async fn get(&self, key: &RemoteKey) -> Option<Vec<u8>> {
        self.objects.read().await.get(&key.as_string()).cloned()
    }

    /// Make the next `count` calls fail with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of download calls seen, including failed ones.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of upload calls seen, including failed ones.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    async fn simulate_network(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Transient("simulated connection reset".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn download_blob(&self, remote_key: &RemoteKey, local_dest: &Path) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let data = self
            .get(remote_key)
            .await
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", remote_key)))?;

        tokio::fs::write(local_dest, data).await?;
        Ok(())
    }

    async fn upload_blob(&self, local_src: &Path, remote_key: &RemoteKey) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;

        let data = tokio::fs::read(local_src).await?;
        self.insert(remote_key, data).await;
        Ok(())
    }
}
