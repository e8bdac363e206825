//! Process-local scratch area for downloaded artifacts.
//!
//! A retrieval that has to go to the remote backend downloads ciphertext and
//! HMAC into the scratch area, decrypts from there, and lets go of them. The
//! area hands out reference-counted leases per name so that concurrent
//! retrievals of the same blob share a single download, and the file is
//! removed once the last lease is dropped.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use vaultic_common::{Error, Result, VaultId};

struct Slot {
    holders: usize,
    filled: Arc<OnceCell<()>>,
}

struct ScratchInner {
    root: PathBuf,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl ScratchInner {
    fn slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Slot>> {
        // The map stays consistent even if a holder panicked mid-update.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared scratch directory.
///
/// Cloning is cheap; clones refer to the same set of leases.
#[derive(Clone)]
pub struct ScratchArea {
    inner: Arc<ScratchInner>,
}

impl ScratchArea {
    /// Create a scratch area rooted at `root`.
    ///
    /// The directory is created lazily, on the first fill.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(ScratchInner {
                root: root.into(),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Take a lease on `<vault>/<name>`.
    ///
    /// Every lease on the same name refers to the same file. The file does
    /// not exist until one of the leases fills it.
    ///
    /// # Errors
    /// - `name` is not a single plain path component
    pub fn lease(&self, vault: &VaultId, name: &str) -> Result<ScratchLease> {
        let mut parts = Path::new(name).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Scratch name must be a single path component: {:?}",
                    name
                )))
            }
        }

        let key = PathBuf::from(vault.as_str()).join(name);
        let mut slots = self.inner.slots();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            holders: 0,
            filled: Arc::new(OnceCell::new()),
        });
        slot.holders += 1;

        Ok(ScratchLease {
            area: self.inner.clone(),
            path: self.inner.root.join(&key),
            filled: slot.filled.clone(),
            key,
        })
    }

    /// Number of live leases across all names.
    pub fn active_leases(&self) -> usize {
        self.inner.slots().values().map(|slot| slot.holders).sum()
    }
}

/// A held reference to one scratch file.
///
/// Dropping the last lease on a name removes the file, whether or not the
/// retrieval that held it completed.
pub struct ScratchLease {
    area: Arc<ScratchInner>,
    key: PathBuf,
    path: PathBuf,
    filled: Arc<OnceCell<()>>,
}

impl ScratchLease {
    /// Path of the scratch file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether some lease on this name has already filled the file.
    pub fn is_filled(&self) -> bool {
        self.filled.initialized()
    }

    /// Fill the file by running `fetch` with its path, at most once per name.
    ///
    /// Concurrent callers wait for the first one. If `fetch` fails the
    /// partial file is removed, the error is returned, and the next caller
    /// runs its own `fetch`.
    pub async fn fill_with<F, Fut>(&self, fetch: F) -> Result<()>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let path = self.path.clone();
        self.filled
            .get_or_try_init(|| async move {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                match fetch(path.clone()).await {
                    Ok(()) => {
                        debug!(path = %path.display(), "Scratch file filled");
                        Ok::<(), Error>(())
                    }
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&path).await;
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(())
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        let mut slots = self.area.slots();
        let Some(slot) = slots.get_mut(&self.key) else {
            return;
        };
        slot.holders = slot.holders.saturating_sub(1);
        if slot.holders > 0 {
            return;
        }
        slots.remove(&self.key);

        // Removed under the lock so a fresh lease cannot race the unlink.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Scratch file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file"),
        }
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::remove_dir(parent);
        }
    }
}
