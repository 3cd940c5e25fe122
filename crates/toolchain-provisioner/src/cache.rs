//! Process-wide toolchain cache
//!
//! [`ProvisioningCache::acquire`] returns the entry binary for a
//! [`ToolchainKey`], installing it on first use. Concurrent callers for the
//! same key wait on a lock scoped to that key and re-check the map once
//! they hold it, so exactly one of them runs the installer. Callers for
//! other keys never wait on it.
//!
//! The cache is meant to be built once at test-run bootstrap and shared
//! through an `Arc`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::key::ToolchainKey;
use crate::keyed_lock::KeyedLock;
use crate::Result;

/// Performs the actual download/extract/publish for one key.
#[async_trait]
pub trait ToolchainInstaller: Send + Sync {
    /// Install the toolchain for `key` and return the path of its entry binary.
    async fn install(&self, key: ToolchainKey) -> Result<PathBuf>;
}

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Uninstalled,
    Installing,
    Installed,
}

/// Key-addressed cache of installed toolchains.
pub struct ProvisioningCache {
    installed: RwLock<HashMap<ToolchainKey, PathBuf>>,
    locks: KeyedLock<ToolchainKey>,
    installer: Arc<dyn ToolchainInstaller>,
}

impl ProvisioningCache {
    /// Create an empty cache backed by `installer`.
    pub fn new(installer: Arc<dyn ToolchainInstaller>) -> Self {
        ProvisioningCache {
            installed: RwLock::new(HashMap::new()),
            locks: KeyedLock::new(),
            installer,
        }
    }

    /// Return the entry binary for `key`, installing it if needed.
    ///
    /// An installation error goes to the caller whose attempt failed.
    /// Nothing is recorded for the key, so the next caller starts over.
    pub async fn acquire(&self, key: ToolchainKey) -> Result<PathBuf> {
        if let Some(path) = self.lookup(key) {
            return Ok(path);
        }

        let _guard = self.locks.lock(&key).await;

        if let Some(path) = self.lookup(key) {
            debug!(%key, "toolchain installed by a concurrent caller");
            return Ok(path);
        }

        info!(event = "toolchain.provision_started", %key);
        let started = Instant::now();
        let path = match self.installer.install(key).await {
            Ok(path) => path,
            Err(err) => {
                warn!(event = "toolchain.provision_failed", %key, error = %err);
                return Err(err);
            }
        };
        info!(
            event = "toolchain.provision_finished",
            %key,
            path = %path.display(),
            duration_ms = started.elapsed().as_millis() as u64,
        );

        self.installed
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, path.clone());
        Ok(path)
    }

    /// Current state of the entry for `key`.
    pub fn state(&self, key: ToolchainKey) -> EntryState {
        if self.lookup(key).is_some() {
            EntryState::Installed
        } else if self.locks.is_locked(&key) {
            EntryState::Installing
        } else {
            EntryState::Uninstalled
        }
    }

    /// Installed path for `key`, if any.
    pub fn lookup(&self, key: ToolchainKey) -> Option<PathBuf> {
        self.installed
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned()
    }
}

impl std::fmt::Debug for ProvisioningCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningCache")
            .field("installed", &self.installed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingInstaller {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolchainInstaller for FailingInstaller {
        async fn install(&self, key: ToolchainKey) -> Result<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ProvisionError::Http(format!("offline while fetching {key}")))
        }
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let installer = Arc::new(FailingInstaller {
            calls: AtomicU32::new(0),
        });
        let cache = ProvisioningCache::new(installer.clone());

        assert!(cache.acquire(ToolchainKey::Net9_0).await.is_err());
        assert!(cache.acquire(ToolchainKey::Net9_0).await.is_err());

        assert_eq!(installer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.state(ToolchainKey::Net9_0), EntryState::Uninstalled);
        assert!(cache.lookup(ToolchainKey::Net9_0).is_none());
    }
}
