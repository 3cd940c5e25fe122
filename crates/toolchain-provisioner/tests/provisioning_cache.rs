//! Concurrency properties of the provisioning cache.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use toolchain_provisioner::{
    EntryState, ProvisionError, ProvisioningCache, ToolchainInstaller, ToolchainKey,
};
use tracing_test::traced_test;

/// Counts installs per key and takes a little time so callers overlap.
#[derive(Default)]
struct CountingInstaller {
    net9: AtomicU32,
    net10: AtomicU32,
}

impl CountingInstaller {
    fn count(&self, key: ToolchainKey) -> u32 {
        match key {
            ToolchainKey::Net9_0 => self.net9.load(Ordering::SeqCst),
            ToolchainKey::Net10_0 => self.net10.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl ToolchainInstaller for CountingInstaller {
    async fn install(&self, key: ToolchainKey) -> Result<PathBuf, ProvisionError> {
        match key {
            ToolchainKey::Net9_0 => self.net9.fetch_add(1, Ordering::SeqCst),
            ToolchainKey::Net10_0 => self.net10.fetch_add(1, Ordering::SeqCst),
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(PathBuf::from(format!("/toolchains/{}/dotnet", key.channel())))
    }
}

/// Blocks installs of 9.0 until released; 10.0 installs immediately.
struct GatedInstaller {
    gate: Notify,
}

#[async_trait]
impl ToolchainInstaller for GatedInstaller {
    async fn install(&self, key: ToolchainKey) -> Result<PathBuf, ProvisionError> {
        if key == ToolchainKey::Net9_0 {
            self.gate.notified().await;
        }
        Ok(PathBuf::from(format!("/toolchains/{}/dotnet", key.channel())))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_installs_once() {
    let installer = Arc::new(CountingInstaller::default());
    let cache = Arc::new(ProvisioningCache::new(installer.clone()));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.acquire(ToolchainKey::Net10_0).await })
        })
        .collect();

    let mut paths = HashSet::new();
    for task in tasks {
        paths.insert(task.await.unwrap().unwrap());
    }

    assert_eq!(paths.len(), 1, "every caller must see the same install path");
    assert_eq!(installer.count(ToolchainKey::Net10_0), 1);
    assert_eq!(installer.count(ToolchainKey::Net9_0), 0);
    assert_eq!(cache.state(ToolchainKey::Net10_0), EntryState::Installed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_key_installs_once_under_mixed_load() {
    let installer = Arc::new(CountingInstaller::default());
    let cache = Arc::new(ProvisioningCache::new(installer.clone()));

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let cache = cache.clone();
            let key = ToolchainKey::ALL[i % 2];
            tokio::spawn(async move { (key, cache.acquire(key).await) })
        })
        .collect();

    for task in tasks {
        let (key, path) = task.await.unwrap();
        assert!(path.unwrap().to_string_lossy().contains(key.channel()));
    }

    assert_eq!(installer.count(ToolchainKey::Net9_0), 1);
    assert_eq!(installer.count(ToolchainKey::Net10_0), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_other_key_does_not_wait_for_slow_install() {
    let installer = Arc::new(GatedInstaller {
        gate: Notify::new(),
    });
    let cache = Arc::new(ProvisioningCache::new(installer.clone()));

    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.acquire(ToolchainKey::Net9_0).await })
    };

    // Let the 9.0 install take its key lock.
    while cache.state(ToolchainKey::Net9_0) != EntryState::Installing {
        tokio::task::yield_now().await;
    }

    let fast = tokio::time::timeout(
        Duration::from_secs(2),
        cache.acquire(ToolchainKey::Net10_0),
    )
    .await
    .expect("10.0 acquisition must not block on the 9.0 install");
    assert_eq!(fast.unwrap(), PathBuf::from("/toolchains/10.0/dotnet"));
    assert_eq!(cache.state(ToolchainKey::Net9_0), EntryState::Installing);

    installer.gate.notify_one();
    assert_eq!(
        slow.await.unwrap().unwrap(),
        PathBuf::from("/toolchains/9.0/dotnet")
    );
}

#[tokio::test]
async fn test_fresh_cache_reports_uninstalled() {
    let cache = ProvisioningCache::new(Arc::new(CountingInstaller::default()));
    for key in ToolchainKey::ALL {
        assert_eq!(cache.state(key), EntryState::Uninstalled);
    }
}

#[traced_test]
#[tokio::test]
async fn test_install_emits_lifecycle_events() {
    let cache = ProvisioningCache::new(Arc::new(CountingInstaller::default()));
    cache.acquire(ToolchainKey::Net9_0).await.unwrap();

    assert!(logs_contain("toolchain.provision_started"));
    assert!(logs_contain("toolchain.provision_finished"));
}
