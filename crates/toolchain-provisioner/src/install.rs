//! Installing a toolchain from the release catalog
//!
//! Downloads land in a private staging directory under the cache root and
//! only become visible through a single directory rename into
//! `<cache>/<sdk-version>/`. A half-extracted tree is never reachable at
//! the final path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::archive::{extract_archive, make_executable, ArchiveKind};
use crate::cache::ToolchainInstaller;
use crate::catalog::CatalogClient;
use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use crate::key::{ToolchainKey, TOOL_BINARY};
use crate::Result;

/// Installer backed by the public release catalog
pub struct ReleaseCatalogInstaller {
    config: ProvisionConfig,
    client: CatalogClient,
}

impl ReleaseCatalogInstaller {
    /// Create a new installer
    pub fn new(config: ProvisionConfig) -> Result<Self> {
        let client = CatalogClient::new(&config)?;
        Ok(ReleaseCatalogInstaller { config, client })
    }

    /// Create an installer from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ProvisionConfig::from_env())
    }

    /// Directory a given SDK version is installed into.
    pub fn install_dir(&self, sdk_version: &str) -> PathBuf {
        self.config.cache_root.join(sdk_version)
    }
}

#[async_trait]
impl ToolchainInstaller for ReleaseCatalogInstaller {
    async fn install(&self, key: ToolchainKey) -> Result<PathBuf> {
        let (version, file) = self
            .client
            .resolve_latest_sdk(key, &self.config.runtime_identifier)
            .await?;

        let final_dir = self.install_dir(version.as_str());
        let final_binary = final_dir.join(TOOL_BINARY);
        if final_binary.is_file() {
            info!(%key, sdk = %version, path = %final_binary.display(), "toolchain already on disk");
            return Ok(final_binary);
        }

        let kind = ArchiveKind::detect(&file.name)?;
        let bytes = self.client.download(&file).await?;

        let staging = self
            .config
            .staging_root()
            .join(uuid::Uuid::new_v4().simple().to_string());

        let unpack_dir = staging.clone();
        let unpacked = tokio::task::spawn_blocking(move || -> Result<()> {
            extract_archive(&bytes, kind, &unpack_dir)?;
            let binary = unpack_dir.join(TOOL_BINARY);
            if !binary.is_file() {
                return Err(ProvisionError::MissingBinary(binary));
            }
            make_executable(&binary)
        })
        .await
        .map_err(ProvisionError::from)
        .and_then(|inner| inner);

        if let Err(err) = unpacked {
            discard(&staging);
            return Err(err);
        }

        publish_install(&staging, &final_dir)
    }
}

/// Move an extracted tree from `staging` to `final_dir` and return the entry binary.
///
/// If `final_dir` already exists (another process won the race) the staged
/// copy is discarded and the existing install is used.
pub fn publish_install(staging: &Path, final_dir: &Path) -> Result<PathBuf> {
    if let Some(parent) = final_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if let Err(err) = std::fs::rename(staging, final_dir) {
        discard(staging);
        if !final_dir.exists() {
            return Err(ProvisionError::Io(err));
        }
        debug!(dest = %final_dir.display(), "install directory already published, discarded staged copy");
    }

    let binary = final_dir.join(TOOL_BINARY);
    if binary.is_file() {
        Ok(binary)
    } else {
        Err(ProvisionError::MissingBinary(binary))
    }
}

fn discard(staging: &Path) {
    if let Err(err) = std::fs::remove_dir_all(staging) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %staging.display(), error = %err, "failed to remove staging directory");
        }
    }
}
