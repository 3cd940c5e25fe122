//! Provisioning configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Public index of SDK release channels.
pub const DEFAULT_RELEASE_INDEX: &str =
    "https://builds.dotnet.microsoft.com/dotnet/release-metadata/releases-index.json";

/// Provisioning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Root of the version-addressed install cache
    pub cache_root: PathBuf,
    /// URL of the release channel index
    pub catalog_url: String,
    /// Runtime identifier used to pick the platform archive (e.g. "linux-x64")
    pub runtime_identifier: String,
    /// User agent for catalog and download requests
    pub user_agent: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            cache_root: std::env::var_os("BUILDCHECK_TOOLCHAIN_CACHE")
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_root),
            catalog_url: std::env::var("BUILDCHECK_RELEASE_INDEX")
                .unwrap_or_else(|_| DEFAULT_RELEASE_INDEX.to_string()),
            runtime_identifier: current_runtime_identifier(),
            user_agent: format!("buildcheck-toolchain-provisioner/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ProvisionConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Use a specific cache root
    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    /// Use a specific release index
    pub fn with_catalog_url(mut self, url: &str) -> Self {
        self.catalog_url = url.to_string();
        self
    }

    /// Override the detected runtime identifier
    pub fn with_runtime_identifier(mut self, rid: &str) -> Self {
        self.runtime_identifier = rid.to_string();
        self
    }

    /// Scratch directory for in-flight downloads.
    ///
    /// Lives under the cache root so the final move stays on one filesystem.
    pub fn staging_root(&self) -> PathBuf {
        self.cache_root.join(".staging")
    }
}

fn default_cache_root() -> PathBuf {
    let base = if cfg!(windows) {
        std::env::var_os("LOCALAPPDATA").map(PathBuf::from)
    } else {
        std::env::var_os("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
    };

    base.unwrap_or_else(std::env::temp_dir)
        .join("buildcheck")
        .join("toolchains")
}

/// Runtime identifier of the platform this binary was compiled for.
pub fn current_runtime_identifier() -> String {
    let os = match std::env::consts::OS {
        "windows" => "win",
        "macos" => "osx",
        "linux" if cfg!(target_env = "musl") => "linux-musl",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "x64",
        "aarch64" => "arm64",
        "x86" => "x86",
        "arm" => "arm",
        other => other,
    };
    format!("{os}-{arch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = ProvisionConfig::default()
            .with_cache_root("/tmp/toolchains")
            .with_catalog_url("http://localhost/index.json")
            .with_runtime_identifier("linux-arm64");

        assert_eq!(config.cache_root, PathBuf::from("/tmp/toolchains"));
        assert_eq!(config.catalog_url, "http://localhost/index.json");
        assert_eq!(config.runtime_identifier, "linux-arm64");
        assert_eq!(config.staging_root(), PathBuf::from("/tmp/toolchains/.staging"));
    }

    #[test]
    fn test_runtime_identifier_shape() {
        let rid = current_runtime_identifier();
        assert!(rid.contains('-'));
        assert!(!rid.starts_with('-'));
    }
}
