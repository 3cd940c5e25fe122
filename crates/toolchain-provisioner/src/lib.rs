//! Toolchain-Provisioner: SDK toolchain installation for buildcheck
//!
//! This crate makes a given SDK major version locally runnable. It
//! resolves the newest SDK build for a channel from the public release
//! catalog, downloads the archive for the current platform, extracts it
//! and publishes it into a version-addressed cache directory.
//!
//! ## Concurrency
//!
//! [`ProvisioningCache`] installs each [`ToolchainKey`] at most once per
//! process. Locks are held per key, so different versions install in
//! parallel.

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod install;
pub mod key;
pub mod keyed_lock;

pub use archive::{extract_archive, ArchiveKind};
pub use cache::{EntryState, ProvisioningCache, ToolchainInstaller};
pub use catalog::{CatalogClient, ReleaseFile, SdkVersion};
pub use config::{current_runtime_identifier, ProvisionConfig};
pub use error::ProvisionError;
pub use install::{publish_install, ReleaseCatalogInstaller};
pub use key::{ToolchainKey, TOOL_BINARY};
pub use keyed_lock::KeyedLock;

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
