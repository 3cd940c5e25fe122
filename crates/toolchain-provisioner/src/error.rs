//! Error types for toolchain-provisioner

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while provisioning a toolchain
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Unknown toolchain version identifier
    #[error("Unsupported toolchain version: {0}")]
    UnsupportedVersion(String),

    /// The release catalog has no channel for the requested version
    #[error("Release channel {channel} not found in catalog")]
    ChannelNotFound { channel: String },

    /// The channel's latest release is missing from its release list
    #[error("Release {release} not listed for channel {channel}")]
    ReleaseNotFound { channel: String, release: String },

    /// No SDK archive for this platform
    #[error("No SDK archive for runtime {rid} in release {release}")]
    NoPlatformArchive { release: String, rid: String },

    /// Archive extension is neither zip nor tar.gz
    #[error("Unsupported archive format: {0}")]
    UnsupportedArchive(String),

    /// Downloaded bytes do not match the catalog hash
    #[error("Archive hash mismatch for {file}: expected {expected}, got {actual}")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// Archive could not be unpacked
    #[error("Archive extraction failed: {0}")]
    Extraction(String),

    /// The install directory could not be published and nothing usable is there
    #[error("Toolchain binary missing after install: {0}")]
    MissingBinary(PathBuf),

    /// HTTP error (catalog or download)
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task failed to complete
    #[error("Install task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for ProvisionError {
    fn from(err: reqwest::Error) -> Self {
        ProvisionError::Http(err.to_string())
    }
}

impl From<zip::result::ZipError> for ProvisionError {
    fn from(err: zip::result::ZipError) -> Self {
        ProvisionError::Extraction(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ProvisionError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProvisionError::Task(err.to_string())
    }
}
