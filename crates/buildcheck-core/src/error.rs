//! Error types for buildcheck-core

use std::path::PathBuf;

use thiserror::Error;
use toolchain_provisioner::ProvisionError;

/// Errors from launching or capturing an external process
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The executable could not be started
    #[error("Failed to start {program}: {source}")]
    Start {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading output or waiting for exit failed
    #[error("Process capture failed: {0}")]
    Capture(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for ProcessError {
    fn from(err: tokio::task::JoinError) -> Self {
        ProcessError::Capture(err.to_string())
    }
}

/// Errors from decoding build byproducts
#[derive(Error, Debug)]
pub enum ReportError {
    /// Diagnostics report is present but not valid JSON of the expected shape
    #[error("Malformed diagnostics report {path}: {source}")]
    MalformedDiagnostics {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Unknown diagnostics format version
    #[error("Unsupported diagnostics format version: {0}")]
    UnsupportedFormat(String),

    /// Build event log container or record framing is broken
    #[error("Invalid build event log: {0}")]
    InvalidEventLog(String),

    /// Build event log was written by a format too old to decode
    #[error("Unsupported build event log version {version} (minimum {minimum})")]
    UnsupportedEventLogVersion { version: i32, minimum: i32 },

    /// Embedded archive could not be read or written
    #[error("Embedded archive error: {0}")]
    Archive(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ReportError {
    fn from(err: zip::result::ZipError) -> Self {
        ReportError::Archive(err.to_string())
    }
}

/// Errors from preparing the shared artifact directory
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// CI mode was requested but no prebuilt directory was supplied
    #[error("CI mode requires a prebuilt artifact directory (set BUILDCHECK_ARTIFACT_DIR)")]
    PrebuiltDirNotSet,

    /// The supplied prebuilt directory does not exist
    #[error("Prebuilt artifact directory not found: {0}")]
    PrebuiltDirMissing(PathBuf),

    /// The supplied prebuilt directory holds no artifacts
    #[error("No *.{extension} artifacts in {dir}")]
    NoArtifacts { dir: PathBuf, extension: String },

    /// No packaging inputs were discovered
    #[error("No *.{extension} packaging inputs in {dir}")]
    NoInputs { dir: PathBuf, extension: String },

    /// The packaging tool returned a non-zero status
    #[error("Packaging {input} failed with exit code {exit_code}:\n{output}")]
    PackFailed {
        input: PathBuf,
        exit_code: i32,
        output: String,
    },

    /// The packaging tool could not be run
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a sandboxed build invocation
///
/// Every fatal category of the lower layers is wrapped transparently so a
/// single `?` carries it to the test unmodified.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    /// The build exited without writing the mandatory event log
    #[error("Build event log missing after the process exited: {0}")]
    MissingEventLog(PathBuf),

    /// The build could not resolve the requested toolchain or SDK at all
    #[error("Toolchain {expected} could not be resolved by the build: {line}")]
    ToolchainUnresolved { expected: String, line: String },

    /// A sandbox-relative path tried to leave the sandbox
    #[error("Path escapes the sandbox root: {0}")]
    PathOutsideSandbox(PathBuf),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
