//! Buildcheck-Core: sandboxed build verification for SDK packages
//!
//! Tests create a [`BuildOrchestrator`] per simulated project, author files
//! into its sandbox and run the provisioned toolchain. Each run returns a
//! [`BuildOutcome`] with the exit code, captured output, the SARIF
//! diagnostics report and views over the binary build-event log.
//!
//! ## Shared state
//!
//! - [`ProvisioningCache`](toolchain_provisioner::ProvisioningCache): one
//!   per process, installs each toolchain version once.
//! - [`ArtifactFixture`]: one per process, prepares the package feed once.
//!
//! Both are built at test-run bootstrap and passed in by `Arc`.

pub mod artifacts;
pub mod env_policy;
pub mod error;
pub mod feed;
pub mod obs;
pub mod orchestrator;
pub mod outcome;
pub mod process;
pub mod project;
pub mod report;
pub mod sandbox;
pub mod telemetry;

pub use artifacts::{
    find_repository_root, ArtifactConfig, ArtifactFixture, ArtifactSource, DotnetPackager,
    Packager, DEFAULT_PACKAGE_VERSION,
};
pub use env_policy::{ambient_environment, DenyRule, EnvPolicy, RedactionMode};
pub use error::{ArtifactError, HarnessError, ProcessError, ReportError};
pub use feed::PackageFeed;
pub use obs::{
    emit_artifacts_initialized, emit_cleanup_failed, emit_invocation_finished,
    emit_invocation_started, InvocationSpan,
};
pub use orchestrator::{
    unresolved_toolchain_line, BuildOrchestrator, InvocationLayout, OrchestratorConfig, NO_ARGS,
    NO_ENV,
};
pub use outcome::BuildOutcome;
pub use process::{execute, InvocationResult, InvocationSpec, OutputLine, OutputStream};
pub use project::{directory_build_props, ProjectFile, SdkImportStyle, SdkReference};
pub use report::{
    BinlogDecoder, BuildEventLog, Diagnostic, DiagnosticsReport, EventLogDecoder, Level,
    LogWriter, SarifVersion,
};
pub use sandbox::Sandbox;
pub use telemetry::init_tracing;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;
