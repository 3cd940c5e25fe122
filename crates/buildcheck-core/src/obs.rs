//! Structured lifecycle events for sandboxed build invocations.
//!
//! Every emitter logs one event with an `event = "..."` field so log
//! pipelines can filter on it. Toolchain provisioning events
//! (`toolchain.provision_*`) are emitted by the provisioning cache itself.
//!
//! For JSON output, initialise tracing with
//! [`init_tracing(true, ..)`](crate::telemetry::init_tracing).

use std::path::Path;

use tracing::{info, warn};

/// RAII guard tagging everything logged during one invocation with its sandbox.
///
/// ```ignore
/// let _span = InvocationSpan::enter("buildcheck-a1b2c3", "build");
/// ```
pub struct InvocationSpan {
    _span: tracing::span::EnteredSpan,
}

impl InvocationSpan {
    pub fn enter(sandbox_id: &str, command: &str) -> Self {
        let span = tracing::info_span!(
            "buildcheck.invocation",
            sandbox_id = %sandbox_id,
            command = %command,
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: the external tool is about to start.
pub fn emit_invocation_started(sandbox_id: &str, program: &Path, arg_count: usize) {
    info!(
        event = "invocation.started",
        sandbox_id = %sandbox_id,
        program = %program.display(),
        arg_count = arg_count,
    );
}

/// Emit event: the external tool exited.
pub fn emit_invocation_finished(
    sandbox_id: &str,
    exit_code: i32,
    line_count: usize,
    duration_ms: u64,
) {
    info!(
        event = "invocation.finished",
        sandbox_id = %sandbox_id,
        exit_code = exit_code,
        line_count = line_count,
        duration_ms = duration_ms,
    );
}

/// Emit event: the shared artifact directory is ready.
pub fn emit_artifacts_initialized(source: &str, dir: &Path, count: usize) {
    info!(
        event = "artifacts.initialized",
        source = %source,
        dir = %dir.display(),
        count = count,
    );
}

/// Emit event: a sandbox or artifact directory could not be removed (warning level).
pub fn emit_cleanup_failed(path: &Path, error: &dyn std::fmt::Display) {
    warn!(event = "sandbox.cleanup_failed", path = %path.display(), error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_span_enter() {
        let _span = InvocationSpan::enter("buildcheck-test", "build");
    }
}
