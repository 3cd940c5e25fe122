//! Aggregate result of one sandboxed build invocation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::process::{InvocationResult, OutputLine};
use crate::report::{BuildEventLog, Diagnostic, DiagnosticsReport};

/// Everything a test can assert on after a build: exit code, captured
/// output, diagnostics, event-log views and the side-channel file.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    invocation: InvocationResult,
    diagnostics: Option<DiagnosticsReport>,
    event_log: BuildEventLog,
    event_log_bytes: Vec<u8>,
    side_channel: Option<String>,
}

impl BuildOutcome {
    pub fn new(
        invocation: InvocationResult,
        diagnostics: Option<DiagnosticsReport>,
        event_log: BuildEventLog,
        event_log_bytes: Vec<u8>,
        side_channel: Option<String>,
    ) -> Self {
        BuildOutcome {
            invocation,
            diagnostics,
            event_log,
            event_log_bytes,
            side_channel,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.invocation.exit_code
    }

    pub fn succeeded(&self) -> bool {
        self.invocation.succeeded()
    }

    pub fn invocation(&self) -> &InvocationResult {
        &self.invocation
    }

    pub fn output(&self) -> &[OutputLine] {
        &self.invocation.output
    }

    /// Whether any captured line contains `needle` (ordinal comparison).
    pub fn output_contains(&self, needle: &str) -> bool {
        self.invocation
            .output
            .iter()
            .any(|line| line.text.contains(needle))
    }

    pub fn output_does_not_contain(&self, needle: &str) -> bool {
        !self.output_contains(needle)
    }

    /// The diagnostics report, if the build wrote one.
    pub fn diagnostics(&self) -> Option<&DiagnosticsReport> {
        self.diagnostics.as_ref()
    }

    /// Diagnostics across all runs; empty when no report was written.
    pub fn all_diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().flat_map(|report| report.all())
    }

    pub fn has_error(&self) -> bool {
        self.diagnostics.as_ref().is_some_and(DiagnosticsReport::has_error)
    }

    pub fn has_error_rule(&self, rule_id: &str) -> bool {
        self.diagnostics
            .as_ref()
            .is_some_and(|report| report.has_error_rule(rule_id))
    }

    pub fn has_warning(&self) -> bool {
        self.diagnostics
            .as_ref()
            .is_some_and(DiagnosticsReport::has_warning)
    }

    pub fn has_warning_rule(&self, rule_id: &str) -> bool {
        self.diagnostics
            .as_ref()
            .is_some_and(|report| report.has_warning_rule(rule_id))
    }

    pub fn has_note_rule(&self, rule_id: &str) -> bool {
        self.diagnostics
            .as_ref()
            .is_some_and(|report| report.has_note_rule(rule_id))
    }

    pub fn event_log(&self) -> &BuildEventLog {
        &self.event_log
    }

    /// Raw event-log bytes, for attaching to test reports.
    pub fn event_log_bytes(&self) -> &[u8] {
        &self.event_log_bytes
    }

    /// Full paths of the source files referenced by the build.
    pub fn referenced_files(&self) -> &BTreeSet<PathBuf> {
        &self.event_log.source_files
    }

    pub fn references_file(&self, path: impl AsRef<Path>) -> bool {
        self.event_log.contains_source_file(path)
    }

    pub fn is_target_executed(&self, target: &str) -> bool {
        self.event_log.is_target_executed(target)
    }

    /// Evaluated value of an MSBuild property.
    pub fn property_value(&self, name: &str) -> Option<&str> {
        self.event_log.property(name)
    }

    /// Contents of the side-channel diagnostic file, if the tool wrote one.
    pub fn side_channel(&self) -> Option<&str> {
        self.side_channel.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::OutputStream;
    use crate::report::SarifVersion;

    fn outcome(diagnostics: Option<DiagnosticsReport>) -> BuildOutcome {
        let invocation = InvocationResult {
            exit_code: 0,
            output: vec![
                OutputLine {
                    stream: OutputStream::Stdout,
                    text: "Build succeeded.".into(),
                },
                OutputLine {
                    stream: OutputStream::Stderr,
                    text: "warning RS0030: banned".into(),
                },
            ],
            started_at: chrono::Utc::now(),
            duration_ms: 12,
        };
        BuildOutcome::new(invocation, diagnostics, BuildEventLog::default(), Vec::new(), None)
    }

    #[test]
    fn test_output_queries_span_both_streams() {
        let outcome = outcome(None);
        assert!(outcome.output_contains("Build succeeded"));
        assert!(outcome.output_contains("RS0030"));
        assert!(outcome.output_does_not_contain("error"));
        assert!(!outcome.output_contains("build succeeded"), "comparison is ordinal");
    }

    #[test]
    fn test_missing_report_answers_false() {
        let outcome = outcome(None);
        assert!(!outcome.has_error());
        assert!(!outcome.has_warning());
        assert!(!outcome.has_note_rule("CA1822"));
        assert_eq!(outcome.all_diagnostics().count(), 0);
    }

    #[test]
    fn test_predicates_delegate_to_report() {
        let report = DiagnosticsReport::from_slice(
            br#"{"runs":[{"results":[{"ruleId":"RS0030","level":"warning","message":{"text":"x"}}]}]}"#,
            SarifVersion::V2_1,
        )
        .unwrap();
        let outcome = outcome(Some(report));
        assert!(outcome.has_warning());
        assert!(outcome.has_warning_rule("RS0030"));
        assert!(!outcome.has_error_rule("RS0030"));
    }
}
