//! SARIF diagnostics report
//!
//! Compilers write one report per build (`ErrorLog`). Two schema
//! generations are in circulation and are selected explicitly with
//! [`SarifVersion`]:
//!
//! | | 1.0 | 2.1 |
//! |---|---|---|
//! | message | `"message": "text"` | `"message": {"text": "text"}` |
//! | source | `locations[].resultFile.uri` | `locations[].physicalLocation.artifactLocation.uri` |
//!
//! Missing `runs` or `results` arrays decode as empty, and a missing
//! `level` defaults to `warning` as the SARIF schema prescribes.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ReportError;

/// SARIF schema generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SarifVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[default]
    #[serde(rename = "2.1")]
    V2_1,
}

impl SarifVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SarifVersion::V1_0 => "1.0",
            SarifVersion::V2_1 => "2.1",
        }
    }
}

impl fmt::Display for SarifVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SarifVersion {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" | "1.0" | "1.0.0" => Ok(SarifVersion::V1_0),
            "2" | "2.1" | "2.1.0" => Ok(SarifVersion::V2_1),
            other => Err(ReportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warning,
    Note,
    #[serde(alias = "pass")]
    None,
    /// SARIF 1.0 only.
    #[serde(rename = "notApplicable")]
    NotApplicable,
    /// SARIF 1.0 only.
    Open,
    /// A level neither schema version names.
    #[serde(other)]
    Other,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Note => "note",
            Level::None => "none",
            Level::NotApplicable => "notApplicable",
            Level::Open => "open",
            Level::Other => "other",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_level() -> Level {
    Level::Warning
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: Level,
    pub rule_id: String,
    pub message: String,
    pub source_file: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.rule_id, self.level, self.message)?;
        if let Some(source) = &self.source_file {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub results: Vec<Diagnostic>,
}

/// Decoded diagnostics report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub version: SarifVersion,
    pub runs: Vec<Run>,
}

impl DiagnosticsReport {
    /// Decode a report from raw bytes.
    pub fn from_slice(bytes: &[u8], version: SarifVersion) -> Result<Self, ReportError> {
        Self::decode(bytes, version).map_err(|source| ReportError::MalformedDiagnostics {
            path: "<memory>".into(),
            source,
        })
    }

    /// Load the report at `path`; `Ok(None)` when no report was written.
    pub fn load(path: &Path, version: SarifVersion) -> Result<Option<Self>, ReportError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Self::decode(&bytes, version)
            .map(Some)
            .map_err(|source| ReportError::MalformedDiagnostics {
                path: path.display().to_string(),
                source,
            })
    }

    fn decode(bytes: &[u8], version: SarifVersion) -> Result<Self, serde_json::Error> {
        let runs = match version {
            SarifVersion::V1_0 => serde_json::from_slice::<wire::v1::Log>(bytes)?
                .runs
                .into_iter()
                .map(|run| Run {
                    results: run.results.into_iter().map(Diagnostic::from).collect(),
                })
                .collect(),
            SarifVersion::V2_1 => serde_json::from_slice::<wire::v2::Log>(bytes)?
                .runs
                .into_iter()
                .map(|run| Run {
                    results: run.results.into_iter().map(Diagnostic::from).collect(),
                })
                .collect(),
        };
        Ok(DiagnosticsReport { version, runs })
    }

    /// Every diagnostic across all runs, in report order.
    pub fn all(&self) -> impl Iterator<Item = &Diagnostic> {
        self.runs.iter().flat_map(|run| run.results.iter())
    }

    pub fn len(&self) -> usize {
        self.runs.iter().map(|run| run.results.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a diagnostic with `level` (and `rule_id`, if given) exists.
    pub fn contains(&self, level: Level, rule_id: Option<&str>) -> bool {
        self.all().any(|diagnostic| {
            diagnostic.level == level && rule_id.map_or(true, |id| diagnostic.rule_id == id)
        })
    }

    pub fn has_error(&self) -> bool {
        self.contains(Level::Error, None)
    }

    pub fn has_error_rule(&self, rule_id: &str) -> bool {
        self.contains(Level::Error, Some(rule_id))
    }

    pub fn has_warning(&self) -> bool {
        self.contains(Level::Warning, None)
    }

    pub fn has_warning_rule(&self, rule_id: &str) -> bool {
        self.contains(Level::Warning, Some(rule_id))
    }

    pub fn has_note_rule(&self, rule_id: &str) -> bool {
        self.contains(Level::Note, Some(rule_id))
    }
}

/// Turn a `file://` URI into a local path; other URIs are returned as written.
pub fn uri_to_path(uri: &str) -> String {
    let Some(rest) = uri.strip_prefix("file://") else {
        return uri.to_string();
    };
    // file:///C:/src -> C:/src on Windows; file:///src -> /src elsewhere.
    let rest = if cfg!(windows) {
        rest.trim_start_matches('/')
    } else {
        rest.strip_prefix("localhost").unwrap_or(rest)
    };
    percent_decode(rest)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

impl From<wire::v1::SarifResult> for Diagnostic {
    fn from(result: wire::v1::SarifResult) -> Self {
        let source_file = result
            .locations
            .into_iter()
            .find_map(|location| location.result_file?.uri)
            .map(|uri| uri_to_path(&uri));
        Diagnostic {
            level: result.level,
            rule_id: result.rule_id,
            message: result.message,
            source_file,
        }
    }
}

impl From<wire::v2::SarifResult> for Diagnostic {
    fn from(result: wire::v2::SarifResult) -> Self {
        let source_file = result
            .locations
            .into_iter()
            .find_map(|location| location.physical_location?.artifact_location?.uri)
            .map(|uri| uri_to_path(&uri));
        Diagnostic {
            level: result.level,
            rule_id: result.rule_id,
            message: result.message.text,
            source_file,
        }
    }
}

/// On-disk shapes. Only the fields the queries need are modelled.
mod wire {
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    pub struct ArtifactLocation {
        #[serde(default)]
        pub uri: Option<String>,
    }

    pub mod v1 {
        use super::super::{default_level, Level};
        use super::ArtifactLocation;
        use serde::Deserialize;

        #[derive(Debug, Deserialize)]
        pub struct Log {
            #[serde(default)]
            pub runs: Vec<Run>,
        }

        #[derive(Debug, Deserialize)]
        pub struct Run {
            #[serde(default)]
            pub results: Vec<SarifResult>,
        }

        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct SarifResult {
            #[serde(default)]
            pub rule_id: String,
            #[serde(default = "default_level")]
            pub level: Level,
            #[serde(default)]
            pub message: String,
            #[serde(default)]
            pub locations: Vec<Location>,
        }

        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Location {
            #[serde(default)]
            pub result_file: Option<ArtifactLocation>,
        }
    }

    pub mod v2 {
        use super::super::{default_level, Level};
        use super::ArtifactLocation;
        use serde::Deserialize;

        #[derive(Debug, Deserialize)]
        pub struct Log {
            #[serde(default)]
            pub runs: Vec<Run>,
        }

        #[derive(Debug, Deserialize)]
        pub struct Run {
            #[serde(default)]
            pub results: Vec<SarifResult>,
        }

        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct SarifResult {
            #[serde(default)]
            pub rule_id: String,
            #[serde(default = "default_level")]
            pub level: Level,
            #[serde(default)]
            pub message: Message,
            #[serde(default)]
            pub locations: Vec<Location>,
        }

        #[derive(Debug, Default, Deserialize)]
        pub struct Message {
            #[serde(default)]
            pub text: String,
        }

        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct Location {
            #[serde(default)]
            pub physical_location: Option<PhysicalLocation>,
        }

        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase")]
        pub struct PhysicalLocation {
            #[serde(default)]
            pub artifact_location: Option<ArtifactLocation>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2_REPORT: &str = r#"{
      "$schema": "http://json.schemastore.org/sarif-2.1.0",
      "version": "2.1.0",
      "runs": [
        {
          "results": [
            {
              "ruleId": "RS0030",
              "level": "error",
              "message": { "text": "The symbol 'Console.WriteLine' is banned" },
              "locations": [
                { "physicalLocation": { "artifactLocation": { "uri": "file:///src/My%20App/Program.cs" } } }
              ]
            },
            { "ruleId": "CA1822", "level": "note", "message": { "text": "Mark members as static" } }
          ]
        },
        { "results": [ { "ruleId": "CS8600", "message": { "text": "null" } } ] }
      ]
    }"#;

    const V1_REPORT: &str = r#"{
      "version": "1.0.0",
      "runs": [
        {
          "results": [
            {
              "ruleId": "CS0168",
              "level": "warning",
              "message": "The variable 'x' is declared but never used",
              "locations": [ { "resultFile": { "uri": "file:///src/a.cs" } } ]
            }
          ]
        }
      ]
    }"#;

    #[test]
    fn test_v2_flattens_runs_in_order() {
        let report = DiagnosticsReport::from_slice(V2_REPORT.as_bytes(), SarifVersion::V2_1).unwrap();
        let ids: Vec<_> = report.all().map(|d| d.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["RS0030", "CA1822", "CS8600"]);
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn test_error_rule_is_not_a_warning() {
        let report = DiagnosticsReport::from_slice(V2_REPORT.as_bytes(), SarifVersion::V2_1).unwrap();
        assert!(report.has_error_rule("RS0030"));
        assert!(!report.has_warning_rule("RS0030"));
        assert!(report.has_note_rule("CA1822"));
        assert!(!report.has_error_rule("rs0030"), "rule ids match case-sensitively");
    }

    #[test]
    fn test_missing_level_defaults_to_warning() {
        let report = DiagnosticsReport::from_slice(V2_REPORT.as_bytes(), SarifVersion::V2_1).unwrap();
        assert!(report.has_warning_rule("CS8600"));
    }

    #[test]
    fn test_v2_source_file_is_decoded() {
        let report = DiagnosticsReport::from_slice(V2_REPORT.as_bytes(), SarifVersion::V2_1).unwrap();
        let first = report.all().next().unwrap();
        if cfg!(windows) {
            assert_eq!(first.source_file.as_deref(), Some("src/My App/Program.cs"));
        } else {
            assert_eq!(first.source_file.as_deref(), Some("/src/My App/Program.cs"));
        }
        assert_eq!(first.message, "The symbol 'Console.WriteLine' is banned");
    }

    #[test]
    fn test_v1_shape() {
        let report = DiagnosticsReport::from_slice(V1_REPORT.as_bytes(), SarifVersion::V1_0).unwrap();
        let only = report.all().next().unwrap();
        assert_eq!(only.level, Level::Warning);
        assert_eq!(only.message, "The variable 'x' is declared but never used");
        assert!(only.source_file.as_deref().unwrap().ends_with("src/a.cs"));
    }

    #[test]
    fn test_v1_levels_outside_the_common_set() {
        let body = r#"{
          "version": "1.0.0",
          "runs": [ { "results": [
            { "ruleId": "CA1000", "level": "notApplicable", "message": "n/a" },
            { "ruleId": "CA1001", "level": "open", "message": "review" },
            { "ruleId": "CA1002", "level": "pass", "message": "ok" },
            { "ruleId": "CA1003", "level": "informational", "message": "?" },
            { "ruleId": "RS0030", "level": "warning", "message": "banned" }
          ] } ]
        }"#;
        let report = DiagnosticsReport::from_slice(body.as_bytes(), SarifVersion::V1_0).unwrap();
        let levels: Vec<_> = report.all().map(|d| d.level).collect();
        assert_eq!(
            levels,
            vec![Level::NotApplicable, Level::Open, Level::None, Level::Other, Level::Warning]
        );
        assert!(!report.has_error());
        assert!(!report.has_warning_rule("CA1000"));
        assert!(report.has_warning_rule("RS0030"));
        assert_eq!(Level::NotApplicable.to_string(), "notApplicable");
    }

    #[test]
    fn test_empty_containers() {
        for body in [r#"{}"#, r#"{"runs": []}"#, r#"{"runs": [{}]}"#, r#"{"runs": [{"results": []}]}"#] {
            let report = DiagnosticsReport::from_slice(body.as_bytes(), SarifVersion::V2_1).unwrap();
            assert!(report.is_empty(), "{body}");
            assert!(!report.has_error());
            assert!(!report.has_warning());
        }
    }

    #[test]
    fn test_wrong_version_is_malformed() {
        let err = DiagnosticsReport::from_slice(V1_REPORT.as_bytes(), SarifVersion::V2_1).unwrap_err();
        assert!(matches!(err, ReportError::MalformedDiagnostics { .. }));
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = DiagnosticsReport::load(&dir.path().join("BuildOutput.sarif"), SarifVersion::V2_1).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_truncated_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BuildOutput.sarif");
        std::fs::write(&path, r#"{"runs": [ {"#).unwrap();
        let err = DiagnosticsReport::load(&path, SarifVersion::V2_1).unwrap_err();
        assert!(err.to_string().contains("BuildOutput.sarif"));
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("2.1".parse::<SarifVersion>().unwrap(), SarifVersion::V2_1);
        assert_eq!("1.0.0".parse::<SarifVersion>().unwrap(), SarifVersion::V1_0);
        assert!("3".parse::<SarifVersion>().is_err());
    }

    #[test]
    fn test_relative_uri_is_kept() {
        assert_eq!(uri_to_path("src/Program.cs"), "src/Program.cs");
    }
}
