//! Parsers for the byproducts of a build invocation.
//!
//! Both parsers are pure: they take bytes already read from disk and
//! return an in-memory model. A well-formed but empty container decodes to
//! an empty model.

pub mod binlog;
pub mod sarif;

pub use binlog::{BinlogDecoder, BuildEventLog, EventLogDecoder, LogWriter};
pub use sarif::{Diagnostic, DiagnosticsReport, Level, Run, SarifVersion};
