//! Log output for the `buildcheck` CLI and for harness test runs.
//!
//! Logs always go to stderr; stdout belongs to command results such as
//! `buildcheck sarif --json`. Only the first [`init_tracing`] call in a
//! process installs anything.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// The release-catalog download logs every connection at debug level.
const HTTP_DIRECTIVES: &str = "hyper=warn,hyper_util=warn,reqwest=warn";

/// Install the process-wide subscriber, as JSON lines when `json` is set.
///
/// `RUST_LOG` overrides `level` and the HTTP client quieting entirely.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let output = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output = if json {
        output.json().boxed()
    } else {
        output.boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .ok();
}

fn default_directives(level: Level) -> String {
    format!("{},{HTTP_DIRECTIVES}", level.as_str().to_ascii_lowercase())
}
