//! buildcheck - build-verification harness CLI
//!
//! Operator commands around the harness libraries.
//!
//! ## Commands
//!
//! - `provision`: install an SDK toolchain into the shared cache
//! - `sarif`: summarize a diagnostics report
//! - `binlog`: summarize a binary build-event log
//! - `pack`: fill a directory with the packages under test

use anyhow::{Context, Result};
use buildcheck_core::{
    ArtifactConfig, ArtifactFixture, BuildEventLog, Diagnostic, DiagnosticsReport, DotnetPackager,
    Level, SarifVersion,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toolchain_provisioner::{ProvisionConfig, ProvisioningCache, ReleaseCatalogInstaller, ToolchainKey};
use tracing::{info, Level as LogLevel};

#[derive(Parser, Debug)]
#[command(name = "buildcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-verification harness for SDK packages", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install an SDK toolchain and print the path of its entry binary
    Provision {
        /// SDK major version (e.g. 9.0, 10.0, net10.0)
        version: String,

        /// Toolchain cache directory
        #[arg(long, env = "BUILDCHECK_TOOLCHAIN_CACHE")]
        cache_dir: Option<PathBuf>,

        /// Release index URL
        #[arg(long, env = "BUILDCHECK_RELEASE_INDEX")]
        catalog_url: Option<String>,
    },

    /// Summarize a SARIF diagnostics report
    Sarif {
        /// Path to the report
        file: PathBuf,

        /// SARIF version the report was written in (1.0 or 2.1)
        #[arg(long, default_value = "2.1")]
        format: String,

        /// Only show diagnostics with this rule id
        #[arg(long)]
        rule: Option<String>,

        /// Exit non-zero when the report contains an error
        #[arg(long)]
        fail_on_error: bool,
    },

    /// Summarize a binary build-event log
    Binlog {
        /// Path to the log
        file: PathBuf,

        /// Print the value of this evaluated property (repeatable)
        #[arg(short, long)]
        property: Vec<String>,
    },

    /// Pack the packages under test, or copy prebuilt ones, into a directory
    Pack {
        /// Destination directory
        #[arg(short, long)]
        output: PathBuf,

        /// Directory scanned for packaging inputs
        #[arg(long, env = "BUILDCHECK_PACKAGE_INPUTS")]
        inputs: Option<PathBuf>,

        /// Copy artifacts from this directory instead of packing
        #[arg(long)]
        prebuilt: Option<PathBuf>,

        /// Version stamped on packed artifacts
        #[arg(long, env = "PACKAGE_VERSION")]
        package_version: Option<String>,

        /// Build tool used for packing
        #[arg(long, default_value = "dotnet")]
        dotnet: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::DEBUG
    } else {
        LogLevel::INFO
    };
    buildcheck_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Provision {
            version,
            cache_dir,
            catalog_url,
        } => cmd_provision(&version, cache_dir, catalog_url.as_deref(), cli.json).await,
        Commands::Sarif {
            file,
            format,
            rule,
            fail_on_error,
        } => cmd_sarif(&file, &format, rule.as_deref(), fail_on_error, cli.json),
        Commands::Binlog { file, property } => cmd_binlog(&file, &property, cli.json),
        Commands::Pack {
            output,
            inputs,
            prebuilt,
            package_version,
            dotnet,
        } => {
            cmd_pack(
                &output,
                inputs,
                prebuilt,
                package_version,
                dotnet,
                cli.json,
            )
            .await
        }
    }
}

/// Install the toolchain for `version` through the provisioning cache
async fn cmd_provision(
    version: &str,
    cache_dir: Option<PathBuf>,
    catalog_url: Option<&str>,
    json: bool,
) -> Result<()> {
    let key: ToolchainKey = version
        .parse()
        .with_context(|| format!("Unsupported toolchain version: {version}"))?;

    let mut config = ProvisionConfig::from_env();
    if let Some(dir) = cache_dir {
        config = config.with_cache_root(dir);
    }
    if let Some(url) = catalog_url {
        config = config.with_catalog_url(url);
    }
    info!(%key, cache = %config.cache_root.display(), "provisioning toolchain");

    let installer = ReleaseCatalogInstaller::new(config).context("Failed to create installer")?;
    let cache = ProvisioningCache::new(Arc::new(installer));
    let binary = cache
        .acquire(key)
        .await
        .with_context(|| format!("Failed to provision {key}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "toolchain": key.to_string(), "path": binary })
        );
    } else {
        println!("{}", binary.display());
    }
    Ok(())
}

/// Counts and filtered findings of one report.
#[derive(Debug, Serialize)]
struct SarifSummary<'a> {
    version: SarifVersion,
    errors: usize,
    warnings: usize,
    notes: usize,
    diagnostics: Vec<&'a Diagnostic>,
}

fn summarize_report<'a>(report: &'a DiagnosticsReport, rule: Option<&str>) -> SarifSummary<'a> {
    let count = |level: Level| report.all().filter(|d| d.level == level).count();
    SarifSummary {
        version: report.version,
        errors: count(Level::Error),
        warnings: count(Level::Warning),
        notes: count(Level::Note),
        diagnostics: report
            .all()
            .filter(|d| rule.map_or(true, |id| d.rule_id == id))
            .collect(),
    }
}

fn cmd_sarif(
    file: &Path,
    format: &str,
    rule: Option<&str>,
    fail_on_error: bool,
    json: bool,
) -> Result<()> {
    let version: SarifVersion = format.parse()?;
    let report = DiagnosticsReport::load(file, version)?
        .with_context(|| format!("Diagnostics report not found: {}", file.display()))?;

    let summary = summarize_report(&report, rule);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{} (SARIF {}): {} error(s), {} warning(s), {} note(s)",
            file.display(),
            summary.version,
            summary.errors,
            summary.warnings,
            summary.notes
        );
        for diagnostic in &summary.diagnostics {
            println!("  {diagnostic}");
        }
    }

    if fail_on_error && report.has_error() {
        anyhow::bail!("Report contains {} error(s)", summary.errors);
    }
    Ok(())
}

fn read_event_log(file: &Path) -> Result<BuildEventLog> {
    let bytes =
        std::fs::read(file).with_context(|| format!("Failed to read event log: {}", file.display()))?;
    buildcheck_core::report::binlog::decode(&bytes)
        .with_context(|| format!("Failed to decode event log: {}", file.display()))
}

fn cmd_binlog(file: &Path, properties: &[String], json: bool) -> Result<()> {
    let log = read_event_log(file)?;

    if !properties.is_empty() {
        for name in properties {
            let value = log.property(name);
            if json {
                println!("{}", serde_json::json!({ "name": name, "value": value }));
            } else {
                println!("{name}={}", value.unwrap_or(""));
            }
        }
        return Ok(());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&log)?);
        return Ok(());
    }

    println!("Format version: {}", log.format_version);
    println!("Source files ({}):", log.source_files.len());
    for path in &log.source_files {
        println!("  {}", path.display());
    }
    println!("Targets ({}):", log.targets.len());
    for target in &log.targets {
        println!("  {target}");
    }
    println!("Properties: {}", log.properties.len());
    Ok(())
}

/// Fill a scratch artifact directory and copy its contents to `output`
async fn cmd_pack(
    output: &Path,
    inputs: Option<PathBuf>,
    prebuilt: Option<PathBuf>,
    package_version: Option<String>,
    dotnet: PathBuf,
    json: bool,
) -> Result<()> {
    let mut config = match prebuilt {
        Some(dir) => ArtifactConfig::prebuilt(dir),
        None => match inputs {
            Some(dir) => ArtifactConfig::local(dir),
            None => ArtifactConfig {
                ci: false,
                ..ArtifactConfig::from_env()
            },
        },
    };
    if let Some(version) = package_version {
        config = config.with_package_version(version);
    }

    let fixture = ArtifactFixture::new(config, Arc::new(DotnetPackager::new(dotnet)))?;
    fixture.initialize().await?;

    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let copied = copy_artifacts(fixture.path(), output)?;

    if json {
        println!("{}", serde_json::json!({ "output": output, "artifacts": copied }));
    } else {
        for name in &copied {
            println!("{}", output.join(name).display());
        }
    }
    Ok(())
}

/// Copy every file directly under `from` into `to`; returns the copied names, sorted.
fn copy_artifacts(from: &Path, to: &Path) -> Result<Vec<String>> {
    let mut copied = Vec::new();
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        std::fs::copy(entry.path(), to.join(entry.file_name()))?;
        copied.push(entry.file_name().to_string_lossy().into_owned());
    }
    copied.sort();
    Ok(copied)
}
