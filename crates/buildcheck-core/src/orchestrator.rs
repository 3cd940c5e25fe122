//! Sandboxed build invocations
//!
//! A [`BuildOrchestrator`] owns one [`Sandbox`] and runs the provisioned
//! toolchain inside it. Every [`run`](BuildOrchestrator::run) follows the
//! same protocol:
//!
//! 1. acquire the toolchain from the shared [`ProvisioningCache`];
//! 2. derive the child environment from the [`EnvPolicy`];
//! 3. append the event-log flag;
//! 4. run with the sandbox as working directory, capturing output;
//! 5. fail fast if the build could not resolve the toolchain or SDK;
//! 6. load the diagnostics report if one was written;
//! 7. load the mandatory event log;
//! 8. read the side-channel file if one was written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use toolchain_provisioner::{ProvisioningCache, SdkVersion, ToolchainKey};
use tracing::{debug, trace};

use crate::env_policy::{ambient_environment, EnvPolicy};
use crate::error::HarnessError;
use crate::feed::{PackageFeed, CONFIG_FILE_NAME};
use crate::obs::{self, InvocationSpan};
use crate::outcome::BuildOutcome;
use crate::process::{self, InvocationResult, InvocationSpec};
use crate::project::{directory_build_props, ProjectFile, SdkImportStyle, SdkReference, DIRECTORY_BUILD_PROPS};
use crate::report::{BinlogDecoder, DiagnosticsReport, EventLogDecoder, SarifVersion};
use crate::sandbox::{self, Sandbox};
use crate::Result;

/// Empty argument list for [`BuildOrchestrator::run`] and the verbs.
pub const NO_ARGS: [&str; 0] = [];
/// Empty override list for [`BuildOrchestrator::run`] and the verbs.
pub const NO_ENV: [(&str, &str); 0] = [];

const EVENT_LOG_PLACEHOLDER: &str = "{path}";

/// File names and flags the orchestrator relies on inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationLayout {
    pub diagnostics_file: String,
    pub diagnostics_format: SarifVersion,
    pub event_log_file: String,
    /// Trailing argument; `{path}` is replaced with the absolute event-log path.
    pub event_log_flag: String,
    pub side_channel_var: String,
    pub side_channel_file: String,
    pub step_summary_file: String,
}

impl Default for InvocationLayout {
    fn default() -> Self {
        InvocationLayout {
            diagnostics_file: "BuildOutput.sarif".to_string(),
            diagnostics_format: SarifVersion::V2_1,
            event_log_file: "msbuild.binlog".to_string(),
            event_log_flag: format!("/bl:{EVENT_LOG_PLACEHOLDER}"),
            side_channel_var: "VSTEST_DIAG".to_string(),
            side_channel_file: "vstest.diag.txt".to_string(),
            step_summary_file: "GITHUB_STEP_SUMMARY".to_string(),
        }
    }
}

/// Everything that parameterises one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub toolchain: ToolchainKey,
    /// Shared artifact directory served as the local package feed.
    pub artifact_dir: PathBuf,
    pub sdk: SdkReference,
    pub import_style: SdkImportStyle,
    /// Package id patterns routed to the artifact directory.
    pub package_patterns: Vec<String>,
    pub env_policy: EnvPolicy,
    pub layout: InvocationLayout,
    /// Parent of the sandbox directory; the system temp dir when `None`.
    pub sandbox_parent: Option<PathBuf>,
    /// Write a `global.json` pinning the provisioned SDK unless the test wrote one.
    pub pin_sdk: bool,
    /// Inherited environment seen by the policy; the live process environment when `None`.
    pub ambient: Option<Vec<(String, String)>>,
}

impl OrchestratorConfig {
    pub fn new(toolchain: ToolchainKey, artifact_dir: impl Into<PathBuf>, sdk: SdkReference) -> Self {
        let package_patterns = vec![format!("{}*", sdk.name)];
        OrchestratorConfig {
            toolchain,
            artifact_dir: artifact_dir.into(),
            sdk,
            import_style: SdkImportStyle::default(),
            package_patterns,
            env_policy: EnvPolicy::default(),
            layout: InvocationLayout::default(),
            sandbox_parent: None,
            pin_sdk: true,
            ambient: None,
        }
    }

    pub fn with_import_style(mut self, style: SdkImportStyle) -> Self {
        self.import_style = style;
        self
    }

    pub fn with_env_policy(mut self, policy: EnvPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    pub fn with_layout(mut self, layout: InvocationLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_sandbox_parent(mut self, parent: impl Into<PathBuf>) -> Self {
        self.sandbox_parent = Some(parent.into());
        self
    }

    pub fn with_pin_sdk(mut self, pin: bool) -> Self {
        self.pin_sdk = pin;
        self
    }

    /// Use a fixed inherited environment instead of reading the process environment per run.
    pub fn with_ambient<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.ambient = Some(
            vars.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        );
        self
    }
}

/// Drives the external build tool inside one sandbox.
pub struct BuildOrchestrator {
    sandbox: Sandbox,
    provisioning: Arc<ProvisioningCache>,
    decoder: Arc<dyn EventLogDecoder>,
    config: OrchestratorConfig,
    step_summary: PathBuf,
}

impl BuildOrchestrator {
    /// Create the sandbox, its package feed config and an empty step summary.
    pub fn new(provisioning: Arc<ProvisioningCache>, config: OrchestratorConfig) -> Result<Self> {
        let sandbox = match &config.sandbox_parent {
            Some(parent) => Sandbox::create_in(parent)?,
            None => Sandbox::create()?,
        };

        let feed = PackageFeed::new(&config.artifact_dir, config.package_patterns.iter().cloned());
        sandbox.add_file(CONFIG_FILE_NAME, &feed.render())?;
        let step_summary = sandbox.add_empty_file(&config.layout.step_summary_file)?;

        Ok(BuildOrchestrator {
            sandbox,
            provisioning,
            decoder: Arc::new(BinlogDecoder),
            config,
            step_summary,
        })
    }

    /// Replace the event-log decoder.
    pub fn with_decoder(mut self, decoder: Arc<dyn EventLogDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn add_file(&self, relative: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        self.sandbox.add_file(relative, content)
    }

    /// A project builder preconfigured with this orchestrator's SDK, import
    /// style and diagnostics layout.
    pub fn project(&self) -> ProjectFile {
        ProjectFile::new(self.config.sdk.clone())
            .import_style(self.config.import_style)
            .error_log(
                self.config.layout.diagnostics_file.clone(),
                self.config.layout.diagnostics_format,
            )
    }

    /// Write every file of `project` into the sandbox; returns the project path.
    pub fn add_project(&self, project: &ProjectFile) -> Result<PathBuf> {
        let rendered = project.render();
        if let Some((name, content)) = &rendered.directory_build_props {
            self.sandbox.add_file(name, content)?;
        }
        let (name, content) = &rendered.project;
        self.sandbox.add_file(name, content)
    }

    /// Write `Directory.Build.props`, importing the SDK there when the
    /// import style requires it.
    pub fn add_directory_build_props(&self, pre_sdk: &str, post_sdk: &str) -> Result<PathBuf> {
        let sdk = (self.config.import_style == SdkImportStyle::DirectoryBuildProps)
            .then_some(&self.config.sdk);
        self.sandbox
            .add_file(DIRECTORY_BUILD_PROPS, &directory_build_props(sdk, pre_sdk, post_sdk))
    }

    /// Variables that make the build believe it runs in a GitHub workflow.
    pub fn github_environment(&self) -> Vec<(String, String)> {
        vec![
            ("GITHUB_ACTIONS".to_string(), "true".to_string()),
            (
                "GITHUB_STEP_SUMMARY".to_string(),
                self.step_summary.display().to_string(),
            ),
        ]
    }

    /// Contents of the step summary file, if it still exists.
    pub fn step_summary(&self) -> Result<Option<String>> {
        sandbox::read_optional(&self.step_summary)
    }

    /// Run `command` with `args` and environment `overrides`.
    pub async fn run<A, S, E, K, V>(&self, command: &str, args: A, overrides: E) -> Result<BuildOutcome>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let _span = InvocationSpan::enter(self.sandbox.id(), command);
        let layout = &self.config.layout;

        let program = self.provisioning.acquire(self.config.toolchain).await?;
        if self.config.pin_sdk {
            self.pin_sdk_version(&program)?;
        }

        let event_log_path = self.sandbox.path(&layout.event_log_file)?;
        let diagnostics_path = self.sandbox.path(&layout.diagnostics_file)?;
        let side_channel_path = self.sandbox.path(&layout.side_channel_file)?;
        let spec = self.invocation_spec(program, command, args, overrides, &event_log_path)?;

        // Byproducts of an earlier run must not be mistaken for this one's.
        for stale in [&event_log_path, &diagnostics_path, &side_channel_path] {
            remove_stale(stale)?;
        }

        obs::emit_invocation_started(self.sandbox.id(), &spec.program, spec.args.len());
        let result = process::execute(&spec).await?;
        obs::emit_invocation_finished(
            self.sandbox.id(),
            result.exit_code,
            result.output.len(),
            result.duration_ms,
        );
        for line in &result.output {
            trace!(stream = ?line.stream, "{}", line.text);
        }

        if let Some(line) = unresolved_toolchain_line(&result) {
            return Err(HarnessError::ToolchainUnresolved {
                expected: format!(
                    "{} ({} {})",
                    self.config.toolchain, self.config.sdk.name, self.config.sdk.version
                ),
                line,
            });
        }

        let diagnostics = DiagnosticsReport::load(&diagnostics_path, layout.diagnostics_format)?;
        if diagnostics.is_none() {
            debug!(file = %layout.diagnostics_file, "no diagnostics report written");
        }

        let event_log_bytes = match tokio::fs::read(&event_log_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(HarnessError::MissingEventLog(event_log_path));
            }
            Err(err) => return Err(err.into()),
        };
        let event_log = self.decoder.decode(&event_log_bytes)?;

        let side_channel = sandbox::read_optional(&side_channel_path)?;

        Ok(BuildOutcome::new(
            result,
            diagnostics,
            event_log,
            event_log_bytes,
            side_channel,
        ))
    }

    pub async fn build<A, S, E, K, V>(&self, args: A, overrides: E) -> Result<BuildOutcome>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.run("build", args, overrides).await
    }

    pub async fn pack<A, S, E, K, V>(&self, args: A, overrides: E) -> Result<BuildOutcome>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.run("pack", args, overrides).await
    }

    pub async fn test<A, S, E, K, V>(&self, args: A, overrides: E) -> Result<BuildOutcome>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.run("test", args, overrides).await
    }

    pub async fn restore<A, S, E, K, V>(&self, args: A, overrides: E) -> Result<BuildOutcome>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.run("restore", args, overrides).await
    }

    pub async fn run_project<A, S, E, K, V>(&self, args: A, overrides: E) -> Result<BuildOutcome>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.run("run", args, overrides).await
    }

    /// Remove the sandbox. Failures are logged, never raised.
    pub fn dispose(&mut self) {
        self.sandbox.dispose();
    }

    fn invocation_spec<A, S, E, K, V>(
        &self,
        program: PathBuf,
        command: &str,
        args: A,
        overrides: E,
        event_log_path: &Path,
    ) -> Result<InvocationSpec>
    where
        A: IntoIterator<Item = S>,
        S: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let layout = &self.config.layout;

        let mut argv = vec![command.to_string()];
        argv.extend(args.into_iter().map(Into::into));
        argv.push(
            layout
                .event_log_flag
                .replace(EVENT_LOG_PLACEHOLDER, &event_log_path.display().to_string()),
        );

        let mut defaults = BTreeMap::new();
        defaults.insert(
            layout.side_channel_var.clone(),
            self.sandbox
                .path(&layout.side_channel_file)?
                .display()
                .to_string(),
        );
        if let Some(toolchain_dir) = program.parent() {
            defaults.insert("DOTNET_ROOT".to_string(), toolchain_dir.display().to_string());
            defaults.insert("DOTNET_MULTILEVEL_LOOKUP".to_string(), "0".to_string());
            if let Some(path) = prepend_to_search_path(toolchain_dir) {
                defaults.insert("PATH".to_string(), path);
            }
        }

        let ambient = self
            .config
            .ambient
            .clone()
            .unwrap_or_else(ambient_environment);
        let env = self.config.env_policy.resolve(ambient, defaults, overrides);

        Ok(InvocationSpec {
            program,
            args: argv,
            working_dir: self.sandbox.root().to_path_buf(),
            env,
        })
    }

    /// Pin the newest SDK shipped next to `program` in `global.json`.
    fn pin_sdk_version(&self, program: &Path) -> Result<()> {
        let global_json = self.sandbox.path("global.json")?;
        if global_json.exists() {
            return Ok(());
        }
        let Some(sdk_dir) = program.parent().map(|dir| dir.join("sdk")) else {
            return Ok(());
        };
        let newest = match std::fs::read_dir(&sdk_dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| entry.file_name().to_str()?.parse::<SdkVersion>().ok())
                .max(),
            Err(_) => None,
        };
        let Some(version) = newest else {
            debug!(dir = %sdk_dir.display(), "no SDK versions found, global.json not written");
            return Ok(());
        };

        let content = serde_json::json!({ "sdk": { "version": version.as_str() } });
        std::fs::write(&global_json, format!("{content:#}\n"))?;
        debug!(sdk = %version.as_str(), "pinned SDK in global.json");
        Ok(())
    }
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("sandbox", &self.sandbox)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed previous run output");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn prepend_to_search_path(dir: &Path) -> Option<String> {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let joined = std::env::join_paths(
        std::iter::once(dir.to_path_buf()).chain(std::env::split_paths(&current)),
    )
    .ok()?;
    joined.into_string().ok()
}

fn unresolved_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"error MSB4236: The SDK '[^']+' specified could not be found",
            r#"Could not resolve SDK "[^"]+""#,
            r"A compatible (?:installed )?\.NET SDK (?:for global\.json version [^ ]+ )?was not found",
            r"error NETSDK1045: The current \.NET SDK does not support targeting",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

/// First output line showing that the toolchain or SDK could not be resolved.
pub fn unresolved_toolchain_line(result: &InvocationResult) -> Option<String> {
    let patterns = unresolved_patterns();
    result
        .output
        .iter()
        .find(|line| patterns.iter().any(|re| re.is_match(&line.text)))
        .map(|line| line.text.clone())
}
