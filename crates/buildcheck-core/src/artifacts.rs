//! Shared package artifacts
//!
//! Every sandbox restores the packages under test from one directory that
//! is prepared once per process. In CI the directory is filled from a
//! prebuilt artifact directory; locally every packaging input is packed
//! concurrently into it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::env_policy::ambient_environment;
use crate::error::ArtifactError;
use crate::obs;
use crate::process::{self, InvocationResult, InvocationSpec};

pub type Result<T> = std::result::Result<T, ArtifactError>;

/// Version stamped on locally packed artifacts.
pub const DEFAULT_PACKAGE_VERSION: &str = "999.9.9";

/// Where artifacts come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Reuse prebuilt artifacts instead of packing.
    pub ci: bool,
    pub prebuilt_dir: Option<PathBuf>,
    /// Directory scanned for packaging inputs.
    pub inputs_dir: PathBuf,
    pub input_extension: String,
    pub artifact_extension: String,
    pub package_version: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        let inputs_dir = std::env::var_os("BUILDCHECK_PACKAGE_INPUTS")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::current_dir()
                    .ok()
                    .and_then(|cwd| find_repository_root(&cwd))
                    .map(|root| root.join("src"))
            })
            .unwrap_or_else(|| PathBuf::from("src"));

        ArtifactConfig {
            ci: std::env::var_os("CI").is_some(),
            prebuilt_dir: std::env::var_os("BUILDCHECK_ARTIFACT_DIR")
                .or_else(|| std::env::var_os("NUGET_DIRECTORY"))
                .map(PathBuf::from),
            inputs_dir,
            input_extension: "csproj".to_string(),
            artifact_extension: "nupkg".to_string(),
            package_version: std::env::var("PACKAGE_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PACKAGE_VERSION.to_string()),
        }
    }
}

impl ArtifactConfig {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Local mode packing every input found in `inputs_dir`.
    pub fn local(inputs_dir: impl Into<PathBuf>) -> Self {
        ArtifactConfig {
            ci: false,
            prebuilt_dir: None,
            inputs_dir: inputs_dir.into(),
            input_extension: "csproj".to_string(),
            artifact_extension: "nupkg".to_string(),
            package_version: DEFAULT_PACKAGE_VERSION.to_string(),
        }
    }

    /// CI mode copying artifacts from `prebuilt_dir`.
    pub fn prebuilt(prebuilt_dir: impl Into<PathBuf>) -> Self {
        ArtifactConfig {
            ci: true,
            prebuilt_dir: Some(prebuilt_dir.into()),
            ..Self::local("src")
        }
    }

    pub fn with_package_version(mut self, version: impl Into<String>) -> Self {
        self.package_version = version.into();
        self
    }
}

/// Walk up from `start` to the first directory containing `.git`.
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Produces artifacts from one packaging input.
#[async_trait]
pub trait Packager: Send + Sync {
    async fn pack(&self, input: &Path, version: &str, output_dir: &Path) -> Result<InvocationResult>;
}

/// Runs `dotnet pack <input> -p:NuspecProperties=version=<v> --output <dir>`.
#[derive(Debug, Clone)]
pub struct DotnetPackager {
    program: PathBuf,
}

impl Default for DotnetPackager {
    fn default() -> Self {
        Self::new("dotnet")
    }
}

impl DotnetPackager {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        DotnetPackager {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Packager for DotnetPackager {
    async fn pack(&self, input: &Path, version: &str, output_dir: &Path) -> Result<InvocationResult> {
        let working_dir = input
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let spec = InvocationSpec {
            program: self.program.clone(),
            args: vec![
                "pack".to_string(),
                input.display().to_string(),
                format!("-p:NuspecProperties=version={version}"),
                "--output".to_string(),
                output_dir.display().to_string(),
            ],
            working_dir,
            env: ambient_environment().into_iter().collect::<BTreeMap<_, _>>(),
        };
        Ok(process::execute(&spec).await?)
    }
}

/// How the artifact directory was filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Prebuilt { copied: usize },
    Packed { inputs: usize },
}

impl ArtifactSource {
    fn label(&self) -> &'static str {
        match self {
            ArtifactSource::Prebuilt { .. } => "prebuilt",
            ArtifactSource::Packed { .. } => "packed",
        }
    }

    fn count(&self) -> usize {
        match self {
            ArtifactSource::Prebuilt { copied } => *copied,
            ArtifactSource::Packed { inputs } => *inputs,
        }
    }
}

/// Process-wide artifact directory, filled at most once.
///
/// Build one at test-run bootstrap and share it through an `Arc`; every
/// caller of [`initialize`](Self::initialize) gets the same directory and
/// concurrent callers wait for the first one to finish.
pub struct ArtifactFixture {
    config: ArtifactConfig,
    packager: Arc<dyn Packager>,
    path: PathBuf,
    dir: Option<TempDir>,
    ready: OnceCell<ArtifactSource>,
}

impl ArtifactFixture {
    pub fn new(config: ArtifactConfig, packager: Arc<dyn Packager>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("buildcheck-artifacts-")
            .tempdir()?;
        Ok(ArtifactFixture {
            config,
            packager,
            path: dir.path().to_path_buf(),
            dir: Some(dir),
            ready: OnceCell::new(),
        })
    }

    /// Fixture from environment configuration, packing with `dotnet`.
    pub fn from_env() -> Result<Self> {
        Self::new(ArtifactConfig::from_env(), Arc::new(DotnetPackager::default()))
    }

    /// The artifact directory; empty until [`initialize`](Self::initialize) succeeds.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ArtifactConfig {
        &self.config
    }

    /// How the directory was filled, once it has been.
    pub fn source(&self) -> Option<&ArtifactSource> {
        self.ready.get()
    }

    /// Fill the artifact directory if no caller has yet.
    ///
    /// A failed attempt leaves the fixture uninitialized; the error goes to
    /// the caller whose attempt failed.
    pub async fn initialize(&self) -> Result<&Path> {
        self.ready
            .get_or_try_init(|| async {
                let source = if self.config.ci {
                    self.copy_prebuilt()?
                } else {
                    self.pack_all().await?
                };
                obs::emit_artifacts_initialized(source.label(), &self.path, source.count());
                Ok::<_, ArtifactError>(source)
            })
            .await?;
        Ok(&self.path)
    }

    fn copy_prebuilt(&self) -> Result<ArtifactSource> {
        let source = self
            .config
            .prebuilt_dir
            .as_ref()
            .ok_or(ArtifactError::PrebuiltDirNotSet)?;
        if !source.is_dir() {
            return Err(ArtifactError::PrebuiltDirMissing(source.clone()));
        }

        let mut artifacts = Vec::new();
        collect_files(source, &self.config.artifact_extension, &mut artifacts)?;
        if artifacts.is_empty() {
            return Err(ArtifactError::NoArtifacts {
                dir: source.clone(),
                extension: self.config.artifact_extension.clone(),
            });
        }

        for artifact in &artifacts {
            if let Some(name) = artifact.file_name() {
                std::fs::copy(artifact, self.path.join(name))?;
                debug!(artifact = %artifact.display(), "copied prebuilt artifact");
            }
        }
        Ok(ArtifactSource::Prebuilt {
            copied: artifacts.len(),
        })
    }

    async fn pack_all(&self) -> Result<ArtifactSource> {
        let inputs = self.discover_inputs()?;
        info!(
            inputs = inputs.len(),
            version = %self.config.package_version,
            "packing artifacts"
        );

        futures::future::try_join_all(inputs.iter().map(|input| async move {
            let result = self
                .packager
                .pack(input, &self.config.package_version, &self.path)
                .await?;
            if !result.succeeded() {
                return Err(ArtifactError::PackFailed {
                    input: input.clone(),
                    exit_code: result.exit_code,
                    output: result.output_text(),
                });
            }
            Ok(())
        }))
        .await?;

        Ok(ArtifactSource::Packed {
            inputs: inputs.len(),
        })
    }

    /// Packaging inputs directly under `inputs_dir`, sorted by path.
    pub fn discover_inputs(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.inputs_dir;
        let mut inputs = Vec::new();
        if dir.is_dir() {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if has_extension(&path, &self.config.input_extension) {
                    inputs.push(path);
                }
            }
        }
        inputs.sort();
        if inputs.is_empty() {
            return Err(ArtifactError::NoInputs {
                dir: dir.clone(),
                extension: self.config.input_extension.clone(),
            });
        }
        Ok(inputs)
    }

    /// Delete the artifact directory. Safe to call more than once.
    pub fn dispose(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(err) = dir.close() {
                obs::emit_cleanup_failed(&self.path, &err);
            }
        }
    }
}

impl Drop for ArtifactFixture {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ArtifactFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactFixture")
            .field("config", &self.config)
            .field("path", &self.path)
            .field("source", &self.ready.get())
            .finish_non_exhaustive()
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// Recursive directory walk collecting files with `extension`.
fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, extension, out)?;
        } else if has_extension(&path, extension) {
            out.push(path);
        }
    }
    Ok(())
}
