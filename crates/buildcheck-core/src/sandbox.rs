//! One temporary project directory per logical test
//!
//! A [`Sandbox`] owns a uniquely named directory for its whole lifetime.
//! Tests author files into it, the external tool writes its byproducts
//! into it, and [`Sandbox::dispose`] removes it. Removal is best effort:
//! a child process that just exited may still hold file locks on some
//! platforms, so failures are logged and swallowed.

use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::error::HarnessError;
use crate::obs;
use crate::Result;

const SANDBOX_PREFIX: &str = "buildcheck-";

/// Exclusively owned temporary directory.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    id: String,
    dir: Option<TempDir>,
}

impl Sandbox {
    /// Create a sandbox under the system temporary directory.
    pub fn create() -> Result<Self> {
        Self::create_in(std::env::temp_dir())
    }

    /// Create a sandbox under `parent`.
    pub fn create_in(parent: impl AsRef<Path>) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(SANDBOX_PREFIX)
            .tempdir_in(parent)?;
        let root = resolve_root(dir.path())?;
        let id = root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(sandbox_id = %id, root = %root.display(), "sandbox created");
        Ok(Sandbox {
            root,
            id,
            dir: Some(dir),
        })
    }

    /// Absolute root of the sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name, unique per sandbox.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolve a sandbox-relative path without touching the filesystem.
    ///
    /// Absolute paths and `..` components are rejected.
    pub fn path(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let relative = relative.as_ref();
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(HarnessError::PathOutsideSandbox(relative.to_path_buf()));
        }
        Ok(self.root.join(relative))
    }

    /// Write `content` to `relative`, creating parent directories, and return the absolute path.
    pub fn add_file(&self, relative: impl AsRef<Path>, content: &str) -> Result<PathBuf> {
        let path = self.path(relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create an empty file at `relative`.
    pub fn add_empty_file(&self, relative: impl AsRef<Path>) -> Result<PathBuf> {
        self.add_file(relative, "")
    }

    /// Read a text file if it exists.
    pub fn read_optional(&self, relative: impl AsRef<Path>) -> Result<Option<String>> {
        read_optional(&self.path(relative)?)
    }

    /// Whether [`dispose`](Self::dispose) has already run.
    pub fn is_disposed(&self) -> bool {
        self.dir.is_none()
    }

    /// Remove the sandbox directory. Safe to call more than once.
    pub fn dispose(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => debug!(sandbox_id = %self.id, "sandbox removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(sandbox_id = %self.id, "sandbox already gone");
            }
            Err(err) => obs::emit_cleanup_failed(&self.root, &err),
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Read a text file, mapping "not found" to `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

// Symlinked temp roots (macOS /var -> /private/var) would otherwise make
// returned paths differ from the ones the child process reports.
#[cfg(not(windows))]
fn resolve_root(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path)
}

#[cfg(windows)]
fn resolve_root(path: &Path) -> std::io::Result<PathBuf> {
    Ok(path.to_path_buf())
}
