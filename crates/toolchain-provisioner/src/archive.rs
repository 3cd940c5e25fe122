//! SDK archive extraction

use std::io::Cursor;
use std::path::Path;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProvisionError;
use crate::Result;

/// Archive container format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    /// Detect the format from a file name. Returns `None` for installers
    /// and anything else that is not an archive.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if lower.ends_with(".gz") || lower.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }

    /// Like [`ArchiveKind::from_file_name`], but an error for unknown formats.
    pub fn detect(name: &str) -> Result<Self> {
        Self::from_file_name(name).ok_or_else(|| ProvisionError::UnsupportedArchive(name.to_string()))
    }
}

/// Unpack `bytes` into `dest`, creating it if needed.
pub fn extract_archive(bytes: &[u8], kind: ArchiveKind, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    debug!(?kind, dest = %dest.display(), "extracting archive");

    match kind {
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
            archive.extract(dest)?;
        }
        ArchiveKind::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(bytes));
            archive.set_preserve_permissions(true);
            archive
                .unpack(dest)
                .map_err(|e| ProvisionError::Extraction(e.to_string()))?;
        }
    }

    Ok(())
}

/// Mark the entry binary executable for user, group and other.
#[cfg(unix)]
pub fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions)?;
    Ok(())
}

/// Windows has no executable bit.
#[cfg(not(unix))]
pub fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
