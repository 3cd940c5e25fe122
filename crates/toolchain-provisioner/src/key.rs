//! Supported toolchain versions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

/// Name of the entry binary inside an extracted SDK archive.
#[cfg(windows)]
pub const TOOL_BINARY: &str = "dotnet.exe";

/// Name of the entry binary inside an extracted SDK archive.
#[cfg(not(windows))]
pub const TOOL_BINARY: &str = "dotnet";

/// A supported SDK major version.
///
/// Each key maps to exactly one installed toolchain per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ToolchainKey {
    #[serde(rename = "9.0")]
    Net9_0,
    #[serde(rename = "10.0")]
    Net10_0,
}

impl ToolchainKey {
    /// Every supported version, oldest first.
    pub const ALL: [ToolchainKey; 2] = [ToolchainKey::Net9_0, ToolchainKey::Net10_0];

    /// Release channel name used by the catalog (e.g. "10.0").
    pub fn channel(&self) -> &'static str {
        match self {
            ToolchainKey::Net9_0 => "9.0",
            ToolchainKey::Net10_0 => "10.0",
        }
    }
}

impl fmt::Display for ToolchainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net{}", self.channel())
    }
}

impl FromStr for ToolchainKey {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches("net");
        match trimmed {
            "9" | "9.0" => Ok(ToolchainKey::Net9_0),
            "10" | "10.0" => Ok(ToolchainKey::Net10_0),
            _ => Err(ProvisionError::UnsupportedVersion(s.to_string())),
        }
    }
}
