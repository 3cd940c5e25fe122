//! Release catalog client
//!
//! The catalog is a two-level JSON document: a channel index listing one
//! entry per major version, and a per-channel release list that names the
//! downloadable SDK archives for every platform.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{debug, info};

use crate::archive::ArchiveKind;
use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use crate::key::ToolchainKey;
use crate::Result;

/// Top-level channel index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseIndex {
    #[serde(rename = "releases-index")]
    pub channels: Vec<ChannelSummary>,
}

/// One channel in the index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelSummary {
    pub channel_version: String,
    pub latest_release: String,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(rename = "releases.json")]
    pub releases_json: String,
}

/// Release list of a single channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelReleases {
    pub channel_version: String,
    pub latest_release: String,
    #[serde(default)]
    pub releases: Vec<Release>,
}

/// A runtime release and the SDKs that shipped with it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Release {
    pub release_version: String,
    #[serde(default)]
    pub sdks: Vec<SdkRelease>,
}

/// One SDK build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkRelease {
    pub version: String,
    #[serde(default)]
    pub files: Vec<ReleaseFile>,
}

/// A downloadable file of an SDK build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub name: String,
    #[serde(default)]
    pub rid: Option<String>,
    pub url: String,
    /// Hex SHA-512 of the file
    #[serde(default)]
    pub hash: Option<String>,
}

impl ReleaseFile {
    /// Archive format, if this file is an installable archive.
    pub fn archive_kind(&self) -> Option<ArchiveKind> {
        ArchiveKind::from_file_name(&self.name)
    }
}

/// Dotted SDK version with an optional pre-release suffix (`10.0.100-rc.2.25502.107`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SdkVersion {
    raw: String,
    core: Vec<u64>,
    pre: Vec<String>,
}

impl SdkVersion {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }
}

impl FromStr for SdkVersion {
    type Err = ProvisionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (core_part, pre_part) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (s, None),
        };

        let core = core_part
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| ProvisionError::UnsupportedVersion(s.to_string()))?;
        if core.is_empty() {
            return Err(ProvisionError::UnsupportedVersion(s.to_string()));
        }

        let pre = pre_part
            .map(|p| p.split('.').map(str::to_string).collect())
            .unwrap_or_default();

        Ok(SdkVersion {
            raw: s.to_string(),
            core,
            pre,
        })
    }
}

impl Ord for SdkVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core
            .cmp(&other.core)
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare_prerelease(&self.pre, &other.pre),
            })
    }
}

impl PartialOrd for SdkVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SdkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn compare_prerelease(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Pick the channel summary for a key.
pub fn find_channel<'a>(index: &'a ReleaseIndex, key: ToolchainKey) -> Result<&'a ChannelSummary> {
    index
        .channels
        .iter()
        .find(|c| c.channel_version == key.channel())
        .ok_or_else(|| ProvisionError::ChannelNotFound {
            channel: key.channel().to_string(),
        })
}

/// Select the newest SDK of the channel's latest release and its archive for `rid`.
pub fn select_sdk_file(releases: &ChannelReleases, rid: &str) -> Result<(SdkVersion, ReleaseFile)> {
    let release = releases
        .releases
        .iter()
        .find(|r| r.release_version == releases.latest_release)
        .ok_or_else(|| ProvisionError::ReleaseNotFound {
            channel: releases.channel_version.clone(),
            release: releases.latest_release.clone(),
        })?;

    let mut best: Option<(SdkVersion, &SdkRelease)> = None;
    for sdk in &release.sdks {
        let version: SdkVersion = sdk.version.parse()?;
        if best.as_ref().map_or(true, |(current, _)| version > *current) {
            best = Some((version, sdk));
        }
    }

    let (version, sdk) = best.ok_or_else(|| ProvisionError::NoPlatformArchive {
        release: release.release_version.clone(),
        rid: rid.to_string(),
    })?;

    let file = sdk
        .files
        .iter()
        .find(|f| f.rid.as_deref() == Some(rid) && f.archive_kind().is_some())
        .cloned()
        .ok_or_else(|| ProvisionError::NoPlatformArchive {
            release: release.release_version.clone(),
            rid: rid.to_string(),
        })?;

    Ok((version, file))
}

/// Check downloaded bytes against the catalog hash, when one is published.
pub fn verify_hash(file: &ReleaseFile, bytes: &[u8]) -> Result<()> {
    let Some(expected) = file.hash.as_deref() else {
        debug!(file = %file.name, "no hash published, skipping verification");
        return Ok(());
    };

    let actual = hex::encode(Sha512::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ProvisionError::HashMismatch {
            file: file.name.clone(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// HTTP client for the release catalog and its downloads
pub struct CatalogClient {
    http_client: reqwest::Client,
    index_url: String,
}

impl CatalogClient {
    /// Create a new catalog client
    pub fn new(config: &ProvisionConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(CatalogClient {
            http_client,
            index_url: config.catalog_url.clone(),
        })
    }

    /// Resolve the newest SDK for `key` and the archive to download for `rid`.
    pub async fn resolve_latest_sdk(
        &self,
        key: ToolchainKey,
        rid: &str,
    ) -> Result<(SdkVersion, ReleaseFile)> {
        let index: ReleaseIndex = self.get_json(&self.index_url).await?;
        let channel = find_channel(&index, key)?;
        debug!(channel = %channel.channel_version, latest = %channel.latest_release, "resolved channel");

        let releases: ChannelReleases = self.get_json(&channel.releases_json).await?;
        let (version, file) = select_sdk_file(&releases, rid)?;
        info!(%key, sdk = %version, file = %file.name, "selected SDK archive");
        Ok((version, file))
    }

    /// Download a release file and verify its hash.
    pub async fn download(&self, file: &ReleaseFile) -> Result<Vec<u8>> {
        info!(url = %file.url, "downloading SDK archive");
        let response = self.http_client.get(&file.url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?.to_vec();
        verify_hash(file, &bytes)?;
        debug!(bytes = bytes.len(), "download complete");
        Ok(bytes)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http_client.get(url).send().await?.error_for_status()?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RELEASES: &str = r#"{
        "channel-version": "10.0",
        "latest-release": "10.0.1",
        "releases": [
            {
                "release-version": "10.0.1",
                "sdks": [
                    {
                        "version": "10.0.101",
                        "files": [
                            { "name": "dotnet-sdk-linux-x64.tar.gz", "rid": "linux-x64", "url": "https://cdn/101-linux.tar.gz", "hash": "aa" },
                            { "name": "dotnet-sdk-win-x64.zip", "rid": "win-x64", "url": "https://cdn/101-win.zip" },
                            { "name": "dotnet-sdk-win-x64.exe", "rid": "win-x64", "url": "https://cdn/101-win.exe" }
                        ]
                    },
                    {
                        "version": "10.0.200",
                        "files": [
                            { "name": "dotnet-sdk-linux-x64.tar.gz", "rid": "linux-x64", "url": "https://cdn/200-linux.tar.gz" }
                        ]
                    }
                ]
            },
            {
                "release-version": "10.0.0",
                "sdks": [
                    { "version": "10.0.300", "files": [] }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_select_newest_sdk_of_latest_release() {
        let releases: ChannelReleases = serde_json::from_str(RELEASES).unwrap();
        let (version, file) = select_sdk_file(&releases, "linux-x64").unwrap();

        assert_eq!(version.as_str(), "10.0.200");
        assert_eq!(file.url, "https://cdn/200-linux.tar.gz");
    }

    #[test]
    fn test_select_skips_non_archive_files() {
        let mut releases: ChannelReleases = serde_json::from_str(RELEASES).unwrap();
        releases.releases[0].sdks.truncate(1);

        let (_, file) = select_sdk_file(&releases, "win-x64").unwrap();
        assert_eq!(file.name, "dotnet-sdk-win-x64.zip");
    }

    #[test]
    fn test_select_unknown_platform_fails() {
        let releases: ChannelReleases = serde_json::from_str(RELEASES).unwrap();
        let err = select_sdk_file(&releases, "freebsd-x64").unwrap_err();
        assert!(matches!(err, ProvisionError::NoPlatformArchive { .. }));
    }

    #[test]
    fn test_select_missing_latest_release_fails() {
        let mut releases: ChannelReleases = serde_json::from_str(RELEASES).unwrap();
        releases.latest_release = "10.0.9".to_string();
        let err = select_sdk_file(&releases, "linux-x64").unwrap_err();
        assert!(matches!(err, ProvisionError::ReleaseNotFound { .. }));
    }

    #[test]
    fn test_find_channel() {
        let index: ReleaseIndex = serde_json::from_str(
            r#"{"releases-index": [
                {"channel-version": "9.0", "latest-release": "9.0.11", "product": ".NET", "releases.json": "https://x/9.0/releases.json"},
                {"channel-version": "10.0", "latest-release": "10.0.1", "product": ".NET", "releases.json": "https://x/10.0/releases.json"}
            ]}"#,
        )
        .unwrap();

        let channel = find_channel(&index, ToolchainKey::Net9_0).unwrap();
        assert_eq!(channel.releases_json, "https://x/9.0/releases.json");
    }

    #[test]
    fn test_sdk_version_ordering() {
        let v = |s: &str| s.parse::<SdkVersion>().unwrap();

        assert!(v("10.0.100") > v("10.0.99"));
        assert!(v("10.0.100") > v("10.0.100-rc.2.25502.107"));
        assert!(v("10.0.100-rc.2") > v("10.0.100-rc.1"));
        assert!(v("10.0.100-rc.1") > v("10.0.100-preview.7"));
        assert!(v("10.0.100-rc.1").is_prerelease());
        assert!("abc".parse::<SdkVersion>().is_err());
    }

    #[test]
    fn test_verify_hash() {
        let bytes = b"archive bytes";
        let good = ReleaseFile {
            name: "a.tar.gz".to_string(),
            rid: None,
            url: String::new(),
            hash: Some(hex::encode(Sha512::digest(bytes)).to_uppercase()),
        };
        assert!(verify_hash(&good, bytes).is_ok());

        let bad = ReleaseFile {
            hash: Some("00".to_string()),
            ..good.clone()
        };
        assert!(matches!(
            verify_hash(&bad, bytes),
            Err(ProvisionError::HashMismatch { .. })
        ));

        let unpublished = ReleaseFile { hash: None, ..good };
        assert!(verify_hash(&unpublished, bytes).is_ok());
    }
}
