//! Package feed configuration written into every sandbox.
//!
//! The generated `NuGet.config` clears every ambient package source, keeps
//! the public gallery for third-party packages and routes the packages
//! under test to the shared artifact directory. The global packages folder
//! lives inside that directory too, so a package built in this run never
//! collides with a same-versioned copy restored by an earlier run.

use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "NuGet.config";
pub const PUBLIC_FEED_URL: &str = "https://api.nuget.org/v3/index.json";

const PUBLIC_SOURCE_KEY: &str = "nuget.org";
const LOCAL_SOURCE_KEY: &str = "TestSource";

/// A local feed for the packages under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFeed {
    artifact_dir: PathBuf,
    patterns: Vec<String>,
}

impl PackageFeed {
    /// Feed serving every package id matching one of `patterns` from `artifact_dir`.
    pub fn new<I, S>(artifact_dir: impl Into<PathBuf>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PackageFeed {
            artifact_dir: artifact_dir.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn packages_folder(&self) -> PathBuf {
        self.artifact_dir.join("packages")
    }

    /// Render the configuration document.
    pub fn render(&self) -> String {
        let dir = xml_escape(&self.artifact_dir.display().to_string());
        let packages = xml_escape(&self.packages_folder().display().to_string());
        let local_patterns: String = self
            .patterns
            .iter()
            .map(|pattern| format!("      <package pattern=\"{}\" />\n", xml_escape(pattern)))
            .collect();

        format!(
            r#"<configuration>
  <config>
    <add key="globalPackagesFolder" value="{packages}" />
  </config>
  <packageSources>
    <clear />
    <add key="{PUBLIC_SOURCE_KEY}" value="{PUBLIC_FEED_URL}" />
    <add key="{LOCAL_SOURCE_KEY}" value="{dir}" />
  </packageSources>
  <packageSourceMapping>
    <packageSource key="{PUBLIC_SOURCE_KEY}">
      <package pattern="*" />
    </packageSource>
    <packageSource key="{LOCAL_SOURCE_KEY}">
{local_patterns}    </packageSource>
  </packageSourceMapping>
</configuration>
"#
        )
    }
}

/// Escape text for use in XML attribute values and element content.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_maps_patterns_to_local_source() {
        let feed = PackageFeed::new("/tmp/artifacts", ["Contoso.NET.Sdk*"]);
        let config = feed.render();

        assert!(config.contains("<clear />"));
        assert!(config.contains(r#"<add key="TestSource" value="/tmp/artifacts" />"#));
        assert!(config.contains(&format!(
            r#"<add key="globalPackagesFolder" value="{}" />"#,
            Path::new("/tmp/artifacts").join("packages").display()
        )));
        assert!(config.contains(r#"<package pattern="Contoso.NET.Sdk*" />"#));
        assert!(config.contains(r#"<package pattern="*" />"#));
    }

    #[test]
    fn test_escapes_paths() {
        let feed = PackageFeed::new("/tmp/a&b", Vec::<String>::new());
        assert!(feed.render().contains("/tmp/a&amp;b"));
    }
}
