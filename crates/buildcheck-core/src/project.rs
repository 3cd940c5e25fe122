//! Project file authoring
//!
//! [`ProjectFile`] renders a minimal SDK-style project that references the
//! SDK under test in one of three ways ([`SdkImportStyle`]) and always
//! routes compiler diagnostics to the sandbox's SARIF report.

use serde::{Deserialize, Serialize};

use crate::feed::xml_escape;
use crate::report::SarifVersion;

pub const DEFAULT_PROJECT_FILE: &str = "TestProject.csproj";
pub const DIRECTORY_BUILD_PROPS: &str = "Directory.Build.props";
const BASE_SDK: &str = "Microsoft.NET.Sdk";

/// How the project pulls in the SDK under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdkImportStyle {
    /// `<Project Sdk="Name/Version">`
    #[default]
    ProjectElement,
    /// `<Project>` with a nested `<Sdk Name=".." Version=".." />`
    SdkElement,
    /// Base SDK on the project; `<Sdk>` element in `Directory.Build.props`
    DirectoryBuildProps,
}

/// SDK package name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkReference {
    pub name: String,
    pub version: String,
}

impl SdkReference {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        SdkReference {
            name: name.into(),
            version: version.into(),
        }
    }

    fn element(&self) -> String {
        format!(
            "<Sdk Name=\"{}\" Version=\"{}\" />",
            xml_escape(&self.name),
            xml_escape(&self.version)
        )
    }
}

/// A rendered file: sandbox-relative name and content.
pub type AuthoredFile = (String, String);

/// Output of [`ProjectFile::render`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedProject {
    pub project: AuthoredFile,
    pub directory_build_props: Option<AuthoredFile>,
}

impl RenderedProject {
    pub fn files(&self) -> impl Iterator<Item = &AuthoredFile> {
        std::iter::once(&self.project).chain(self.directory_build_props.as_ref())
    }
}

/// Builder for a test project.
#[derive(Debug, Clone)]
pub struct ProjectFile {
    file_name: String,
    sdk: SdkReference,
    style: SdkImportStyle,
    error_log: String,
    diagnostics_format: SarifVersion,
    properties: Vec<(String, String)>,
    packages: Vec<(String, String)>,
    extra_elements: Vec<String>,
}

impl ProjectFile {
    pub fn new(sdk: SdkReference) -> Self {
        ProjectFile {
            file_name: DEFAULT_PROJECT_FILE.to_string(),
            sdk,
            style: SdkImportStyle::default(),
            error_log: "BuildOutput.sarif".to_string(),
            diagnostics_format: SarifVersion::default(),
            properties: Vec::new(),
            packages: Vec::new(),
            extra_elements: Vec::new(),
        }
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    pub fn import_style(mut self, style: SdkImportStyle) -> Self {
        self.style = style;
        self
    }

    /// Where and in which format the compiler writes diagnostics.
    pub fn error_log(mut self, file: impl Into<String>, format: SarifVersion) -> Self {
        self.error_log = file.into();
        self.diagnostics_format = format;
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((name.into(), value.into()));
        self
    }

    pub fn package(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.packages.push((id.into(), version.into()));
        self
    }

    /// Raw XML placed verbatim before `</Project>`.
    pub fn element(mut self, xml: impl Into<String>) -> Self {
        self.extra_elements.push(xml.into());
        self
    }

    pub fn style(&self) -> SdkImportStyle {
        self.style
    }

    /// Render the project, plus `Directory.Build.props` when the style needs it.
    pub fn render(&self) -> RenderedProject {
        let (open, sdk_element) = match self.style {
            SdkImportStyle::ProjectElement => (
                format!(
                    "<Project Sdk=\"{}/{}\">",
                    xml_escape(&self.sdk.name),
                    xml_escape(&self.sdk.version)
                ),
                None,
            ),
            SdkImportStyle::SdkElement => ("<Project>".to_string(), Some(self.sdk.element())),
            SdkImportStyle::DirectoryBuildProps => (format!("<Project Sdk=\"{BASE_SDK}\">"), None),
        };

        let mut xml = String::new();
        xml.push_str(&open);
        xml.push('\n');
        if let Some(sdk) = sdk_element {
            xml.push_str(&format!("  {sdk}\n"));
        }
        xml.push_str(&format!(
            "  <PropertyGroup>
    <OutputType>exe</OutputType>
    <TargetFramework>net$(NETCoreAppMaximumVersion)</TargetFramework>
    <ImplicitUsings>enable</ImplicitUsings>
    <Nullable>enable</Nullable>
    <ErrorLog>{},version={}</ErrorLog>
  </PropertyGroup>\n",
            xml_escape(&self.error_log),
            self.diagnostics_format
        ));

        if !self.properties.is_empty() {
            xml.push_str("  <PropertyGroup>\n");
            for (name, value) in &self.properties {
                xml.push_str(&format!("    <{name}>{}</{name}>\n", xml_escape(value)));
            }
            xml.push_str("  </PropertyGroup>\n");
        }

        if !self.packages.is_empty() {
            xml.push_str("  <ItemGroup>\n");
            for (id, version) in &self.packages {
                xml.push_str(&format!(
                    "    <PackageReference Include=\"{}\" Version=\"{}\" />\n",
                    xml_escape(id),
                    xml_escape(version)
                ));
            }
            xml.push_str("  </ItemGroup>\n");
        }

        for element in &self.extra_elements {
            xml.push_str("  ");
            xml.push_str(element);
            xml.push('\n');
        }
        xml.push_str("</Project>\n");

        let directory_build_props = (self.style == SdkImportStyle::DirectoryBuildProps).then(|| {
            (
                DIRECTORY_BUILD_PROPS.to_string(),
                directory_build_props(Some(&self.sdk), "", ""),
            )
        });
        RenderedProject {
            project: (self.file_name.clone(), xml),
            directory_build_props,
        }
    }
}

/// Render `Directory.Build.props` with content before and after the SDK import.
///
/// `sdk` is only emitted for [`SdkImportStyle::DirectoryBuildProps`]
/// projects; pass `None` otherwise.
pub fn directory_build_props(sdk: Option<&SdkReference>, pre_sdk: &str, post_sdk: &str) -> String {
    let mut xml = String::from("<Project>\n");
    for part in [
        pre_sdk.to_string(),
        sdk.map(SdkReference::element).unwrap_or_default(),
        post_sdk.to_string(),
    ] {
        if !part.trim().is_empty() {
            xml.push_str(&part);
            xml.push('\n');
        }
    }
    xml.push_str("</Project>\n");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdk() -> SdkReference {
        SdkReference::new("Contoso.NET.Sdk", "999.9.9")
    }

    #[test]
    fn test_project_element_style() {
        let rendered = ProjectFile::new(sdk()).render();
        assert!(rendered.directory_build_props.is_none());
        let (name, xml) = &rendered.project;
        assert_eq!(name, DEFAULT_PROJECT_FILE);
        assert!(xml.starts_with("<Project Sdk=\"Contoso.NET.Sdk/999.9.9\">"));
        assert!(xml.contains("<ErrorLog>BuildOutput.sarif,version=2.1</ErrorLog>"));
    }

    #[test]
    fn test_sdk_element_style() {
        let rendered = ProjectFile::new(sdk())
            .import_style(SdkImportStyle::SdkElement)
            .render();
        let xml = &rendered.project.1;
        assert!(xml.starts_with("<Project>\n"));
        assert!(xml.contains("<Sdk Name=\"Contoso.NET.Sdk\" Version=\"999.9.9\" />"));
    }

    #[test]
    fn test_directory_build_props_style_writes_two_files() {
        let rendered = ProjectFile::new(sdk())
            .import_style(SdkImportStyle::DirectoryBuildProps)
            .render();
        assert_eq!(rendered.files().count(), 2);
        assert!(rendered.project.1.starts_with("<Project Sdk=\"Microsoft.NET.Sdk\">"));
        let (name, props) = rendered.directory_build_props.as_ref().unwrap();
        assert_eq!(name, DIRECTORY_BUILD_PROPS);
        assert!(props.contains("<Sdk Name=\"Contoso.NET.Sdk\""));
    }

    #[test]
    fn test_properties_packages_and_elements() {
        let rendered = ProjectFile::new(sdk())
            .file_name("Sample.Tests.csproj")
            .property("LangVersion", "preview")
            .package("xunit.v3", "3.2.0")
            .element("<ItemGroup><None Include=\"a.txt\" /></ItemGroup>")
            .error_log("report.sarif", SarifVersion::V1_0)
            .render();
        let (name, xml) = &rendered.project;
        assert_eq!(name, "Sample.Tests.csproj");
        assert!(xml.contains("<LangVersion>preview</LangVersion>"));
        assert!(xml.contains("<PackageReference Include=\"xunit.v3\" Version=\"3.2.0\" />"));
        assert!(xml.contains("<None Include=\"a.txt\" />"));
        assert!(xml.contains("<ErrorLog>report.sarif,version=1.0</ErrorLog>"));
    }

    #[test]
    fn test_directory_build_props_wraps_content() {
        let xml = directory_build_props(None, "", "<PropertyGroup><LangVersion>preview</LangVersion></PropertyGroup>");
        assert!(xml.starts_with("<Project>\n<PropertyGroup>"));
        assert!(!xml.contains("<Sdk"));
    }
}
