//! Built component artifacts and how a variant is chosen among them.
//!
//! A component's build output lives at
//! `<artifacts>/<component>/<toolset>/bin/<configuration>/<tag>/`, one
//! directory per target-runtime tag.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// File extension of component assemblies.
pub const ASSEMBLY_EXTENSION: &str = "dll";

/// Build configuration an artifact was produced under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildConfiguration {
    Debug,
    Release,
}

impl Default for BuildConfiguration {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            BuildConfiguration::Debug
        } else {
            BuildConfiguration::Release
        }
    }
}

impl BuildConfiguration {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildConfiguration::Debug => "Debug",
            BuildConfiguration::Release => "Release",
        }
    }
}

impl fmt::Display for BuildConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildConfiguration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(BuildConfiguration::Debug),
            "release" => Ok(BuildConfiguration::Release),
            _ => Err(format!(
                "invalid configuration '{}'; expected 'Debug' or 'Release'",
                s
            )),
        }
    }
}

/// Ordered tiers of acceptable target-runtime tags.
///
/// Earlier tiers belong to newer sdk generations. Within a tier, earlier tags
/// are the higher-fidelity match. A later tier is consulted only when no
/// directory matches any tag of the tiers before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagTiers(pub Vec<Vec<String>>);

impl Default for TagTiers {
    fn default() -> Self {
        TagTiers(vec![
            vec!["netcoreapp5.0".to_string(), "netstandard2.1".to_string()],
            vec!["netstandard2.0".to_string()],
        ])
    }
}

impl TagTiers {
    pub fn new<I, T, S>(tiers: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagTiers(
            tiers
                .into_iter()
                .map(|tier| tier.into_iter().map(Into::into).collect())
                .collect(),
        )
    }

    /// Pick the best tagged directory among `dirs`.
    ///
    /// Returns the tag and the directory carrying it.
    pub fn select<'a>(&'a self, dirs: &[PathBuf]) -> Option<(&'a str, PathBuf)> {
        for tier in &self.0 {
            for tag in tier {
                let hit = dirs
                    .iter()
                    .find(|dir| dir.file_name().and_then(|n| n.to_str()) == Some(tag.as_str()));
                if let Some(dir) = hit {
                    return Some((tag.as_str(), dir.clone()));
                }
            }
        }
        None
    }

    /// Every tag, in preference order.
    pub fn all_tags(&self) -> impl Iterator<Item = &str> {
        self.0.iter().flatten().map(String::as_str)
    }
}

/// A component copied into the sdk root during overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,

    /// Companion targets file shipped next to the assembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets_file: Option<String>,
}

impl ComponentSpec {
    pub fn new(name: impl Into<String>) -> Self {
        ComponentSpec {
            name: name.into(),
            targets_file: None,
        }
    }

    pub fn with_targets(mut self, targets_file: impl Into<String>) -> Self {
        self.targets_file = Some(targets_file.into());
        self
    }

    /// File name of the component's primary output.
    pub fn assembly_name(&self) -> String {
        format!("{}.{}", self.name, ASSEMBLY_EXTENSION)
    }
}

/// Restore task assembly and its library closure.
pub fn default_restore_components() -> Vec<ComponentSpec> {
    let mut components = vec![ComponentSpec::new("NuGet.Build.Tasks").with_targets("NuGet.targets")];
    components.extend(
        [
            "NuGet.Versioning",
            "NuGet.Protocol",
            "NuGet.ProjectModel",
            "NuGet.Packaging",
            "NuGet.LibraryModel",
            "NuGet.Frameworks",
            "NuGet.DependencyResolver.Core",
            "NuGet.Configuration",
            "NuGet.Common",
            "NuGet.Commands",
            "NuGet.CommandLine.XPlat",
            "NuGet.Credentials",
        ]
        .into_iter()
        .map(ComponentSpec::new),
    );
    components
}

/// The packaging-task component, which ships into its own sdk package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackComponentSpec {
    pub name: String,
    pub targets_file: String,
    /// Glob selecting the one artifact directory to use.
    pub variant_pattern: String,
    /// Subdirectory of the variant holding the merged single-file build.
    pub merged_dir: String,
    /// Runtime-implementation subdirectory of the sdk package receiving assemblies.
    pub runtime_dir: String,
}

impl Default for PackComponentSpec {
    fn default() -> Self {
        PackComponentSpec {
            name: "NuGet.Build.Tasks.Pack".to_string(),
            targets_file: "NuGet.Build.Tasks.Pack.targets".to_string(),
            variant_pattern: "netstandard*".to_string(),
            merged_dir: "ilmerge".to_string(),
            runtime_dir: "CoreCLR".to_string(),
        }
    }
}

impl PackComponentSpec {
    pub fn assembly_name(&self) -> String {
        format!("{}.{}", self.name, ASSEMBLY_EXTENSION)
    }
}

/// A resolved artifact directory. Selected, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactVariant {
    pub component: String,
    pub tag: String,
    pub configuration: BuildConfiguration,
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl ArtifactVariant {
    /// Path of `file_name` inside this variant.
    pub fn file(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Loose assemblies in this variant, sorted.
    pub fn assemblies(&self) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .filter(|f| f.extension().and_then(|e| e.to_str()) == Some(ASSEMBLY_EXTENSION))
            .map(PathBuf::as_path)
    }
}

/// `<artifacts>/<component>/<toolset>/bin/<configuration>`
pub fn component_bin_dir(
    artifacts_root: &Path,
    component: &str,
    toolset_version: &str,
    configuration: BuildConfiguration,
) -> PathBuf {
    artifacts_root
        .join(component)
        .join(toolset_version)
        .join("bin")
        .join(configuration.as_str())
}
