//! Declarative overlay rules.
//!
//! A rule copies a few named files into the sdk and, when those files add a
//! dependency the host must resolve at run time, declares the runtime
//! manifest entry that makes them loadable. Rules live in configuration so
//! they can be added or dropped without touching the overlay code.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::manifest::{PatchRequest, RuntimeEntry};

/// Where a rule's files come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RuleSource {
    /// A tagged variant of a built component under the artifacts root.
    Artifact { component: String, tag: String },
    /// A directory relative to the user package cache.
    PackageCache { path: PathBuf },
    /// An explicit directory.
    Directory { path: PathBuf },
}

/// Runtime manifest entry required by the files a rule adds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    /// Manifest file names, relative to the sdk directory.
    pub manifests: Vec<String>,
    pub target_framework: String,
    /// Package identity (`name/version`) the entry is filed under.
    pub package: String,
    pub entry_path: String,
    pub assembly_version: String,
    pub file_version: String,
}

impl DependencyDeclaration {
    pub fn patch_request(&self) -> PatchRequest {
        PatchRequest {
            target_framework: self.target_framework.clone(),
            package: self.package.clone(),
            entry_path: self.entry_path.clone(),
            entry: RuntimeEntry::new(&self.assembly_version, &self.file_version),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayRule {
    pub name: String,
    pub source: RuleSource,
    /// File names to copy from the source directory.
    pub files: Vec<String>,
    /// Destination relative to the sdk directory; empty means the sdk root.
    #[serde(default)]
    pub destination: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<DependencyDeclaration>,
}

impl OverlayRule {
    /// Names accepted by [`OverlayRule::preset`].
    pub const PRESETS: &'static [&'static str] = &["pkcs-interop"];

    /// A built-in rule by name, as listed in `overlay.presets`.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "pkcs-interop" => Some(OverlayRule::pkcs_interop()),
            _ => None,
        }
    }

    /// The cryptography interop library the pack task started depending on
    /// before the sdk shipped it, plus the entry the host, build engine and
    /// XPlat manifests need in order to load it.
    pub fn pkcs_interop() -> Self {
        OverlayRule {
            name: "pkcs-interop".to_string(),
            source: RuleSource::PackageCache {
                path: PathBuf::from("system.security.cryptography.pkcs")
                    .join("5.0.0-alpha1.19473.1")
                    .join("lib")
                    .join("netstandard2.1"),
            },
            files: vec!["System.Security.Cryptography.Pkcs.dll".to_string()],
            destination: PathBuf::new(),
            dependency: Some(DependencyDeclaration {
                manifests: vec![
                    "dotnet.deps.json".to_string(),
                    "MSBuild.deps.json".to_string(),
                    "NuGet.CommandLine.XPlat.deps.json".to_string(),
                ],
                target_framework: ".NETCoreApp,Version=v5.0".to_string(),
                package: "NuGet.Build.Tasks/5.3.0-rtm.6251".to_string(),
                entry_path: "lib/netstandard2.1/System.Security.Cryptography.Pkcs.dll"
                    .to_string(),
                assembly_version: "4.0.4.0".to_string(),
                file_version: "5.0.19.47301".to_string(),
            }),
        }
    }
}
