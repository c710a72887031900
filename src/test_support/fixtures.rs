//! On-disk fixtures: fake toolchain installations and artifact trees.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::core::artifact::{component_bin_dir, BuildConfiguration};
use crate::core::toolchain::{host_executable_name, SDKS_DIR, SDK_DIR};

/// Target framework key used by [`sample_deps_json`] in fixtures.
pub const SAMPLE_TFM: &str = ".NETCoreApp,Version=v5.0";

/// Package key used by [`sample_deps_json`] in fixtures.
pub const SAMPLE_PACKAGE: &str = "NuGet.Build.Tasks/5.3.0-rtm.6251";

/// A runtime dependency manifest with one target framework holding `package`
/// and an unrelated sibling package.
pub fn sample_deps_json(target_framework: &str, package: &str) -> String {
    let doc = serde_json::json!({
        "runtimeTarget": {
            "name": target_framework,
            "signature": ""
        },
        "compilationOptions": {},
        "targets": {
            target_framework: {
                package: {
                    "dependencies": {
                        "NuGet.Commands": "5.3.0-rtm.6251"
                    },
                    "runtime": {
                        "lib/netstandard2.0/NuGet.Build.Tasks.dll": {
                            "assemblyVersion": "5.3.0.0",
                            "fileVersion": "5.3.0.6251"
                        }
                    },
                    "resources": {
                        "lib/netstandard2.0/cs/NuGet.Build.Tasks.resources.dll": {
                            "locale": "cs"
                        }
                    }
                },
                "NuGet.Commands/5.3.0-rtm.6251": {
                    "runtime": {
                        "lib/netstandard2.0/NuGet.Commands.dll": {
                            "assemblyVersion": "5.3.0.0",
                            "fileVersion": "5.3.0.6251"
                        }
                    }
                }
            }
        },
        "libraries": {
            package: {
                "type": "package",
                "serviceable": false,
                "sha512": ""
            }
        }
    });
    // A `json!` value always serializes.
    serde_json::to_string_pretty(&doc).unwrap()
}

/// A fake toolchain installation.
///
/// ```text
/// <root>/dotnet                      (fake host script on unix)
/// <root>/sdk/<version>/*.deps.json
/// <root>/sdk/<version>/NuGet.Build.Tasks.dll
/// <root>/sdk/<version>/Sdks/NuGet.Build.Tasks.Pack/{CoreCLR,build,buildCrossTargeting}
/// ```
pub struct ToolchainFixture {
    dir: TempDir,
}

impl ToolchainFixture {
    /// Runtime manifests present in every sdk version.
    pub const MANIFESTS: [&'static str; 3] = [
        "dotnet.deps.json",
        "MSBuild.deps.json",
        "NuGet.CommandLine.XPlat.deps.json",
    ];

    pub fn new(versions: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let fixture = ToolchainFixture { dir };

        super::write_fake_host(&fixture.host());

        for version in versions {
            let sdk = fixture.sdk_dir(version);
            let pack = sdk.join(SDKS_DIR).join("NuGet.Build.Tasks.Pack");
            for sub in ["CoreCLR", "build", "buildCrossTargeting"] {
                fs::create_dir_all(pack.join(sub)).unwrap();
            }
            fs::write(pack.join("CoreCLR").join("NuGet.Build.Tasks.Pack.dll"), "stock").unwrap();
            fs::write(sdk.join("NuGet.Build.Tasks.dll"), "stock").unwrap();
            for manifest in Self::MANIFESTS {
                fs::write(
                    sdk.join(manifest),
                    sample_deps_json(SAMPLE_TFM, SAMPLE_PACKAGE),
                )
                .unwrap();
            }
        }

        fixture
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn sdk_dir(&self, version: &str) -> PathBuf {
        self.path().join(SDK_DIR).join(version)
    }

    pub fn host(&self) -> PathBuf {
        self.path().join(host_executable_name("dotnet"))
    }
}

/// A component build output tree.
pub struct ArtifactsFixture {
    dir: TempDir,
}

impl ArtifactsFixture {
    pub fn new() -> Self {
        ArtifactsFixture {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create and return `<component>/<toolset>/bin/<configuration>/<tag>`.
    pub fn variant_dir(
        &self,
        component: &str,
        toolset: &str,
        configuration: &str,
        tag: &str,
    ) -> PathBuf {
        let configuration: BuildConfiguration = configuration.parse().unwrap();
        let dir = component_bin_dir(self.path(), component, toolset, configuration).join(tag);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// Write `contents` to `path`, creating parents.
    pub fn write(&self, path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
}

impl Default for ArtifactsFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::RuntimeManifest;

    #[test]
    fn test_toolchain_fixture_layout() {
        let toolchain = ToolchainFixture::new(&["5.0.100"]);
        let sdk = toolchain.sdk_dir("5.0.100");

        assert!(toolchain.host().is_file());
        assert!(sdk.join("Sdks/NuGet.Build.Tasks.Pack/buildCrossTargeting").is_dir());
        for manifest in ToolchainFixture::MANIFESTS {
            let manifest = RuntimeManifest::load(&sdk.join(manifest)).unwrap();
            assert_eq!(
                manifest.runtime_entries(SAMPLE_TFM, SAMPLE_PACKAGE).unwrap().len(),
                1
            );
        }
    }
}
