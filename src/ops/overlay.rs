//! Copy freshly built component artifacts into a toolchain clone.
//!
//! Three passes run in order:
//! 1. restore components: one assembly (plus an optional targets file) each,
//!    into the sdk root;
//! 2. the packaging-task component, into its own sdk package;
//! 3. declarative [`OverlayRule`]s, which may also patch runtime manifests.
//!
//! Anything missing is fatal. Nothing is skipped silently.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::artifact::{
    component_bin_dir, ArtifactVariant, BuildConfiguration, ComponentSpec, PackComponentSpec,
    TagTiers,
};
use crate::core::manifest::{patch_runtime_entry, ManifestFormatError, PatchOutcome};
use crate::core::rule::{OverlayRule, RuleSource};
use crate::core::toolchain::SDKS_DIR;
use crate::util::config::SandboxConfig;
use crate::util::fs::{creation_time, write_atomic};

/// Errors raised while overlaying artifacts.
#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("expected directory not found: {}", path.display())]
    MissingDirectory { path: PathBuf },

    #[error("expected file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("no artifact variant of `{component}` in {} matches any of [{tags}]", dir.display())]
    NoVariant {
        component: String,
        dir: PathBuf,
        tags: String,
    },

    #[error("expected exactly one `{pattern}` directory for `{component}` in {}, found {found}", dir.display())]
    AmbiguousVariant {
        component: String,
        dir: PathBuf,
        pattern: String,
        found: usize,
    },

    #[error("invalid variant pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("unknown overlay preset `{name}` (known: {known})")]
    UnknownPreset { name: String, known: String },

    #[error("overlay rule `{rule}` reads from the package cache, but no package cache is known")]
    NoPackageCache { rule: String },

    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestFormatError),
}

/// How the packaging-task assemblies were taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackSource {
    /// Only the merged single-file build.
    Merged,
    /// Every loose assembly; the count is attached.
    Loose(usize),
}

/// What an overlay did.
#[derive(Debug, Clone, Default)]
pub struct OverlayReport {
    /// Every file written into the sdk.
    pub copied: Vec<PathBuf>,
    pub pack: Option<PackSource>,
    /// Manifest patches, in application order.
    pub patched: Vec<(PathBuf, PatchOutcome)>,
}

/// Overlay settings for one artifacts tree.
#[derive(Debug, Clone)]
pub struct ArtifactOverlay {
    artifacts_root: PathBuf,
    configuration: BuildConfiguration,
    toolset_version: String,
    tag_tiers: TagTiers,
    components: Vec<ComponentSpec>,
    pack: Option<PackComponentSpec>,
    rules: Vec<OverlayRule>,
    package_cache: Option<PathBuf>,
}

impl ArtifactOverlay {
    /// An overlay with no components and no rules.
    pub fn new(
        artifacts_root: impl Into<PathBuf>,
        configuration: BuildConfiguration,
        toolset_version: impl Into<String>,
    ) -> Self {
        ArtifactOverlay {
            artifacts_root: artifacts_root.into(),
            configuration,
            toolset_version: toolset_version.into(),
            tag_tiers: TagTiers::default(),
            components: Vec::new(),
            pack: None,
            rules: Vec::new(),
            package_cache: None,
        }
    }

    /// The full overlay described by `config`, reading from `artifacts_root`.
    ///
    /// Named presets are appended to the configured rules.
    pub fn from_config(
        config: &SandboxConfig,
        artifacts_root: impl Into<PathBuf>,
    ) -> Result<Self, OverlayError> {
        let mut rules = config.overlay.rules.clone();
        for name in &config.overlay.presets {
            let rule = OverlayRule::preset(name).ok_or_else(|| OverlayError::UnknownPreset {
                name: name.clone(),
                known: OverlayRule::PRESETS.join(", "),
            })?;
            tracing::debug!("enabled overlay preset `{}`", name);
            rules.push(rule);
        }

        let artifacts = &config.artifacts;
        Ok(ArtifactOverlay::new(
            artifacts_root,
            artifacts.configuration,
            artifacts.toolset_version.clone(),
        )
        .with_tag_tiers(artifacts.tag_tiers.clone())
        .with_components(artifacts.restore_components.clone())
        .with_pack(artifacts.include_pack.then(|| artifacts.pack.clone()))
        .with_rules(rules)
        .with_package_cache(config.package_cache()))
    }

    pub fn with_tag_tiers(mut self, tiers: TagTiers) -> Self {
        self.tag_tiers = tiers;
        self
    }

    pub fn with_components(mut self, components: Vec<ComponentSpec>) -> Self {
        self.components = components;
        self
    }

    pub fn with_pack(mut self, pack: Option<PackComponentSpec>) -> Self {
        self.pack = pack;
        self
    }

    pub fn with_rules(mut self, rules: Vec<OverlayRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_package_cache(mut self, package_cache: Option<PathBuf>) -> Self {
        self.package_cache = package_cache;
        self
    }

    pub fn artifacts_root(&self) -> &Path {
        &self.artifacts_root
    }

    /// Run every pass against `sdk_dir`.
    pub fn apply(&self, sdk_dir: &Path) -> Result<OverlayReport, OverlayError> {
        require_dir(sdk_dir)?;
        let mut report = OverlayReport::default();

        for component in &self.components {
            self.overlay_component(component, sdk_dir, &mut report)?;
        }

        if let Some(ref pack) = self.pack {
            let source = self.overlay_pack(pack, sdk_dir, &mut report)?;
            report.pack = Some(source);
        }

        for rule in &self.rules {
            self.apply_rule(rule, sdk_dir, &mut report)?;
        }

        tracing::info!(
            "Overlaid {} file(s) into {} ({} manifest patch(es))",
            report.copied.len(),
            sdk_dir.display(),
            report.patched.len()
        );
        Ok(report)
    }

    /// Pick the best tagged variant of `component`.
    pub fn resolve_variant(&self, component: &str) -> Result<ArtifactVariant, OverlayError> {
        let bin_dir = self.bin_dir(component);
        let dirs = subdirectories(&bin_dir)?;

        let (tag, dir) = self
            .tag_tiers
            .select(&dirs)
            .ok_or_else(|| OverlayError::NoVariant {
                component: component.to_string(),
                dir: bin_dir.clone(),
                tags: self.tag_tiers.all_tags().collect::<Vec<_>>().join(", "),
            })?;

        tracing::debug!("Using `{}` variant of {}", tag, component);
        self.variant_at(component, tag, dir)
    }

    fn bin_dir(&self, component: &str) -> PathBuf {
        component_bin_dir(
            &self.artifacts_root,
            component,
            &self.toolset_version,
            self.configuration,
        )
    }

    fn variant_at(
        &self,
        component: &str,
        tag: &str,
        dir: PathBuf,
    ) -> Result<ArtifactVariant, OverlayError> {
        let files = files_in(&dir)?;
        Ok(ArtifactVariant {
            component: component.to_string(),
            tag: tag.to_string(),
            configuration: self.configuration,
            dir,
            files,
        })
    }

    fn overlay_component(
        &self,
        component: &ComponentSpec,
        sdk_dir: &Path,
        report: &mut OverlayReport,
    ) -> Result<(), OverlayError> {
        let variant = self.resolve_variant(&component.name)?;

        let assembly = component.assembly_name();
        copy_into(&variant.file(&assembly), &sdk_dir.join(&assembly), report)?;

        if let Some(ref targets) = component.targets_file {
            copy_into(&variant.file(targets), &sdk_dir.join(targets), report)?;
        }
        Ok(())
    }

    fn overlay_pack(
        &self,
        pack: &PackComponentSpec,
        sdk_dir: &Path,
        report: &mut OverlayReport,
    ) -> Result<PackSource, OverlayError> {
        let variant = self.pack_variant(pack)?;

        let package_dir = sdk_dir.join(SDKS_DIR).join(&pack.name);
        let assembly_dest = package_dir.join(&pack.runtime_dir);
        require_dir(&assembly_dest)?;

        let assembly = pack.assembly_name();
        let primary = variant.file(&assembly);
        require_file(&primary)?;
        let merged = variant.dir.join(&pack.merged_dir).join(&assembly);

        let source = if merged.is_file() && is_newer(&merged, &primary)? {
            let to = assembly_dest.join(&assembly);
            let bytes = fs::read(&merged).map_err(|source| OverlayError::Read {
                path: merged.clone(),
                source,
            })?;
            write_atomic(&to, &bytes).map_err(|source| OverlayError::Copy {
                from: merged.clone(),
                to: to.clone(),
                source,
            })?;
            tracing::debug!("Copied merged {}", assembly);
            report.copied.push(to);
            PackSource::Merged
        } else {
            let mut count = 0;
            for file in variant.assemblies() {
                let Some(name) = file.file_name() else {
                    continue;
                };
                copy_into(file, &assembly_dest.join(name), report)?;
                count += 1;
            }
            PackSource::Loose(count)
        };

        let targets = variant.file(&pack.targets_file);
        for dest_dir in ["build", "buildCrossTargeting"] {
            let dest_dir = package_dir.join(dest_dir);
            require_dir(&dest_dir)?;
            copy_into(&targets, &dest_dir.join(&pack.targets_file), report)?;
        }

        Ok(source)
    }

    fn pack_variant(&self, pack: &PackComponentSpec) -> Result<ArtifactVariant, OverlayError> {
        let bin_dir = self.bin_dir(&pack.name);
        let pattern =
            glob::Pattern::new(&pack.variant_pattern).map_err(|e| OverlayError::InvalidPattern {
                pattern: pack.variant_pattern.clone(),
                message: e.to_string(),
            })?;

        let mut matches: Vec<PathBuf> = subdirectories(&bin_dir)?
            .into_iter()
            .filter(|dir| {
                dir.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| pattern.matches(n))
            })
            .collect();

        if matches.len() != 1 {
            return Err(if matches.is_empty() {
                OverlayError::NoVariant {
                    component: pack.name.clone(),
                    dir: bin_dir,
                    tags: pack.variant_pattern.clone(),
                }
            } else {
                OverlayError::AmbiguousVariant {
                    component: pack.name.clone(),
                    dir: bin_dir,
                    pattern: pack.variant_pattern.clone(),
                    found: matches.len(),
                }
            });
        }

        let dir = matches.remove(0);
        let tag = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.variant_at(&pack.name, &tag, dir)
    }

    fn apply_rule(
        &self,
        rule: &OverlayRule,
        sdk_dir: &Path,
        report: &mut OverlayReport,
    ) -> Result<(), OverlayError> {
        let source_dir = match rule.source {
            RuleSource::Artifact { ref component, ref tag } => self.bin_dir(component).join(tag),
            RuleSource::PackageCache { ref path } => self
                .package_cache
                .as_ref()
                .ok_or_else(|| OverlayError::NoPackageCache {
                    rule: rule.name.clone(),
                })?
                .join(path),
            RuleSource::Directory { ref path } => path.clone(),
        };
        require_dir(&source_dir)?;

        let dest_dir = sdk_dir.join(&rule.destination);
        require_dir(&dest_dir)?;

        for file in &rule.files {
            copy_into(&source_dir.join(file), &dest_dir.join(file), report)?;
        }

        if let Some(ref dependency) = rule.dependency {
            let request = dependency.patch_request();
            for manifest in &dependency.manifests {
                let path = sdk_dir.join(manifest);
                let outcome = patch_runtime_entry(&path, &request)?;
                report.patched.push((path, outcome));
            }
        }

        tracing::debug!("Applied overlay rule `{}`", rule.name);
        Ok(())
    }
}

fn require_dir(path: &Path) -> Result<(), OverlayError> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(OverlayError::MissingDirectory {
            path: path.to_path_buf(),
        })
    }
}

fn require_file(path: &Path) -> Result<(), OverlayError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(OverlayError::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

fn copy_into(from: &Path, to: &Path, report: &mut OverlayReport) -> Result<(), OverlayError> {
    require_file(from)?;
    fs::copy(from, to).map_err(|source| OverlayError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    tracing::debug!("Copied {} -> {}", from.display(), to.display());
    report.copied.push(to.to_path_buf());
    Ok(())
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, OverlayError> {
    require_dir(dir)?;
    let mut dirs: Vec<PathBuf> = read_dir(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn files_in(dir: &Path) -> Result<Vec<PathBuf>, OverlayError> {
    let mut files: Vec<PathBuf> = read_dir(dir)?
        .into_iter()
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, OverlayError> {
    let read_err = |source| OverlayError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        paths.push(entry.map_err(read_err)?.path());
    }
    Ok(paths)
}

fn is_newer(candidate: &Path, baseline: &Path) -> Result<bool, OverlayError> {
    let stamp = |path: &Path| {
        creation_time(path).map_err(|e| OverlayError::Read {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, format!("{e:#}")),
        })
    };
    Ok(stamp(candidate)? > stamp(baseline)?)
}
