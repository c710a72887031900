//! Clone a toolchain installation and overlay built artifacts onto it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use thiserror::Error;

use crate::core::toolchain::{host_executable_name, ToolchainInstance, SDK_DIR};
use crate::ops::overlay::{ArtifactOverlay, OverlayError, OverlayReport};
use crate::util::config::SandboxConfig;
use crate::util::fs::{clone_tree, RetryPolicy, ScratchDir, CLONE_BACKDATE};

/// Errors raised while building a toolchain clone.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("no source toolchain configured and `{host}` is not on PATH")]
    NoSource { host: String },

    #[error("source toolchain not found: {}", path.display())]
    MissingSource { path: PathBuf },

    #[error("toolchain {} has no `sdk` directory", path.display())]
    MissingSdkRoot { path: PathBuf },

    #[error("no sdk version in {} starts with `{prefix}` (found: {found})", dir.display())]
    NoMatchingSdk {
        dir: PathBuf,
        prefix: String,
        found: String,
    },

    #[error("failed to clone toolchain into {}: {message}", dest.display())]
    Clone { dest: PathBuf, message: String },

    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

/// A provisioned clone together with the scratch directory that owns it.
///
/// Dropping this removes the clone.
#[derive(Debug)]
pub struct ProvisionedToolchain {
    pub instance: ToolchainInstance,
    pub overlay: Option<OverlayReport>,
    dir: ScratchDir,
}

impl ProvisionedToolchain {
    pub fn instance(&self) -> &ToolchainInstance {
        &self.instance
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.dir
    }

    /// Leave the clone on disk and return it.
    pub fn keep(self) -> ToolchainInstance {
        self.dir.keep();
        self.instance
    }
}

/// Builds [`ToolchainInstance`]s from one source installation.
#[derive(Debug, Clone)]
pub struct ToolchainProvisioner {
    source: PathBuf,
    sdk_version_prefix: String,
    host: String,
    overlay: Option<ArtifactOverlay>,
    work_root: Option<PathBuf>,
    policy: RetryPolicy,
}

impl ToolchainProvisioner {
    pub fn new(source: impl Into<PathBuf>, sdk_version_prefix: impl Into<String>) -> Self {
        ToolchainProvisioner {
            source: source.into(),
            sdk_version_prefix: sdk_version_prefix.into(),
            host: "dotnet".to_string(),
            overlay: None,
            work_root: None,
            policy: RetryPolicy::default(),
        }
    }

    /// Everything from `config`. The overlay is skipped when no artifacts root is set.
    pub fn from_config(config: &SandboxConfig) -> Result<Self, ProvisionError> {
        let source = config
            .source_toolchain()
            .ok_or_else(|| ProvisionError::NoSource {
                host: config.toolchain.host.clone(),
            })?;

        let overlay = config
            .artifacts
            .root
            .as_ref()
            .map(|root| ArtifactOverlay::from_config(config, root.clone()))
            .transpose()?;

        Ok(ToolchainProvisioner::new(source, config.toolchain.sdk_version_prefix.clone())
            .with_host(config.toolchain.host.clone())
            .with_overlay(overlay)
            .with_work_root(config.work_root.clone())
            .with_retry_policy(config.retry_policy()))
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_overlay(mut self, overlay: Option<ArtifactOverlay>) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_work_root(mut self, work_root: Option<PathBuf>) -> Self {
        self.work_root = work_root;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Provision into a fresh scratch directory that is removed on drop.
    pub fn provision(&self) -> Result<ProvisionedToolchain, ProvisionError> {
        let dir = ScratchDir::create(self.work_root.as_deref(), "cli-", self.policy).map_err(
            |e| ProvisionError::Clone {
                dest: self.work_root.clone().unwrap_or_else(std::env::temp_dir),
                message: format!("{e:#}"),
            },
        )?;

        let (instance, overlay) = self.provision_into(dir.path())?;
        Ok(ProvisionedToolchain {
            instance,
            overlay,
            dir,
        })
    }

    /// Provision into `root`, which the caller owns.
    pub fn provision_into(
        &self,
        root: &Path,
    ) -> Result<(ToolchainInstance, Option<OverlayReport>), ProvisionError> {
        if !self.source.is_dir() {
            return Err(ProvisionError::MissingSource {
                path: self.source.clone(),
            });
        }
        // Fail before copying anything if the source has no usable sdk.
        select_sdk_dir(&self.source.join(SDK_DIR), &self.sdk_version_prefix)?;

        tracing::info!(
            "Cloning {} into {}",
            self.source.display(),
            root.display()
        );
        let stamp = SystemTime::now() - CLONE_BACKDATE;
        let stats = clone_tree(&self.source, root, stamp)
            .with_context(|| format!("cloning {}", self.source.display()))
            .map_err(|e| ProvisionError::Clone {
                dest: root.to_path_buf(),
                message: format!("{e:#}"),
            })?;
        tracing::debug!(
            "Cloned {} directories and {} files",
            stats.directories,
            stats.files
        );

        let sdk_dir = select_sdk_dir(&root.join(SDK_DIR), &self.sdk_version_prefix)?;
        tracing::info!("Using sdk {}", sdk_dir.display());

        let overlay = match self.overlay {
            Some(ref overlay) => Some(overlay.apply(&sdk_dir)?),
            None => {
                tracing::info!("No artifacts root configured; toolchain left as cloned");
                None
            }
        };

        let host = root.join(host_executable_name(&self.host));
        if !host.is_file() {
            tracing::warn!("host executable not found at {}", host.display());
        }

        Ok((
            ToolchainInstance::new(root.to_path_buf(), sdk_dir, host),
            overlay,
        ))
    }
}

/// Pick the sdk version directory in `sdk_root` whose name starts with `prefix`.
///
/// When several match, the highest semantic version wins; names that do not
/// parse as versions rank below those that do.
pub fn select_sdk_dir(sdk_root: &Path, prefix: &str) -> Result<PathBuf, ProvisionError> {
    let root_missing = || ProvisionError::MissingSdkRoot {
        path: sdk_root.parent().unwrap_or(sdk_root).to_path_buf(),
    };
    if !sdk_root.is_dir() {
        return Err(root_missing());
    }

    let mut names: Vec<String> = fs::read_dir(sdk_root)
        .map_err(|_| root_missing())?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();

    let best = names
        .iter()
        .filter(|name| name.starts_with(prefix))
        .max_by(|a, b| {
            let va = semver::Version::parse(a).ok();
            let vb = semver::Version::parse(b).ok();
            va.cmp(&vb).then_with(|| a.cmp(b))
        });

    match best {
        Some(name) => Ok(sdk_root.join(name)),
        None => Err(ProvisionError::NoMatchingSdk {
            dir: sdk_root.to_path_buf(),
            prefix: prefix.to_string(),
            found: if names.is_empty() {
                "nothing".to_string()
            } else {
                names.join(", ")
            },
        }),
    }
}
