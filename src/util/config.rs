//! Configuration file support.
//!
//! Two locations are consulted:
//! - Project: `.sdk-sandbox/config.toml`
//! - Global: `~/.sdk-sandbox/config.toml`
//!
//! The first one that exists is used whole; there is no field-level merging.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::artifact::{
    default_restore_components, BuildConfiguration, ComponentSpec, PackComponentSpec, TagTiers,
};
use crate::core::rule::OverlayRule;
use crate::util::fs::RetryPolicy;
use crate::util::process::find_executable;

/// Sandbox configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Source toolchain settings
    pub toolchain: ToolchainConfig,

    /// Built artifacts to overlay
    pub artifacts: ArtifactsConfig,

    /// Declarative overlay rules
    pub overlay: OverlayConfig,

    /// Child process settings
    pub process: ProcessConfig,

    /// Teardown settings
    pub cleanup: CleanupConfig,

    /// Parent directory for toolchain clones and template caches
    /// (system temp dir when unset)
    pub work_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Installation to clone (discovered from PATH when unset)
    pub source: Option<PathBuf>,

    /// Host executable base name
    pub host: String,

    /// Leading digits of the sdk version directory to target
    pub sdk_version_prefix: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            source: None,
            host: "dotnet".to_string(),
            sdk_version_prefix: "5".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Root of the component build outputs
    pub root: Option<PathBuf>,

    pub configuration: BuildConfiguration,

    pub toolset_version: String,

    /// Target-runtime tags, newest tier first
    pub tag_tiers: TagTiers,

    /// Components copied into the sdk root
    pub restore_components: Vec<ComponentSpec>,

    /// Overlay the packaging-task component
    pub include_pack: bool,

    /// The packaging-task component
    pub pack: PackComponentSpec,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        ArtifactsConfig {
            root: None,
            configuration: BuildConfiguration::default(),
            toolset_version: "16.0".to_string(),
            tag_tiers: TagTiers::default(),
            restore_components: default_restore_components(),
            include_pack: true,
            pack: PackComponentSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Built-in rules enabled by name (e.g. "pkcs-interop"), applied after `rules`
    pub presets: Vec<String>,

    pub rules: Vec<OverlayRule>,

    /// Package cache used by `package-cache` rule sources
    pub package_cache: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Default command timeout in seconds
    pub timeout_secs: u64,

    /// Extra environment overrides applied to every command
    pub env: BTreeMap<String, String>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        ProcessConfig {
            timeout_secs: 60,
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub retries: u32,
    pub delay_ms: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        CleanupConfig {
            retries: policy.attempts,
            delay_ms: policy.delay.as_millis() as u64,
        }
    }
}

impl SandboxConfig {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load configuration with fallback to defaults if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            Self::load(path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {}: {:#}", path.display(), e);
                Self::default()
            })
        } else {
            Self::default()
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.process.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.cleanup.retries,
            delay: Duration::from_millis(self.cleanup.delay_ms),
        }
    }

    /// The configured source toolchain, or the directory of the host found on PATH.
    pub fn source_toolchain(&self) -> Option<PathBuf> {
        if let Some(ref source) = self.toolchain.source {
            return Some(source.clone());
        }
        let host = find_executable(&self.toolchain.host)?;
        let host = host.canonicalize().unwrap_or(host);
        host.parent().map(Path::to_path_buf)
    }

    /// The configured package cache, or the platform default.
    pub fn package_cache(&self) -> Option<PathBuf> {
        self.overlay
            .package_cache
            .clone()
            .or_else(default_package_cache)
    }
}

/// `%USERPROFILE%\.nuget\packages` on Windows, `~/.local/share/NuGet/v3-cache` elsewhere.
pub fn default_package_cache() -> Option<PathBuf> {
    let home = directories::BaseDirs::new()?.home_dir().to_path_buf();
    if cfg!(windows) {
        Some(home.join(".nuget").join("packages"))
    } else {
        Some(home.join(".local").join("share").join("NuGet").join("v3-cache"))
    }
}

/// Get the global config directory (~/.sdk-sandbox).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".sdk-sandbox"))
}

/// Get the global config path (~/.sdk-sandbox/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the project config path (.sdk-sandbox/config.toml).
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".sdk-sandbox").join("config.toml")
}

/// Load the project config if present, else the global one, else defaults.
pub fn load_config(project_root: &Path) -> SandboxConfig {
    let project = project_config_path(project_root);
    if project.exists() {
        return SandboxConfig::load_or_default(&project);
    }
    match global_config_path() {
        Some(global) => SandboxConfig::load_or_default(&global),
        None => SandboxConfig::default(),
    }
}
