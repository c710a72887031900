//! CLI definitions using clap.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use sdk_sandbox::core::artifact::BuildConfiguration;
use sdk_sandbox::util::config::{load_config, SandboxConfig};

/// sdk-sandbox - disposable, patched toolchain environments
#[derive(Parser)]
#[command(name = "sdk-sandbox")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: .sdk-sandbox/config.toml, then ~/.sdk-sandbox/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn load_config(&self) -> Result<SandboxConfig> {
        match self.config {
            Some(ref path) => SandboxConfig::load(path),
            None => Ok(load_config(&std::env::current_dir()?)),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Clone a toolchain, overlay built artifacts and keep the result
    Provision(ProvisionArgs),

    /// Add or update one runtime entry in a dependency manifest
    PatchManifest(PatchManifestArgs),

    /// Run the host of a provisioned toolchain with the sandbox environment
    Exec(ExecArgs),

    /// Remove directories, retrying while they are locked
    Clean(CleanArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Overrides shared by commands that locate an sdk.
#[derive(Args)]
pub struct SdkArgs {
    /// Leading characters of the sdk version directory to use
    #[arg(long, env = "SDK_SANDBOX_SDK_PREFIX")]
    pub sdk_prefix: Option<String>,
}

#[derive(Args)]
pub struct ProvisionArgs {
    /// Toolchain installation to clone (default: from config, then PATH)
    #[arg(long, env = "SDK_SANDBOX_SOURCE")]
    pub source: Option<PathBuf>,

    /// Root of the component build outputs to overlay
    #[arg(long, env = "SDK_SANDBOX_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    /// Build configuration of the artifacts
    #[arg(long, env = "SDK_SANDBOX_CONFIGURATION")]
    pub configuration: Option<BuildConfiguration>,

    #[command(flatten)]
    pub sdk: SdkArgs,

    /// Clone into this directory instead of a fresh scratch directory
    #[arg(long)]
    pub dest: Option<PathBuf>,

    /// Skip the artifact overlay even if an artifacts root is configured
    #[arg(long)]
    pub no_overlay: bool,
}

#[derive(Args)]
pub struct PatchManifestArgs {
    /// Path to the dependency manifest (*.deps.json)
    pub manifest: PathBuf,

    /// Target framework key, e.g. ".NETCoreApp,Version=v5.0"
    #[arg(long)]
    pub target_framework: String,

    /// Package key, e.g. "NuGet.Build.Tasks/5.3.0"
    #[arg(long)]
    pub package: String,

    /// Runtime entry path, e.g. "lib/netstandard2.1/Foo.dll"
    #[arg(long)]
    pub entry: String,

    #[arg(long)]
    pub assembly_version: String,

    #[arg(long)]
    pub file_version: String,
}

#[derive(Args)]
pub struct ExecArgs {
    /// Root of a provisioned toolchain
    #[arg(long)]
    pub toolchain: PathBuf,

    #[command(flatten)]
    pub sdk: SdkArgs,

    /// Working directory (default: current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Timeout in seconds (default: from config)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Arguments passed to the host
    #[arg(last = true, required = true)]
    pub args: Vec<String>,
}

#[derive(Args)]
pub struct CleanArgs {
    /// Directories to remove
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Attempts per locked entry (default: from config)
    #[arg(long)]
    pub retries: Option<u32>,

    /// Delay between attempts in milliseconds (default: from config)
    #[arg(long)]
    pub delay_ms: Option<u64>,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}
