//! `sdk-sandbox exec` command
//!
//! Runs the host of an already provisioned toolchain with the same fixed
//! environment a session uses, then exits with the host's exit code.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::ExecArgs;
use sdk_sandbox::core::toolchain::{host_executable_name, ToolchainInstance, SDK_DIR};
use sdk_sandbox::ops::{fixed_environment, select_sdk_dir};
use sdk_sandbox::util::config::SandboxConfig;
use sdk_sandbox::util::process::ProcessBuilder;

pub fn execute(args: ExecArgs, config: SandboxConfig) -> Result<()> {
    let prefix = args
        .sdk
        .sdk_prefix
        .unwrap_or_else(|| config.toolchain.sdk_version_prefix.clone());
    let sdk_dir = select_sdk_dir(&args.toolchain.join(SDK_DIR), &prefix)?;
    let host = args.toolchain.join(host_executable_name(&config.toolchain.host));
    let instance = ToolchainInstance::new(args.toolchain.clone(), sdk_dir, host);

    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir()?,
    };
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.command_timeout());

    let builder = ProcessBuilder::new(instance.host())
        .args(&args.args)
        .envs(&fixed_environment(&instance, &config.process.env))
        .cwd(&cwd)
        .timeout(timeout);
    let result = builder
        .exec()
        .with_context(|| format!("failed to run `{}`", builder.display_command()))?;

    std::io::stdout().write_all(result.stdout.as_bytes())?;
    std::io::stderr().write_all(result.stderr.as_bytes())?;

    if !result.success {
        std::process::exit(result.exit_code);
    }
    Ok(())
}
