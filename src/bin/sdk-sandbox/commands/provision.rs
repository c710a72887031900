//! `sdk-sandbox provision` command

use anyhow::{Context, Result};

use crate::cli::ProvisionArgs;
use sdk_sandbox::ops::{fixed_environment, ToolchainProvisioner};
use sdk_sandbox::util::config::SandboxConfig;
use sdk_sandbox::util::fs::ensure_dir;

pub fn execute(args: ProvisionArgs, mut config: SandboxConfig) -> Result<()> {
    if let Some(source) = args.source {
        config.toolchain.source = Some(source);
    }
    if let Some(artifacts) = args.artifacts {
        config.artifacts.root = Some(artifacts);
    }
    if let Some(configuration) = args.configuration {
        config.artifacts.configuration = configuration;
    }
    if let Some(prefix) = args.sdk.sdk_prefix {
        config.toolchain.sdk_version_prefix = prefix;
    }
    if args.no_overlay {
        config.artifacts.root = None;
    }

    let provisioner = ToolchainProvisioner::from_config(&config)?;

    let (instance, report) = match args.dest {
        Some(dest) => {
            ensure_dir(&dest)?;
            if dest.read_dir()?.next().is_some() {
                anyhow::bail!("destination {} is not empty", dest.display());
            }
            provisioner
                .provision_into(&dest)
                .with_context(|| format!("failed to provision into {}", dest.display()))?
        }
        None => {
            let provisioned = provisioner.provision()?;
            let report = provisioned.overlay.clone();
            (provisioned.keep(), report)
        }
    };

    if let Some(report) = report {
        eprintln!(
            "    Overlaid {} file(s), {} manifest patch(es)",
            report.copied.len(),
            report.patched.len()
        );
    }
    eprintln!("  Provisioned {}", instance.root().display());

    println!("root = {}", instance.root().display());
    println!("sdk = {}", instance.sdk_dir().display());
    println!("host = {}", instance.host().display());
    for (key, value) in fixed_environment(&instance, &config.process.env) {
        println!("env.{key} = {value}");
    }
    Ok(())
}
