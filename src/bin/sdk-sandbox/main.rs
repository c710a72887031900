//! sdk-sandbox CLI - provision and drive disposable toolchain clones

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("sdk_sandbox=debug")
    } else {
        EnvFilter::new("sdk_sandbox=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let config = cli.load_config()?;

    match cli.command {
        Commands::Provision(args) => commands::provision::execute(args, config),
        Commands::PatchManifest(args) => commands::patch_manifest::execute(args),
        Commands::Exec(args) => commands::exec::execute(args, config),
        Commands::Clean(args) => commands::clean::execute(args, config),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
