//! `sdk-sandbox clean` command

use std::time::Duration;

use anyhow::Result;

use crate::cli::CleanArgs;
use sdk_sandbox::util::config::SandboxConfig;
use sdk_sandbox::util::fs::try_remove_dir_resilient;

pub fn execute(args: CleanArgs, config: SandboxConfig) -> Result<()> {
    let mut policy = config.retry_policy();
    if let Some(retries) = args.retries {
        policy.attempts = retries;
    }
    if let Some(delay) = args.delay_ms {
        policy.delay = Duration::from_millis(delay);
    }

    for path in &args.paths {
        if !path.exists() {
            continue;
        }
        match try_remove_dir_resilient(path, policy) {
            Ok(()) => eprintln!("     Removed {}", path.display()),
            // Cleanup failures are reported but never fail the command.
            Err(e) => eprintln!("warning: {}", e),
        }
    }
    Ok(())
}
