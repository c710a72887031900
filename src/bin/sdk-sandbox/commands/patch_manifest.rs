//! `sdk-sandbox patch-manifest` command

use anyhow::Result;

use crate::cli::PatchManifestArgs;
use sdk_sandbox::core::manifest::{patch_runtime_entry, PatchOutcome, PatchRequest, RuntimeEntry};

pub fn execute(args: PatchManifestArgs) -> Result<()> {
    let request = PatchRequest {
        target_framework: args.target_framework,
        package: args.package,
        entry_path: args.entry,
        entry: RuntimeEntry::new(args.assembly_version, args.file_version),
    };

    let outcome = patch_runtime_entry(&args.manifest, &request)?;
    let verb = match outcome {
        PatchOutcome::Inserted => "Inserted",
        PatchOutcome::Updated => "Updated",
        PatchOutcome::Unchanged => "Unchanged",
    };
    eprintln!(
        "{:>12} {} in {}",
        verb,
        request.entry_path,
        args.manifest.display()
    );
    Ok(())
}
