//! Test utilities for sdk-sandbox unit tests.
//!
//! Fixtures build fake toolchain installations and artifact trees on disk.
//! [`MockGenerator`] stands in for the host's project generator, and on unix
//! the fake toolchain's host is a shell script that records its invocations.

pub mod fixtures;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::ops::scaffold::ProjectGenerator;
use crate::util::process::{CommandResult, ProcessError};

pub use fixtures::*;

/// File the fake host appends one line per invocation to, next to itself.
pub const FAKE_HOST_LOG: &str = "invocations.log";

/// Fake host: logs `<cwd>|<args>` and mimics the subcommands a session uses.
///
/// - `new <template>` writes `<template>.csproj`, `Program.cs` and `obj/`
/// - `print-env` echoes the session's fixed environment overrides
/// - `sleep <secs>` sleeps
/// - anything containing `--fail` writes to stderr and exits 1
const FAKE_HOST_SCRIPT: &str = r#"#!/bin/sh
echo "$(pwd)|$*" >> "$(dirname "$0")/invocations.log"
case "$*" in
  *--fail*)
    echo "error: requested failure" >&2
    exit 1
    ;;
esac
case "$1" in
  new)
    echo "<Project Sdk=\"Microsoft.NET.Sdk\" />" > "$2.csproj"
    echo "class Program {}" > Program.cs
    mkdir -p obj
    echo "{}" > obj/project.assets.json
    echo "The template \"$2\" was created successfully."
    ;;
  print-env)
    echo "MSBuildSDKsPath=$MSBuildSDKsPath"
    echo "UseSharedCompilation=$UseSharedCompilation"
    echo "DOTNET_MULTILEVEL_LOOKUP=$DOTNET_MULTILEVEL_LOOKUP"
    echo "MSBUILDDISABLENODEREUSE=$MSBUILDDISABLENODEREUSE"
    ;;
  sleep)
    sleep "$2"
    ;;
  *)
    echo "$*"
    ;;
esac
exit 0
"#;

/// Write the fake host to `path`.
pub fn write_fake_host(path: &Path) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, FAKE_HOST_SCRIPT).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}

/// Lines the fake host at `host` has logged so far.
pub fn fake_host_invocations(host: &Path) -> Vec<String> {
    let log = host.with_file_name(FAKE_HOST_LOG);
    fs::read_to_string(log)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Every entry under `root` with its length and modification time, sorted.
///
/// Two equal snapshots mean nothing under `root` was written in between.
pub fn snapshot_tree(root: &Path) -> Vec<(PathBuf, u64, SystemTime)> {
    let mut entries: Vec<_> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| {
            let meta = entry.metadata().unwrap();
            (
                entry.path().to_path_buf(),
                meta.len(),
                meta.modified().unwrap(),
            )
        })
        .collect();
    entries.sort();
    entries
}

/// In-process project generator that records each call.
///
/// Writes `<first word of args>.csproj`, a source file and an `obj/`
/// directory, then returns the configured result.
pub struct MockGenerator {
    calls: Mutex<Vec<String>>,
    result: CommandResult,
}

impl MockGenerator {
    pub fn new() -> Self {
        MockGenerator {
            calls: Mutex::new(Vec::new()),
            result: CommandResult::new(0, "The template was created successfully.", ""),
        }
    }

    /// Return `result` from every call instead of success.
    pub fn with_result(mut self, result: CommandResult) -> Self {
        self.result = result;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectGenerator for MockGenerator {
    fn generate(&self, args: &str, dir: &Path) -> Result<CommandResult, ProcessError> {
        self.calls.lock().unwrap().push(args.to_string());

        let template = args.split_whitespace().next().unwrap_or("console");
        fs::write(
            dir.join(format!("{template}.csproj")),
            "<Project Sdk=\"Microsoft.NET.Sdk\" />",
        )
        .unwrap();
        let source = if template == "classlib" {
            "Class1.cs"
        } else {
            "Program.cs"
        };
        fs::write(dir.join(source), "// generated").unwrap();
        fs::create_dir_all(dir.join("obj")).unwrap();
        fs::write(dir.join("obj").join("project.assets.json"), "{}").unwrap();

        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mock_generator_records_calls() {
        let tmp = TempDir::new().unwrap();
        let generator = MockGenerator::new();

        let result = generator.generate("classlib -f net5.0", tmp.path()).unwrap();
        assert!(result.is_clean());
        assert!(tmp.path().join("classlib.csproj").is_file());
        assert!(tmp.path().join("Class1.cs").is_file());
        assert_eq!(generator.calls(), vec!["classlib -f net5.0".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_fake_host_logs_invocations() {
        use crate::util::process::ProcessBuilder;

        let tmp = TempDir::new().unwrap();
        let host = tmp.path().join("dotnet");
        write_fake_host(&host);

        let result = ProcessBuilder::new(&host)
            .args(["restore", "a.csproj"])
            .cwd(tmp.path())
            .exec()
            .unwrap();
        assert_eq!(result.stdout.trim(), "restore a.csproj");

        let calls = fake_host_invocations(&host);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].ends_with("|restore a.csproj"));
    }
}
