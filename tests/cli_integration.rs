//! CLI integration tests for sdk-sandbox.
//!
//! Each test runs the binary against throwaway toolchain and manifest
//! fixtures. `HOME` points into the fixture so no user configuration is read.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

const TFM: &str = ".NETCoreApp,Version=v5.0";
const PKG: &str = "NuGet.Build.Tasks/5.3.0";

/// Get the sdk-sandbox binary command, isolated from user configuration.
fn sandbox(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sdk-sandbox").unwrap();
    cmd.env("HOME", home)
        .env_remove("SDK_SANDBOX_SOURCE")
        .env_remove("SDK_SANDBOX_ARTIFACTS")
        .env_remove("SDK_SANDBOX_SDK_PREFIX")
        .env_remove("SDK_SANDBOX_CONFIGURATION")
        .current_dir(home);
    cmd
}

fn deps_json() -> String {
    format!(
        r#"{{
  "runtimeTarget": {{ "name": "{TFM}" }},
  "targets": {{
    "{TFM}": {{
      "{PKG}": {{
        "runtime": {{
          "lib/netstandard2.0/NuGet.Build.Tasks.dll": {{
            "assemblyVersion": "5.3.0.0",
            "fileVersion": "5.3.0.1"
          }}
        }}
      }}
    }}
  }},
  "libraries": {{}}
}}
"#
    )
}

/// Host script that echoes its arguments and the sdk path, and exits with
/// the code given after `exit`.
const HOST_SCRIPT: &str = r#"#!/bin/sh
echo "args: $*"
echo "MSBuildSDKsPath=$MSBuildSDKsPath"
if [ "$1" = "exit" ]; then
  echo "failing" >&2
  exit "$2"
fi
"#;

/// A source toolchain with the given sdk versions.
fn toolchain(root: &Path, versions: &[&str]) -> PathBuf {
    let source = root.join("source");
    for version in versions {
        let sdk = source.join("sdk").join(version);
        fs::create_dir_all(sdk.join("Sdks")).unwrap();
        fs::write(sdk.join("dotnet.deps.json"), deps_json()).unwrap();
    }
    let host = source.join("dotnet");
    fs::write(&host, HOST_SCRIPT).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&host, fs::Permissions::from_mode(0o755)).unwrap();
    }
    source
}

// ============================================================================
// general
// ============================================================================

#[test]
fn test_help_lists_commands() {
    let tmp = TempDir::new().unwrap();
    sandbox(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("provision"))
        .stdout(predicate::str::contains("patch-manifest"))
        .stdout(predicate::str::contains("exec"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn test_completions_bash() {
    let tmp = TempDir::new().unwrap();
    sandbox(tmp.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sdk-sandbox"));
}

// ============================================================================
// sdk-sandbox patch-manifest
// ============================================================================

fn patch_args(manifest: &Path, tfm: &str) -> Vec<String> {
    vec![
        "patch-manifest".to_string(),
        manifest.display().to_string(),
        "--target-framework".to_string(),
        tfm.to_string(),
        "--package".to_string(),
        PKG.to_string(),
        "--entry".to_string(),
        "lib/netstandard2.1/Extra.dll".to_string(),
        "--assembly-version".to_string(),
        "4.0.4.0".to_string(),
        "--file-version".to_string(),
        "5.0.19.47301".to_string(),
    ]
}

#[test]
fn test_patch_manifest_inserts_then_is_unchanged() {
    let tmp = TempDir::new().unwrap();
    let manifest = tmp.path().join("dotnet.deps.json");
    fs::write(&manifest, deps_json()).unwrap();

    sandbox(tmp.path())
        .args(patch_args(&manifest, TFM))
        .assert()
        .success()
        .stderr(predicate::str::contains("Inserted"));

    let patched = fs::read_to_string(&manifest).unwrap();
    assert!(patched.contains("lib/netstandard2.1/Extra.dll"));
    assert!(patched.contains("5.0.19.47301"));
    assert!(patched.contains("lib/netstandard2.0/NuGet.Build.Tasks.dll"));

    sandbox(tmp.path())
        .args(patch_args(&manifest, TFM))
        .assert()
        .success()
        .stderr(predicate::str::contains("Unchanged"));
    assert_eq!(fs::read_to_string(&manifest).unwrap(), patched);
}

#[test]
fn test_patch_manifest_missing_framework_fails() {
    let tmp = TempDir::new().unwrap();
    let manifest = tmp.path().join("dotnet.deps.json");
    fs::write(&manifest, deps_json()).unwrap();

    sandbox(tmp.path())
        .args(patch_args(&manifest, ".NETCoreApp,Version=v3.0"))
        .assert()
        .failure()
        .stderr(predicate::str::contains(".NETCoreApp,Version=v3.0"));

    assert_eq!(fs::read_to_string(&manifest).unwrap(), deps_json());
}

// ============================================================================
// sdk-sandbox clean
// ============================================================================

#[test]
fn test_clean_removes_directories() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("clone");
    fs::create_dir_all(dir.join("sdk/5.0.100")).unwrap();
    fs::write(dir.join("sdk/5.0.100/a.dll"), "x").unwrap();

    sandbox(tmp.path())
        .args(["clean", "--retries", "2", "--delay-ms", "1"])
        .arg(&dir)
        .arg(tmp.path().join("never-created"))
        .assert()
        .success()
        .stderr(predicate::str::contains("Removed"));

    assert!(!dir.exists());
}

// ============================================================================
// sdk-sandbox provision
// ============================================================================

#[test]
fn test_provision_into_destination() {
    let tmp = TempDir::new().unwrap();
    let source = toolchain(tmp.path(), &["3.1.400", "5.0.100"]);
    let dest = tmp.path().join("clone");

    sandbox(tmp.path())
        .args(["provision", "--no-overlay", "--source"])
        .arg(&source)
        .arg("--dest")
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("5.0.100"))
        .stdout(predicate::str::contains("env.MSBuildSDKsPath"));

    assert!(dest.join("sdk/5.0.100/dotnet.deps.json").is_file());
    assert!(dest.join("dotnet").is_file());
}

#[test]
fn test_provision_sdk_prefix_from_environment() {
    let tmp = TempDir::new().unwrap();
    let source = toolchain(tmp.path(), &["3.1.400", "5.0.100"]);

    sandbox(tmp.path())
        .env("SDK_SANDBOX_SOURCE", &source)
        .env("SDK_SANDBOX_SDK_PREFIX", "3")
        .args(["provision", "--no-overlay", "--dest"])
        .arg(tmp.path().join("clone"))
        .assert()
        .success()
        .stdout(predicate::str::contains("3.1.400"));
}

#[test]
fn test_provision_without_matching_sdk_fails() {
    let tmp = TempDir::new().unwrap();
    let source = toolchain(tmp.path(), &["5.0.100"]);
    let dest = tmp.path().join("clone");

    sandbox(tmp.path())
        .args(["provision", "--no-overlay", "--sdk-prefix", "7", "--source"])
        .arg(&source)
        .arg("--dest")
        .arg(&dest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("starts with `7`"));

    // Nothing is copied when the source has no usable sdk.
    assert!(!dest.join("sdk").exists());
}

#[test]
fn test_provision_missing_artifacts_fails() {
    let tmp = TempDir::new().unwrap();
    let source = toolchain(tmp.path(), &["5.0.100"]);

    sandbox(tmp.path())
        .args(["provision", "--source"])
        .arg(&source)
        .arg("--artifacts")
        .arg(tmp.path().join("artifacts"))
        .arg("--dest")
        .arg(tmp.path().join("clone"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ============================================================================
// sdk-sandbox exec
// ============================================================================

#[cfg(unix)]
#[test]
fn test_exec_runs_host_with_sandbox_environment() {
    let tmp = TempDir::new().unwrap();
    let source = toolchain(tmp.path(), &["5.0.100"]);

    sandbox(tmp.path())
        .args(["exec", "--toolchain"])
        .arg(&source)
        .args(["--", "restore", "a.csproj"])
        .assert()
        .success()
        .stdout(predicate::str::contains("args: restore a.csproj"))
        .stdout(predicate::str::contains(format!(
            "MSBuildSDKsPath={}",
            source.join("sdk/5.0.100/Sdks").display()
        )));
}

#[cfg(unix)]
#[test]
fn test_exec_propagates_exit_code() {
    let tmp = TempDir::new().unwrap();
    let source = toolchain(tmp.path(), &["5.0.100"]);

    sandbox(tmp.path())
        .args(["exec", "--toolchain"])
        .arg(&source)
        .args(["--", "exit", "3"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("failing"));
}
