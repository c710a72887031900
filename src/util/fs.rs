//! Filesystem utilities.
//!
//! Tree cloning for toolchain provisioning, atomic file replacement for
//! manifest rewrites, and the resilient recursive delete used by teardown.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use filetime::FileTime;
use thiserror::Error;
use walkdir::WalkDir;

/// How far in the past cloned files are backdated.
pub const CLONE_BACKDATE: Duration = Duration::from_secs(2 * 24 * 60 * 60);

/// Retry policy for [`remove_dir_resilient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total delete attempts after the first access-denied failure.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 100,
            delay: Duration::from_millis(100),
        }
    }
}

/// A directory could not be deleted. Only ever logged.
#[derive(Debug, Error)]
#[error("failed to remove `{}` after {attempts} attempt(s): {source}", path.display())]
pub struct CleanupFailure {
    pub path: PathBuf,
    pub attempts: u32,
    #[source]
    pub source: io::Error,
}

/// Counters reported by [`clone_tree`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloneStats {
    pub directories: usize,
    pub files: usize,
}

/// Mirror `src` into `dst`: every directory first, then every file.
///
/// Each copied file gets its modification time set to `mtime`, so
/// incremental-build checks in the clone see it as old and unchanged.
pub fn clone_tree(src: &Path, dst: &Path, mtime: SystemTime) -> Result<CloneStats> {
    let mut stats = CloneStats::default();
    let stamp = FileTime::from_system_time(mtime);

    fs::create_dir_all(dst)
        .with_context(|| format!("failed to create directory: {}", dst.display()))?;

    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry =
            entry.with_context(|| format!("failed to walk directory: {}", src.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let target = dst.join(relative_path(src, entry.path()));
        fs::create_dir_all(&target)
            .with_context(|| format!("failed to create directory: {}", target.display()))?;
        stats.directories += 1;
    }

    for entry in WalkDir::new(src).min_depth(1).follow_links(true) {
        let entry =
            entry.with_context(|| format!("failed to walk directory: {}", src.display()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let target = dst.join(relative_path(src, entry.path()));
        copy_file(entry.path(), &target)?;
        filetime::set_file_mtime(&target, stamp)
            .with_context(|| format!("failed to set mtime on {}", target.display()))?;
        stats.files += 1;
    }

    Ok(stats)
}

/// Copy `src` to `dst`, overwriting any existing file.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Write `contents` to a temporary file next to `path`, then rename it over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".sdk-sandbox-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tmp.write_all(contents)?;
    if let Ok(meta) = fs::metadata(path) {
        tmp.as_file().set_permissions(meta.permissions())?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Depth-first delete of `path` that absorbs transient access-denied errors.
///
/// Already-missing directories are a no-op. Failures that survive the retry
/// budget are logged and swallowed.
pub fn remove_dir_resilient(path: &Path, policy: RetryPolicy) {
    if let Err(failure) = try_remove_dir_resilient(path, policy) {
        tracing::warn!("{}", failure);
    }
}

/// Like [`remove_dir_resilient`], but reports the final failure.
pub fn try_remove_dir_resilient(path: &Path, policy: RetryPolicy) -> Result<(), CleanupFailure> {
    // Children first so one locked leaf does not block its siblings.
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                try_remove_dir_resilient(&entry.path(), policy)?;
            }
        }
    }

    let first = match remove_tree(path) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    match first.kind() {
        io::ErrorKind::PermissionDenied => {}
        // One immediate retry for generic I/O failures, then give up.
        _ => {
            return remove_tree(path).map_err(|source| CleanupFailure {
                path: path.to_path_buf(),
                attempts: 2,
                source,
            });
        }
    }

    let mut last = first;
    for attempt in 1..=policy.attempts {
        thread::sleep(policy.delay);
        match remove_tree(path) {
            Ok(()) => {
                tracing::debug!(
                    "removed {} after {} retr{}",
                    path.display(),
                    attempt,
                    if attempt == 1 { "y" } else { "ies" }
                );
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => last = e,
            Err(e) => {
                return Err(CleanupFailure {
                    path: path.to_path_buf(),
                    attempts: attempt + 1,
                    source: e,
                })
            }
        }
    }

    Err(CleanupFailure {
        path: path.to_path_buf(),
        attempts: policy.attempts + 1,
        source: last,
    })
}

fn remove_tree(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// A uniquely named directory that is deleted with [`remove_dir_resilient`]
/// when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    policy: RetryPolicy,
}

impl ScratchDir {
    /// Create a fresh empty directory under `base` (the system temp dir when `None`).
    pub fn create(base: Option<&Path>, prefix: &str, policy: RetryPolicy) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match base {
            Some(base) => {
                ensure_dir(base)?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .context("failed to create scratch directory")?;

        Ok(ScratchDir {
            path: dir.keep(),
            policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Give up ownership; the directory is left on disk.
    pub fn keep(self) -> PathBuf {
        let mut this = std::mem::ManuallyDrop::new(self);
        std::mem::take(&mut this.path)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        remove_dir_resilient(&self.path, self.policy);
    }
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Get the relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

/// Creation time when the platform reports one, modification time otherwise.
pub fn creation_time(path: &Path) -> Result<SystemTime> {
    let meta =
        fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    meta.created()
        .or_else(|_| meta.modified())
        .with_context(|| format!("no timestamps available for {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clone_tree_backdates_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(src.join("sdk/5.0.100/Sdks/empty")).unwrap();
        fs::write(src.join("host"), "bin").unwrap();
        fs::write(src.join("sdk/5.0.100/dotnet.dll"), "dll").unwrap();

        let stamp = SystemTime::now() - CLONE_BACKDATE;
        let stats = clone_tree(&src, &dst, stamp).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 4);
        assert!(dst.join("sdk/5.0.100/Sdks/empty").is_dir());
        assert_eq!(
            fs::read_to_string(dst.join("sdk/5.0.100/dotnet.dll")).unwrap(),
            "dll"
        );

        let mtime = fs::metadata(dst.join("host")).unwrap().modified().unwrap();
        let age = SystemTime::now().duration_since(mtime).unwrap();
        assert!(age >= CLONE_BACKDATE - Duration::from_secs(60));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deps.json");
        fs::write(&path, "old contents that are longer").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_atomic_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("NuGet.Build.Tasks.dll");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        write_atomic(&path, b"new").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_remove_dir_resilient_missing_is_noop() {
        let tmp = TempDir::new().unwrap();
        let gone = tmp.path().join("never-existed");

        assert!(try_remove_dir_resilient(&gone, RetryPolicy::default()).is_ok());

        fs::create_dir_all(gone.join("a/b")).unwrap();
        fs::write(gone.join("a/b/file"), "x").unwrap();
        remove_dir_resilient(&gone, RetryPolicy::default());
        remove_dir_resilient(&gone, RetryPolicy::default());
        assert!(!gone.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_dir_resilient_waits_out_a_lock() {
        use std::os::unix::fs::PermissionsExt;

        // Permission bits do not stop root from unlinking.
        if nix::unistd::geteuid().is_root() {
            return;
        }

        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("locked");
        let inner = root.join("inner");
        fs::create_dir_all(&inner).unwrap();
        fs::write(inner.join("held.dll"), "x").unwrap();

        // Unlinking from a read-only directory fails with EACCES until the
        // "lock" is released by restoring write permission.
        fs::set_permissions(&inner, fs::Permissions::from_mode(0o555)).unwrap();
        let release = inner.clone();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            match fs::set_permissions(&release, fs::Permissions::from_mode(0o755)) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => panic!("{e}"),
                _ => {}
            }
        });

        let policy = RetryPolicy {
            attempts: 50,
            delay: Duration::from_millis(20),
        };
        let result = try_remove_dir_resilient(&root, policy);
        releaser.join().unwrap();

        assert!(result.is_ok(), "{:?}", result.err());
        assert!(!root.exists());
    }

    #[test]
    fn test_scratch_dir_removed_on_drop() {
        let tmp = TempDir::new().unwrap();
        let path = {
            let scratch = ScratchDir::create(Some(tmp.path()), "cli-", RetryPolicy::default())
                .unwrap();
            fs::write(scratch.path().join("f"), "x").unwrap();
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_scratch_dir_keep() {
        let tmp = TempDir::new().unwrap();
        let scratch = ScratchDir::create(Some(tmp.path()), "cli-", RetryPolicy::default()).unwrap();
        let path = scratch.keep();
        assert!(path.is_dir());
    }
}
