//! A provisioned toolchain clone.

use std::path::{Path, PathBuf};

/// Name of the directory holding sdk versions under a toolchain root.
pub const SDK_DIR: &str = "sdk";

/// Name of the directory holding sdk packages under an sdk version.
pub const SDKS_DIR: &str = "Sdks";

/// Platform file name of the host executable called `base`.
pub fn host_executable_name(base: &str) -> String {
    if cfg!(windows) && !base.ends_with(".exe") {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}

/// An isolated, disposable toolchain owned by one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainInstance {
    root: PathBuf,
    sdk_dir: PathBuf,
    host: PathBuf,
}

impl ToolchainInstance {
    pub fn new(root: PathBuf, sdk_dir: PathBuf, host: PathBuf) -> Self {
        ToolchainInstance { root, sdk_dir, host }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The selected `sdk/<version>` directory.
    pub fn sdk_dir(&self) -> &Path {
        &self.sdk_dir
    }

    /// The host executable inside the clone.
    pub fn host(&self) -> &Path {
        &self.host
    }

    /// `sdk/<version>/Sdks`, the sdk-resolver search path.
    pub fn sdks_dir(&self) -> PathBuf {
        self.sdk_dir.join(SDKS_DIR)
    }

    /// Version directory name, e.g. `5.0.100`.
    pub fn sdk_version(&self) -> Option<&str> {
        self.sdk_dir.file_name().and_then(|n| n.to_str())
    }
}
