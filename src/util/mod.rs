//! Shared utilities

pub mod config;
pub mod fs;
pub mod hash;
pub mod process;

pub use config::SandboxConfig;
pub use fs::{remove_dir_resilient, RetryPolicy, ScratchDir};
pub use process::{CommandResult, ProcessBuilder, ProcessError, ProcessRegistry};
