//! Command implementations

pub mod clean;
pub mod completions;
pub mod exec;
pub mod patch_manifest;
pub mod provision;
