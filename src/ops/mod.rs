//! High-level operations.
//!
//! Provisioning and overlay run once per session; scaffolding and command
//! execution run per test through [`Session`].

pub mod overlay;
pub mod provision;
pub mod scaffold;
pub mod session;

pub use overlay::{ArtifactOverlay, OverlayError, OverlayReport, PackSource};
pub use provision::{select_sdk_dir, ProvisionError, ProvisionedToolchain, ToolchainProvisioner};
pub use scaffold::{
    write_tool_project, PackageIdentity, ProjectGenerator, ScaffoldError, TemplateCache,
    ToolProjectSpec,
};
pub use session::{fixed_environment, CommandError, Session};
