//! sdk-sandbox - disposable, patched toolchain environments for end-to-end
//! tests of a package-management CLI.
//!
//! A [`Session`] clones an installed toolchain, overlays freshly built
//! component artifacts onto it, patches the runtime manifests that must
//! know about them, and then drives the clone through restore, pack and
//! build commands. Everything the session creates is torn down with it.

pub mod core;
pub mod ops;
pub mod util;

/// Fixtures for sdk-sandbox unit tests.
///
/// Only compiled for tests. Provides fake toolchain installations, artifact
/// trees and a recording project generator.
#[cfg(test)]
pub mod test_support;

pub use core::{
    manifest::RuntimeManifest, rule::OverlayRule, toolchain::ToolchainInstance,
};
pub use ops::{ArtifactOverlay, Session, ToolchainProvisioner};
pub use util::{config::SandboxConfig, process::CommandResult};
