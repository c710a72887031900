//! Core data model: toolchain instances, artifact variants, runtime
//! manifests and overlay rules.

pub mod artifact;
pub mod manifest;
pub mod rule;
pub mod toolchain;

pub use artifact::{ArtifactVariant, BuildConfiguration, ComponentSpec, PackComponentSpec, TagTiers};
pub use manifest::{
    patch_runtime_entry, ManifestFormatError, PatchOutcome, PatchRequest, RuntimeEntry,
    RuntimeManifest,
};
pub use rule::{DependencyDeclaration, OverlayRule, RuleSource};
pub use toolchain::ToolchainInstance;
