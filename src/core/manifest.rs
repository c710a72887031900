//! Runtime manifest (`*.deps.json`) patching.
//!
//! The document shape is
//! `targets[<framework>][<name>/<version>].runtime[<relative path>]`
//! = `{ assemblyVersion, fileVersion }`. Patching touches exactly one
//! `runtime` entry and leaves every other key as it was.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::util::fs::write_atomic;

/// Errors reading, navigating or writing a runtime manifest.
#[derive(Debug, Error)]
pub enum ManifestFormatError {
    #[error("failed to read runtime manifest `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("runtime manifest `{}` is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("runtime manifest `{}` has no object at `{node}`", path.display())]
    MissingNode { path: PathBuf, node: String },

    #[error("failed to write runtime manifest `{}`: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Version metadata recorded for one runtime file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEntry {
    pub assembly_version: String,
    pub file_version: String,
}

impl RuntimeEntry {
    pub fn new(assembly_version: impl Into<String>, file_version: impl Into<String>) -> Self {
        RuntimeEntry {
            assembly_version: assembly_version.into(),
            file_version: file_version.into(),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "assemblyVersion".to_string(),
            Value::String(self.assembly_version.clone()),
        );
        map.insert(
            "fileVersion".to_string(),
            Value::String(self.file_version.clone()),
        );
        Value::Object(map)
    }
}

/// One runtime entry to insert or overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub target_framework: String,
    /// Package identity, `name/version`.
    pub package: String,
    /// Key inside the package's `runtime` map.
    pub entry_path: String,
    pub entry: RuntimeEntry,
}

/// What a patch did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// A runtime manifest loaded into memory.
#[derive(Debug, Clone)]
pub struct RuntimeManifest {
    path: PathBuf,
    doc: Value,
}

impl RuntimeManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestFormatError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestFormatError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, ManifestFormatError> {
        let doc = serde_json::from_str(text).map_err(|source| ManifestFormatError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(RuntimeManifest {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// The `runtime` map of one package, if the path to it exists.
    pub fn runtime_entries(&self, target_framework: &str, package: &str) -> Option<&Map<String, Value>> {
        self.doc
            .get("targets")?
            .get(target_framework)?
            .get(package)?
            .get("runtime")?
            .as_object()
    }

    /// Insert or overwrite one runtime entry.
    pub fn patch(&mut self, request: &PatchRequest) -> Result<PatchOutcome, ManifestFormatError> {
        let runtime = self.runtime_mut(&request.target_framework, &request.package)?;
        let value = request.entry.to_value();

        let outcome = match runtime.get(&request.entry_path) {
            Some(existing) if *existing == value => PatchOutcome::Unchanged,
            Some(_) => PatchOutcome::Updated,
            None => PatchOutcome::Inserted,
        };
        if outcome != PatchOutcome::Unchanged {
            runtime.insert(request.entry_path.clone(), value);
        }
        Ok(outcome)
    }

    fn runtime_mut(
        &mut self,
        target_framework: &str,
        package: &str,
    ) -> Result<&mut Map<String, Value>, ManifestFormatError> {
        let path = self.path.clone();
        let missing = |node: String| ManifestFormatError::MissingNode {
            path: path.clone(),
            node,
        };

        self.doc
            .get_mut("targets")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| missing("targets".to_string()))?
            .get_mut(target_framework)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| missing(format!("targets.{target_framework}")))?
            .get_mut(package)
            .and_then(Value::as_object_mut)
            .ok_or_else(|| missing(format!("targets.{target_framework}.{package}")))?
            .get_mut("runtime")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| missing(format!("targets.{target_framework}.{package}.runtime")))
    }

    /// Serialize the document.
    pub fn to_json_string(&self) -> String {
        // A `Value` always serializes.
        serde_json::to_string_pretty(&self.doc).unwrap_or_default()
    }

    /// Write the document back to its path through a temporary file.
    pub fn save(&self) -> Result<(), ManifestFormatError> {
        write_atomic(&self.path, self.to_json_string().as_bytes()).map_err(|source| {
            ManifestFormatError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// Load `manifest_path`, apply `request`, and write it back when it changed.
pub fn patch_runtime_entry(
    manifest_path: &Path,
    request: &PatchRequest,
) -> Result<PatchOutcome, ManifestFormatError> {
    let mut manifest = RuntimeManifest::load(manifest_path)?;
    let outcome = manifest.patch(request)?;
    if outcome != PatchOutcome::Unchanged {
        manifest.save()?;
    }
    tracing::debug!(
        "{:?} `{}` in {}",
        outcome,
        request.entry_path,
        manifest_path.display()
    );
    Ok(outcome)
}
