//! Project scaffolding.
//!
//! Generating a project through the toolchain is slow, so each distinct
//! template argument string is generated once into a cache slot and every
//! later project is a plain file copy of that slot.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::util::fs::{remove_dir_resilient, write_atomic, RetryPolicy};
use crate::util::hash::short_hash;
use crate::util::process::{CommandResult, ProcessError};

/// Extension of generated project-definition files.
pub const PROJECT_EXTENSION: &str = "csproj";

/// Build-intermediate directory stripped from every cached template.
pub const INTERMEDIATE_DIR: &str = "obj";

const SLOT_NAME_MAX: usize = 40;

#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("failed to run project generation for `{args}`")]
    Generate {
        args: String,
        #[source]
        source: ProcessError,
    },

    #[error("project generation for `{args}` failed (exit code {}):\n{}", result.exit_code, result.all_output())]
    Failed {
        args: String,
        result: Box<CommandResult>,
    },

    #[error("template `{args}` has not been generated")]
    NotCached { args: String },

    #[error("no .csproj file in {}", dir.display())]
    NoProjectFile { dir: PathBuf },

    #[error("expected one .csproj file in {}, found {found}", dir.display())]
    MultipleProjectFiles { dir: PathBuf, found: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScaffoldError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> ScaffoldError + '_ {
        move |source| ScaffoldError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Something that can generate a project skeleton into a directory.
///
/// The session implements this by running the host's `new` command.
pub trait ProjectGenerator {
    fn generate(&self, args: &str, dir: &Path) -> Result<CommandResult, ProcessError>;
}

/// Generated templates, one slot per distinct argument string.
#[derive(Debug)]
pub struct TemplateCache {
    root: PathBuf,
    entries: HashMap<String, PathBuf>,
    policy: RetryPolicy,
}

impl TemplateCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TemplateCache {
            root: root.into(),
            entries: HashMap::new(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of templates generated so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The cached directory for `args`, if generated.
    pub fn get(&self, args: &str) -> Option<&Path> {
        self.entries.get(args.trim()).map(PathBuf::as_path)
    }

    /// Directory name for `args`. Readable prefix plus a hash, so two
    /// argument strings that sanitize alike still get distinct slots.
    pub fn slot_name(args: &str) -> String {
        let mut name: String = args
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .take(SLOT_NAME_MAX)
            .collect();
        if name.is_empty() {
            name.push_str("default");
        }
        format!("{}-{}", name, short_hash(args, 12))
    }

    /// Generate the template for `args` unless it is already cached.
    pub fn ensure_template(
        &mut self,
        args: &str,
        generator: &dyn ProjectGenerator,
    ) -> Result<PathBuf, ScaffoldError> {
        let args = args.trim();
        if let Some(dir) = self.entries.get(args) {
            tracing::debug!("Template `{}` cached at {}", args, dir.display());
            return Ok(dir.clone());
        }

        let slot = self.root.join(Self::slot_name(args));
        if slot.exists() {
            remove_dir_resilient(&slot, self.policy);
        }
        fs::create_dir_all(&slot).map_err(ScaffoldError::io(&slot))?;

        tracing::info!("Generating template `{}`", args);
        match generate_into(args, &slot, generator) {
            Ok(()) => {
                self.entries.insert(args.to_string(), slot.clone());
                Ok(slot)
            }
            Err(e) => {
                remove_dir_resilient(&slot, self.policy);
                Err(e)
            }
        }
    }

    /// Copy the cached template for `args` into `dest` and rename its
    /// project file to `<project_name>.csproj`. Returns the project file.
    pub fn instantiate(
        &self,
        args: &str,
        project_name: &str,
        dest: &Path,
    ) -> Result<PathBuf, ScaffoldError> {
        let template = self.get(args).ok_or_else(|| ScaffoldError::NotCached {
            args: args.trim().to_string(),
        })?;
        copy_template(template, project_name, dest)
    }

    /// [`ensure_template`](Self::ensure_template) then
    /// [`instantiate`](Self::instantiate) into `solution_root/project_name`.
    pub fn create_project(
        &mut self,
        generator: &dyn ProjectGenerator,
        args: &str,
        solution_root: &Path,
        project_name: &str,
    ) -> Result<PathBuf, ScaffoldError> {
        let template = self.ensure_template(args, generator)?;
        copy_template(&template, project_name, &solution_root.join(project_name))
    }
}

fn generate_into(
    args: &str,
    slot: &Path,
    generator: &dyn ProjectGenerator,
) -> Result<(), ScaffoldError> {
    let result = generator
        .generate(args, slot)
        .map_err(|source| ScaffoldError::Generate {
            args: args.to_string(),
            source,
        })?;
    if !result.is_clean() {
        return Err(ScaffoldError::Failed {
            args: args.to_string(),
            result: Box::new(result),
        });
    }

    // Restore output from generation time refers to the template's own name.
    let intermediate = slot.join(INTERMEDIATE_DIR);
    if intermediate.exists() {
        fs::remove_dir_all(&intermediate).map_err(ScaffoldError::io(&intermediate))?;
    }
    Ok(())
}

fn copy_template(template: &Path, project_name: &str, dest: &Path) -> Result<PathBuf, ScaffoldError> {
    fs::create_dir_all(dest).map_err(ScaffoldError::io(dest))?;

    let mut project_files = Vec::new();
    for entry in fs::read_dir(template).map_err(ScaffoldError::io(template))? {
        let path = entry.map_err(ScaffoldError::io(template))?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        let to = dest.join(name);
        fs::copy(&path, &to).map_err(ScaffoldError::io(&to))?;
        if path.extension().is_some_and(|ext| ext == PROJECT_EXTENSION) {
            project_files.push(to);
        }
    }

    let from = match project_files.len() {
        0 => {
            return Err(ScaffoldError::NoProjectFile {
                dir: template.to_path_buf(),
            })
        }
        1 => project_files.remove(0),
        found => {
            return Err(ScaffoldError::MultipleProjectFiles {
                dir: template.to_path_buf(),
                found,
            })
        }
    };

    let to = dest.join(format!("{project_name}.{PROJECT_EXTENSION}"));
    if from != to {
        fs::rename(&from, &to).map_err(ScaffoldError::io(&to))?;
    }
    tracing::debug!("Created project {}", to.display());
    Ok(to)
}

/// A package pinned by id and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageIdentity {
    pub id: String,
    pub version: String,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        PackageIdentity {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// A tool-reference project: restores packages as tools, no template.
#[derive(Debug, Clone)]
pub struct ToolProjectSpec {
    pub name: String,
    pub target_framework: String,
    pub runtime_identifier: String,
    pub source: String,
    pub packages: Vec<PackageIdentity>,
}

/// Write `solution_root/<name>/<name>.csproj` for `spec`.
///
/// Every restore location points inside the project directory and fallback
/// folders are cleared, so nothing is shared with other projects.
pub fn write_tool_project(solution_root: &Path, spec: &ToolProjectSpec) -> Result<PathBuf, ScaffoldError> {
    let project_dir = solution_root.join(&spec.name);
    fs::create_dir_all(&project_dir).map_err(ScaffoldError::io(&project_dir))?;

    let path = project_dir.join(format!("{}.{PROJECT_EXTENSION}", spec.name));
    let contents = tool_project_xml(&project_dir, spec);
    write_atomic(&path, contents.as_bytes()).map_err(ScaffoldError::io(&path))?;
    tracing::debug!("Wrote tool project {}", path.display());
    Ok(path)
}

fn tool_project_xml(project_dir: &Path, spec: &ToolProjectSpec) -> String {
    let packages_path = project_dir.join("tools").join("packages");
    let dir = xml_escape(&project_dir.display().to_string());

    let mut references = String::new();
    for package in &spec.packages {
        let _ = writeln!(
            references,
            "    <PackageReference Include=\"{}\" Version=\"{}\" />",
            xml_escape(&package.id),
            xml_escape(&package.version)
        );
    }

    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <RestoreProjectStyle>DotnetToolReference</RestoreProjectStyle>
    <OutputType>Exe</OutputType>
    <TargetFramework>{tfm}</TargetFramework>
    <RuntimeIdentifier>{rid}</RuntimeIdentifier>
    <RestorePackagesPath>{packages}</RestorePackagesPath>
    <RestoreSolutionDirectory>{dir}</RestoreSolutionDirectory>
    <MSBuildProjectExtensionsPath>{dir}</MSBuildProjectExtensionsPath>
    <RestoreSources>{source}</RestoreSources>
    <DisableImplicitFrameworkReferences>true</DisableImplicitFrameworkReferences>
    <RestoreFallbackFolders>clear</RestoreFallbackFolders>
    <RestoreAdditionalProjectSources></RestoreAdditionalProjectSources>
    <RestoreAdditionalProjectFallbackFolders></RestoreAdditionalProjectFallbackFolders>
    <RestoreAdditionalProjectFallbackFoldersExcludes></RestoreAdditionalProjectFallbackFoldersExcludes>
  </PropertyGroup>
  <ItemGroup>
{references}  </ItemGroup>
</Project>
"#,
        tfm = xml_escape(spec.target_framework.trim()),
        rid = xml_escape(spec.runtime_identifier.trim()),
        packages = xml_escape(&packages_path.display().to_string()),
        dir = dir,
        source = xml_escape(&spec.source),
        references = references,
    )
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
