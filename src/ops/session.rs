//! A test session: one provisioned toolchain, its template cache and every
//! process started against it.
//!
//! Setup failures abort [`Session::start`]. Failures of individual commands
//! come back as [`CommandResult`]s or [`CommandError`]s for the caller to
//! inspect. Teardown never fails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::core::toolchain::ToolchainInstance;
use crate::ops::provision::{ProvisionedToolchain, ToolchainProvisioner};
use crate::ops::scaffold::{
    write_tool_project, ProjectGenerator, ScaffoldError, TemplateCache, ToolProjectSpec,
    PROJECT_EXTENSION,
};
use crate::util::config::SandboxConfig;
use crate::util::fs::ScratchDir;
use crate::util::process::{
    kill_stray_processes, CommandResult, ProcessBuilder, ProcessError, ProcessRegistry,
};

/// Sdk-resolver search path.
pub const ENV_SDKS_PATH: &str = "MSBuildSDKsPath";
pub const ENV_SHARED_COMPILATION: &str = "UseSharedCompilation";
pub const ENV_MULTILEVEL_LOOKUP: &str = "DOTNET_MULTILEVEL_LOOKUP";
pub const ENV_DISABLE_NODE_REUSE: &str = "MSBUILDDISABLENODEREUSE";

const SOLUTION_EXTENSION: &str = "sln";
const DEFAULT_NUSPEC_OUTPUT: &str = "obj";

/// A validated command that did not succeed cleanly.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{command}` failed (exit code {}):\n{}", result.exit_code, result.all_output())]
    Failed {
        command: String,
        result: Box<CommandResult>,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl CommandError {
    /// The captured output, when the command ran to completion.
    pub fn result(&self) -> Option<&CommandResult> {
        match self {
            CommandError::Failed { result, .. } => Some(result),
            CommandError::Process(_) => None,
        }
    }
}

/// Environment every command against `instance` runs with, before `extra`.
pub fn fixed_environment(
    instance: &ToolchainInstance,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        ENV_SDKS_PATH.to_string(),
        instance.sdks_dir().display().to_string(),
    );
    env.insert(ENV_SHARED_COMPILATION.to_string(), "false".to_string());
    env.insert(ENV_MULTILEVEL_LOOKUP.to_string(), "0".to_string());
    env.insert(ENV_DISABLE_NODE_REUSE.to_string(), "true".to_string());
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// How to invoke the provisioned host.
#[derive(Debug, Clone)]
struct HostCommand {
    program: PathBuf,
    env: BTreeMap<String, String>,
    timeout: Duration,
}

impl HostCommand {
    fn builder(&self, working_dir: &Path, args: &str) -> ProcessBuilder {
        ProcessBuilder::new(&self.program)
            .arg_line(args)
            .cwd(working_dir)
            .envs(&self.env)
            .timeout(self.timeout)
    }
}

/// Runs the host's `new` command into a template slot.
struct HostGenerator<'a> {
    host: &'a HostCommand,
    registry: &'a ProcessRegistry,
}

impl ProjectGenerator for HostGenerator<'_> {
    fn generate(&self, args: &str, dir: &Path) -> Result<CommandResult, ProcessError> {
        self.host
            .builder(dir, &format!("new {args}"))
            .exec_registered(self.registry)
    }
}

pub struct Session {
    instance: ToolchainInstance,
    host: HostCommand,
    registry: ProcessRegistry,
    templates: TemplateCache,
    // Dropped in teardown; `None` afterwards.
    template_dir: Option<ScratchDir>,
    toolchain: Option<ProvisionedToolchain>,
}

impl Session {
    /// Provision a toolchain from `config` and open a session on it.
    pub fn start(config: &SandboxConfig) -> Result<Session> {
        let provisioner = ToolchainProvisioner::from_config(config)?;
        let toolchain = provisioner
            .provision()
            .with_context(|| format!("failed to provision from {}", provisioner.source().display()))?;
        Session::from_provisioned(toolchain, config)
    }

    /// Open a session on an already provisioned toolchain, taking ownership of it.
    pub fn from_provisioned(toolchain: ProvisionedToolchain, config: &SandboxConfig) -> Result<Session> {
        let policy = config.retry_policy();
        let template_dir = ScratchDir::create(config.work_root.as_deref(), "templates-", policy)
            .context("failed to create template cache")?;
        let templates = TemplateCache::new(template_dir.path()).with_retry_policy(policy);

        let instance = toolchain.instance().clone();
        let host = HostCommand {
            program: instance.host().to_path_buf(),
            env: fixed_environment(&instance, &config.process.env),
            timeout: config.command_timeout(),
        };

        tracing::info!("Session ready on {}", instance.root().display());
        Ok(Session {
            instance,
            host,
            registry: ProcessRegistry::new(),
            templates,
            template_dir: Some(template_dir),
            toolchain: Some(toolchain),
        })
    }

    pub fn instance(&self) -> &ToolchainInstance {
        &self.instance
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    /// Environment overrides applied to every command.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.host.env
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.host.timeout = timeout;
    }

    /// A host invocation with the session environment, not yet run.
    pub fn command(&self, working_dir: &Path, args: &str) -> ProcessBuilder {
        self.host.builder(working_dir, args)
    }

    /// Run `host <args>` in `working_dir`. Unless `ignore_exit_code`, a
    /// nonzero exit is an error.
    pub fn run(
        &self,
        working_dir: &Path,
        args: &str,
        ignore_exit_code: bool,
    ) -> Result<CommandResult, CommandError> {
        let builder = self.command(working_dir, args);
        let result = builder.exec_registered(&self.registry)?;
        if !ignore_exit_code && !result.success {
            return Err(failed(&builder, result));
        }
        Ok(result)
    }

    /// Create `solution_root/<name>/<name>.csproj` from the template for `args`.
    pub fn create_project(
        &mut self,
        solution_root: &Path,
        project_name: &str,
        args: &str,
    ) -> Result<PathBuf, ScaffoldError> {
        let generator = HostGenerator {
            host: &self.host,
            registry: &self.registry,
        };
        self.templates
            .create_project(&generator, args, solution_root, project_name)
    }

    pub fn create_tool_project(
        &self,
        solution_root: &Path,
        spec: &ToolProjectSpec,
    ) -> Result<PathBuf, ScaffoldError> {
        write_tool_project(solution_root, spec)
    }

    /// Restore a tool project. The result is returned as is.
    pub fn restore_tool_project(
        &self,
        working_dir: &Path,
        project_name: &str,
        args: &str,
    ) -> Result<CommandResult, ProcessError> {
        self.command(
            working_dir,
            &format!("restore {project_name}.{PROJECT_EXTENSION} {args}"),
        )
        .exec_registered(&self.registry)
    }

    pub fn restore_project(
        &self,
        working_dir: &Path,
        project_name: &str,
        args: &str,
    ) -> Result<CommandResult, CommandError> {
        self.validated(
            working_dir,
            &format!("restore {project_name}.{PROJECT_EXTENSION} {args}"),
        )
    }

    pub fn restore_solution(
        &self,
        working_dir: &Path,
        solution_name: &str,
        args: &str,
    ) -> Result<CommandResult, CommandError> {
        self.validated(
            working_dir,
            &format!("restore {solution_name}.{SOLUTION_EXTENSION} {args}"),
        )
    }

    /// Pack a project. `nuspec_output` defaults to `obj`. With `validate`
    /// off, a failed pack is returned rather than raised.
    pub fn pack_project(
        &self,
        working_dir: &Path,
        project_name: &str,
        args: &str,
        nuspec_output: Option<&str>,
        validate: bool,
    ) -> Result<CommandResult, CommandError> {
        self.pack(
            working_dir,
            &format!("{project_name}.{PROJECT_EXTENSION}"),
            args,
            nuspec_output,
            validate,
        )
    }

    pub fn pack_solution(
        &self,
        working_dir: &Path,
        solution_name: &str,
        args: &str,
        nuspec_output: Option<&str>,
        validate: bool,
    ) -> Result<CommandResult, CommandError> {
        self.pack(
            working_dir,
            &format!("{solution_name}.{SOLUTION_EXTENSION}"),
            args,
            nuspec_output,
            validate,
        )
    }

    pub fn build_project(
        &self,
        working_dir: &Path,
        project_name: &str,
        args: &str,
    ) -> Result<CommandResult, CommandError> {
        self.validated(
            working_dir,
            &format!(
                "msbuild {project_name}.{PROJECT_EXTENSION} {args} /p:AppendRuntimeIdentifierToOutputPath=false"
            ),
        )
    }

    fn pack(
        &self,
        working_dir: &Path,
        file: &str,
        args: &str,
        nuspec_output: Option<&str>,
        validate: bool,
    ) -> Result<CommandResult, CommandError> {
        let nuspec_output = nuspec_output.unwrap_or(DEFAULT_NUSPEC_OUTPUT);
        let line = format!("pack {file} {args} /p:NuspecOutputPath={nuspec_output}");
        if validate {
            self.validated(working_dir, &line)
        } else {
            Ok(self
                .command(working_dir, &line)
                .exec_registered(&self.registry)?)
        }
    }

    /// Exit code zero and an empty error stream, or [`CommandError::Failed`].
    fn validated(&self, working_dir: &Path, args: &str) -> Result<CommandResult, CommandError> {
        let builder = self.command(working_dir, args);
        let result = builder.exec_registered(&self.registry)?;
        if !result.is_clean() {
            return Err(failed(&builder, result));
        }
        Ok(result)
    }

    /// Stop servers, kill leftover processes, remove the clone and the
    /// template cache. Safe to call more than once.
    pub fn teardown(&mut self) {
        let Some(toolchain) = self.toolchain.take() else {
            return;
        };
        tracing::info!("Tearing down {}", self.instance.root().display());

        let shutdown = self
            .command(self.instance.root(), "build-server shutdown")
            .exec_registered(&self.registry);
        if let Err(e) = shutdown {
            tracing::debug!("build-server shutdown: {}", e);
        }

        let killed = self.registry.kill_all();
        let strays = kill_stray_processes(self.instance.host(), self.instance.root());
        if killed + strays > 0 {
            tracing::debug!("Killed {} child and {} stray process(es)", killed, strays);
        }

        drop(self.template_dir.take());
        drop(toolchain);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn failed(builder: &ProcessBuilder, result: CommandResult) -> CommandError {
    CommandError::Failed {
        command: builder.display_command(),
        result: Box::new(result),
    }
}
