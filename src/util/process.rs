//! Subprocess execution utilities.
//!
//! Every child is run to completion under a deadline and its output is
//! captured in full. Children that outlive their deadline are handed to a
//! [`ProcessRegistry`] so the owning session can reap them at teardown.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Deadline applied when a caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Failures that prevent a [`CommandResult`] from being produced.
///
/// A nonzero exit code is not one of them.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` did not exit within {}ms (pid {pid})", timeout.as_millis())]
    Timeout {
        command: String,
        pid: u32,
        timeout: Duration,
    },

    #[error("failed to wait for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// Outcome of one finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandResult {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        CommandResult {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: exit_code == 0,
        }
    }

    /// Standard output followed by standard error.
    pub fn all_output(&self) -> String {
        let mut all = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        all.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
            all.push('\n');
        }
        all.push_str(&self.stderr);
        all
    }

    /// Exit code zero and nothing written to the error stream.
    pub fn is_clean(&self) -> bool {
        self.success && self.stderr.trim().is_empty()
    }
}

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    env_remove: Vec<String>,
    cwd: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            env_remove: Vec::new(),
            cwd: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Split a command-line string and append the pieces as arguments.
    pub fn arg_line(self, line: &str) -> Self {
        self.args(split_arguments(line))
    }

    /// Set an environment variable on top of the inherited environment.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set several environment variables.
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Remove an environment variable.
    pub fn env_remove(mut self, key: impl AsRef<str>) -> Self {
        self.env_remove.push(key.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Set how long to wait for the child to exit.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the environment overrides.
    pub fn get_envs(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        for key in &self.env_remove {
            cmd.env_remove(key);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    /// Run to completion. On timeout the child keeps running; its pid is in the error.
    pub fn exec(&self) -> Result<CommandResult, ProcessError> {
        self.exec_inner(None)
    }

    /// Run to completion, handing a timed-out child to `registry`.
    pub fn exec_registered(&self, registry: &ProcessRegistry) -> Result<CommandResult, ProcessError> {
        self.exec_inner(Some(registry))
    }

    fn exec_inner(&self, registry: Option<&ProcessRegistry>) -> Result<CommandResult, ProcessError> {
        let mut child = self
            .build_command()
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        tracing::debug!("spawned `{}` (pid {})", self.display_command(), child.id());
        if let Some(registry) = registry {
            registry.note_spawn();
        }

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    return Err(ProcessError::Wait {
                        command: self.display_command(),
                        source,
                    })
                }
            }
            if Instant::now() >= deadline {
                return Err(self.timed_out(child, registry));
            }
            thread::sleep(POLL_INTERVAL);
        };

        // A grandchild that inherited the pipes keeps them open after the
        // child exits, so the streams share the same deadline.
        let (Some(stdout), Some(stderr)) = (collect(stdout, deadline), collect(stderr, deadline))
        else {
            return Err(self.timed_out(child, registry));
        };

        Ok(CommandResult::new(exit_code(status), stdout, stderr))
    }

    fn timed_out(&self, child: Child, registry: Option<&ProcessRegistry>) -> ProcessError {
        let pid = child.id();
        tracing::warn!(
            "`{}` timed out after {}ms (pid {})",
            self.display_command(),
            self.timeout.as_millis(),
            pid
        );
        if let Some(registry) = registry {
            registry.adopt(child);
        }
        ProcessError::Timeout {
            command: self.display_command(),
            pid,
            timeout: self.timeout,
        }
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    rx
}

/// Wait for a drained stream until `deadline`. `None` means the pipe was
/// still open when time ran out.
fn collect(stream: Option<Receiver<Vec<u8>>>, deadline: Instant) -> Option<String> {
    let Some(rx) = stream else {
        return Some(String::new());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(mpsc::RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(mpsc::RecvTimeoutError::Timeout) => None,
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Child processes owned by one session.
///
/// Children that finish normally are reaped by the call that spawned them;
/// the registry holds the ones that did not, until [`ProcessRegistry::kill_all`].
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    children: Mutex<Vec<Child>>,
    spawned: Mutex<usize>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn note_spawn(&self) {
        if let Ok(mut count) = self.spawned.lock() {
            *count += 1;
        }
    }

    /// Take ownership of a live child.
    pub fn adopt(&self, child: Child) {
        if let Ok(mut children) = self.children.lock() {
            children.push(child);
        }
    }

    /// Number of processes started through this registry.
    pub fn spawned(&self) -> usize {
        self.spawned.lock().map(|c| *c).unwrap_or(0)
    }

    /// Number of adopted children not yet released.
    pub fn live(&self) -> usize {
        self.children.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Kill and reap every adopted child. Returns how many were still running.
    pub fn kill_all(&self) -> usize {
        let children = match self.children.lock() {
            Ok(mut children) => std::mem::take(&mut *children),
            Err(_) => return 0,
        };

        let mut killed = 0;
        for mut child in children {
            let pid = child.id();
            if let Ok(None) = child.try_wait() {
                match child.kill() {
                    Ok(()) => {
                        killed += 1;
                        tracing::debug!("killed pid {}", pid);
                    }
                    Err(e) => tracing::debug!("failed to kill pid {}: {}", pid, e),
                }
            }
            let _ = child.wait();
        }
        killed
    }
}

impl Drop for ProcessRegistry {
    fn drop(&mut self) {
        self.kill_all();
    }
}

/// Kill processes whose executable is `host` or lives under `root`.
///
/// Scans `/proc`, so this is a best-effort net for grandchildren the
/// registry never saw (build servers and the like). Returns the number of
/// processes signalled.
#[cfg(unix)]
pub fn kill_stray_processes(host: &Path, root: &Path) -> usize {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return 0;
    };

    let me = std::process::id();
    let mut killed = 0;
    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if pid == me {
            continue;
        }
        let Ok(exe) = std::fs::read_link(entry.path().join("exe")) else {
            continue;
        };
        if exe != host && !exe.starts_with(root) {
            continue;
        }
        let Ok(raw) = i32::try_from(pid) else {
            continue;
        };
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => {
                tracing::debug!("killed stray pid {} ({})", pid, exe.display());
                killed += 1;
            }
            Err(e) => tracing::debug!("failed to kill stray pid {}: {}", pid, e),
        }
    }
    killed
}

#[cfg(not(unix))]
pub fn kill_stray_processes(_host: &Path, _root: &Path) -> usize {
    0
}

/// Split a command-line string on whitespace, honoring single and double quotes.
pub fn split_arguments(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_arg = true;
            }
            None if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            None => {
                current.push(c);
                in_arg = true;
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}
