use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::context::EnvMap;
use crate::error::{ShellError, SpawnErrorKind};
use crate::sys;

use super::cancel::CancelToken;
use super::stdio::{feed, Input, Output};

/// How a finished process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: i32,
    /// Signal name such as `SIGTERM` when the process was killed.
    pub signal: Option<String>,
}

/// Owns one spawned child until it has been waited on.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    feeder: Option<JoinHandle<()>>,
    cancel: CancelToken,
    registration: u64,
    program: String,
}

impl ProcessHandle {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn wait(mut self) -> Result<ExitInfo, ShellError> {
        let status = self.child.wait();
        self.cancel.unregister(self.registration);
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                warn!("shell event=feeder-panicked program={}", self.program);
            }
        }
        let status = status.map_err(|err| {
            ShellError::from(err).with_context(format!("waiting for {}", self.program))
        })?;
        let (code, signal) = sys::exit_info(status);
        debug!(
            "shell event=exit program={} pid={} code={} signal={}",
            self.program,
            self.child.id(),
            code,
            signal.as_deref().unwrap_or("-")
        );
        Ok(ExitInfo { code, signal })
    }
}

/// Find the executable for `program` the way a shell does: names with a path
/// separator are taken relative to `cwd`, everything else is searched in the
/// context's `PATH`.
pub fn resolve_program(program: &str, cwd: &Path, env: &EnvMap) -> Result<PathBuf, ShellError> {
    if program.is_empty() {
        return Err(ShellError::spawn(
            SpawnErrorKind::ProgramNotFound,
            ": command not found",
        ));
    }
    let has_separator = program.contains('/') || (cfg!(windows) && program.contains('\\'));
    if has_separator {
        let path = cwd.join(program);
        if !path.exists() {
            return Err(ShellError::spawn(
                SpawnErrorKind::ProgramNotFound,
                format!("{program}: No such file or directory"),
            ));
        }
        if path.is_dir() || !sys::is_executable(&path) {
            return Err(ShellError::spawn(
                SpawnErrorKind::PermissionDenied,
                format!("{program}: permission denied"),
            ));
        }
        return Ok(path);
    }

    search_path(program, cwd, env, false)
        .into_iter()
        .next()
        .ok_or_else(|| {
            ShellError::spawn(
                SpawnErrorKind::ProgramNotFound,
                format!("{program}: command not found"),
            )
        })
}

/// Executables named `program` in the context `PATH`, in search order.
pub fn search_path(program: &str, cwd: &Path, env: &EnvMap, all: bool) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let search = env.get("PATH").unwrap_or_default();
    for dir in env::split_paths(search) {
        let dir = if dir.as_os_str().is_empty() {
            cwd.to_path_buf()
        } else {
            cwd.join(dir)
        };
        for candidate in sys::program_candidates(&dir, program, env) {
            if sys::is_executable(&candidate) {
                found.push(candidate);
                if !all {
                    return found;
                }
            }
        }
    }
    found
}

/// Start an external stage. The `Command` is dropped before returning so the
/// parent keeps no copy of the child's pipe ends.
#[allow(clippy::too_many_arguments)]
pub fn spawn_external(
    program: &Path,
    argv: &[String],
    cwd: &Path,
    env: &EnvMap,
    stdin: Input,
    stdout: Output,
    stderr: Output,
    cancel: &CancelToken,
) -> Result<ProcessHandle, ShellError> {
    let name = argv.first().cloned().unwrap_or_default();
    let (stdin, data) = stdin.into_stdio();
    let mut child = {
        let mut command = Command::new(program);
        command
            .args(argv.iter().skip(1))
            .current_dir(cwd)
            .env_clear()
            .envs(env.iter())
            .stdin(stdin)
            .stdout(stdout.into_stdio())
            .stderr(stderr.into_stdio());
        command.spawn().map_err(|err| wrap_spawn_error(&name, err))?
    };
    let feeder = match (data, child.stdin.take()) {
        (Some(data), Some(pipe)) => Some(feed(pipe, data)),
        _ => None,
    };
    let registration = cancel.register(child.id());
    debug!(
        "shell event=spawn program={} pid={} argc={}",
        name,
        child.id(),
        argv.len()
    );
    Ok(ProcessHandle {
        child,
        feeder,
        cancel: cancel.clone(),
        registration,
        program: name,
    })
}

pub(crate) fn wrap_spawn_error(cmd: &str, err: io::Error) -> ShellError {
    match err.kind() {
        io::ErrorKind::NotFound => {
            ShellError::spawn(SpawnErrorKind::ProgramNotFound, format!("{cmd}: command not found"))
        }
        io::ErrorKind::PermissionDenied => {
            ShellError::spawn(SpawnErrorKind::PermissionDenied, format!("{cmd}: permission denied"))
        }
        _ => ShellError::spawn(SpawnErrorKind::Other, format!("{cmd}: {err}")),
    }
}
