use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use log::debug;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::context::EnvMap;

/// Ask a process to stop with SIGTERM. An already reaped pid is not an error.
pub(crate) fn terminate(pid: u32) -> io::Result<()> {
    let pid = i32::try_from(pid).map_err(|_| io::Error::other("pid out of range"))?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {
            debug!("signal event=terminate pid={}", pid);
            Ok(())
        }
        Err(err) => Err(io::Error::other(err.to_string())),
    }
}

/// Shell-style exit code (128 + signal number when killed) and signal name.
pub(crate) fn exit_info(status: ExitStatus) -> (i32, Option<String>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    match status.signal() {
        Some(sig) => {
            let name = Signal::try_from(sig)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| format!("SIG{sig}"));
            (128 + sig, Some(name))
        }
        None => (1, None),
    }
}

pub(crate) fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// Paths to try for `program` inside one `PATH` directory.
pub(crate) fn program_candidates(dir: &Path, program: &str, _env: &EnvMap) -> Vec<PathBuf> {
    vec![dir.join(program)]
}
