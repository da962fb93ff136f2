use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use log::debug;

use crate::context::EnvMap;

const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

/// Forced termination of the process tree through `taskkill`.
pub(crate) fn terminate(pid: u32) -> io::Result<()> {
    let status = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    debug!("signal event=terminate pid={} status={}", pid, status);
    Ok(())
}

/// Windows has no signals; the exit code is reported as is.
pub(crate) fn exit_info(status: ExitStatus) -> (i32, Option<String>) {
    (status.code().unwrap_or(1), None)
}

pub(crate) fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// `program` as given when it has an extension, else each `PATHEXT` suffix.
pub(crate) fn program_candidates(dir: &Path, program: &str, env: &EnvMap) -> Vec<PathBuf> {
    if Path::new(program).extension().is_some() {
        return vec![dir.join(program)];
    }
    let exts = env.get("PATHEXT").unwrap_or(DEFAULT_PATHEXT);
    exts.split(';')
        .filter(|ext| !ext.is_empty())
        .map(|ext| dir.join(format!("{program}{}", ext.to_ascii_lowercase())))
        .collect()
}
