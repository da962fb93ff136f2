//! Stdio endpoints for pipeline stages and redirection opening.
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use os_pipe::{PipeReader, PipeWriter};

use crate::error::{ShellError, SpawnErrorKind};

/// Where a stage reads from.
#[derive(Debug)]
pub enum Input {
    Inherit,
    Null,
    Pipe(PipeReader),
    File(File),
    /// In-memory data; external processes get it through a feeder thread.
    Bytes(Arc<[u8]>),
}

/// Where a stage writes to.
#[derive(Debug)]
pub enum Output {
    Inherit,
    Null,
    Pipe(PipeWriter),
    File(File),
}

impl Input {
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            Input::Inherit => Input::Inherit,
            Input::Null => Input::Null,
            Input::Pipe(reader) => Input::Pipe(reader.try_clone()?),
            Input::File(file) => Input::File(file.try_clone()?),
            Input::Bytes(data) => Input::Bytes(Arc::clone(data)),
        })
    }

    /// Stdio for a child process plus data that must be fed to its stdin.
    pub(crate) fn into_stdio(self) -> (Stdio, Option<Arc<[u8]>>) {
        match self {
            Input::Inherit => (Stdio::inherit(), None),
            Input::Null => (Stdio::null(), None),
            Input::Pipe(reader) => (Stdio::from(reader), None),
            Input::File(file) => (Stdio::from(file), None),
            Input::Bytes(data) => (Stdio::piped(), Some(data)),
        }
    }

    pub(crate) fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            Input::Inherit => Box::new(io::stdin()),
            Input::Null => Box::new(io::empty()),
            Input::Pipe(reader) => Box::new(reader),
            Input::File(file) => Box::new(file),
            Input::Bytes(data) => Box::new(Cursor::new(data)),
        }
    }
}

impl Output {
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            Output::Inherit => Output::Inherit,
            Output::Null => Output::Null,
            Output::Pipe(writer) => Output::Pipe(writer.try_clone()?),
            Output::File(file) => Output::File(file.try_clone()?),
        })
    }

    pub(crate) fn into_stdio(self) -> Stdio {
        match self {
            Output::Inherit => Stdio::inherit(),
            Output::Null => Stdio::null(),
            Output::Pipe(writer) => Stdio::from(writer),
            Output::File(file) => Stdio::from(file),
        }
    }

    pub(crate) fn into_writer(self, is_stderr: bool) -> Box<dyn Write + Send> {
        match self {
            Output::Inherit if is_stderr => Box::new(io::stderr()),
            Output::Inherit => Box::new(io::stdout()),
            Output::Null => Box::new(io::sink()),
            Output::Pipe(writer) => Box::new(writer),
            Output::File(file) => Box::new(file),
        }
    }
}

/// Open the target of `<`; a missing file is a spawn error.
pub(crate) fn open_input(path: &Path) -> Result<File, ShellError> {
    OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|err| open_error(path, err))
}

/// Open the target of `>`, `>>`, `2>` or `&>`, creating it if absent.
pub(crate) fn open_output(path: &Path, append: bool) -> Result<File, ShellError> {
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if append {
        opts.append(true);
    } else {
        opts.truncate(true);
    }
    opts.open(path).map_err(|err| open_error(path, err))
}

fn open_error(path: &Path, err: io::Error) -> ShellError {
    let kind = match err.kind() {
        io::ErrorKind::NotFound => SpawnErrorKind::FileNotFound,
        io::ErrorKind::PermissionDenied => SpawnErrorKind::PermissionDenied,
        _ => SpawnErrorKind::Other,
    };
    ShellError::spawn(kind, format!("{}: {}", path.display(), err))
}

/// Sink for a capture pipe that the drain thread also forwards to.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Tee {
    None,
    Stdout,
    Stderr,
}

/// Read a pipe to the end on a dedicated thread so writers never block on a
/// full pipe buffer.
pub(crate) fn drain(mut reader: PipeReader, tee: Tee) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut collected = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    let forwarded = match tee {
                        Tee::None => Ok(()),
                        Tee::Stdout => io::stdout().write_all(&buf[..n]),
                        Tee::Stderr => io::stderr().write_all(&buf[..n]),
                    };
                    if let Err(err) = forwarded {
                        debug!("shell event=tee-failed error={}", err);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("shell event=drain-failed error={}", err);
                    break;
                }
            }
        }
        collected
    })
}

/// Write in-memory stdin to a child on its own thread.
pub(crate) fn feed<W: Write + Send + 'static>(mut writer: W, data: Arc<[u8]>) -> JoinHandle<()> {
    thread::spawn(move || {
        if let Err(err) = writer.write_all(&data) {
            // The reader may legitimately exit before consuming everything.
            if err.kind() != io::ErrorKind::BrokenPipe {
                debug!("shell event=feed-failed error={}", err);
            }
        }
    })
}
