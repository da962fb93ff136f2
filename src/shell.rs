//! Host-facing surface: `Shell`, `ShellPromise`, `ShellTask`, `ShellOutput`.
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;
use os_pipe::PipeReader;
use serde::de::DeserializeOwned;

use crate::context::{EnvMap, ExecutionContext};
use crate::error::{ErrorKind, ShellError, SpawnErrorKind};
use crate::execution::cancel::CancelToken;
use crate::execution::stdio::{drain, feed, Input, Output, Tee};
use crate::execution::Executor;
use crate::expansion::expand_braces;
use crate::parse::{parse_template, ParsedTemplate};
use crate::value::{escape, RawHandle, ShellValue, Template};

/// What happens to the invocation's stdout and stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Capture into the result.
    #[default]
    Buffered,
    /// Capture and also forward to the host's stdout/stderr.
    Tee,
    /// Discard.
    Quiet,
    /// Pass straight through to the host; nothing is captured.
    Inherit,
}

/// One captured stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Captured {
    Bytes(Vec<u8>),
    /// The stream went somewhere else (inherited or consumed by `lines`).
    Streamed,
}

impl Captured {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Captured::Bytes(bytes) => bytes,
            Captured::Streamed => &[],
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, Captured::Streamed)
    }
}

/// Final result of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_code: i32,
    /// Name of the signal that ended the pipeline, e.g. `SIGTERM`.
    pub signal: Option<String>,
    pub stdout: Captured,
    pub stderr: Captured,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout decoded as UTF-8, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.stdout.as_bytes()).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(self.stderr.as_bytes()).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ShellError> {
        serde_json::from_slice(self.stdout.as_bytes()).map_err(|err| {
            ShellError::new(ErrorKind::Io, format!("stdout is not valid JSON: {err}"))
        })
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        let text = std::str::from_utf8(self.stdout.as_bytes()).unwrap_or_default();
        text.lines()
    }
}

/// Instance defaults shared by every invocation created from it.
#[derive(Debug, Clone)]
pub struct Shell {
    env: EnvMap,
    cwd: PathBuf,
    throws: bool,
    pipefail: bool,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    /// Snapshot the host process environment and working directory.
    pub fn new() -> Self {
        Self {
            env: EnvMap::from_process(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            throws: true,
            pipefail: false,
        }
    }

    pub fn env(mut self, env: EnvMap) -> Self {
        self.env = env;
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = self.cwd.join(cwd.into());
        self
    }

    /// Invocations resolve with their output even on a non-zero exit.
    pub fn nothrow(self) -> Self {
        self.throws(false)
    }

    pub fn throws(mut self, throws: bool) -> Self {
        self.throws = throws;
        self
    }

    pub fn pipefail(mut self, pipefail: bool) -> Self {
        self.pipefail = pipefail;
        self
    }

    /// Parse a template into a pending invocation. Syntax errors surface
    /// here, before anything runs.
    pub fn cmd(&self, template: impl Into<Template>) -> Result<ShellPromise, ShellError> {
        let template = template.into();
        let parsed = parse_template(&template)?;
        debug!("shell event=parsed source={:?}", parsed.source);
        Ok(ShellPromise {
            parsed,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            throws: self.throws,
            pipefail: self.pipefail,
            output: OutputMode::default(),
            stdin: StdinSource::Null,
            timeout: None,
        })
    }

    /// Quote `input` so the shell reads it back as one literal word.
    pub fn escape(input: &str) -> String {
        escape(input)
    }

    /// Brace-expand `pattern`, e.g. `a{b,c}` to `["ab", "ac"]`.
    pub fn braces(pattern: &str) -> Vec<String> {
        expand_braces(pattern)
    }
}

/// A parsed invocation waiting to run.
///
/// Configuration methods consume and return the promise, and so do `run`
/// and `spawn`, so an invocation cannot be reconfigured once it started:
///
/// ```compile_fail
/// let promise = dollar_shell::Shell::new().cmd("echo hi").unwrap();
/// let _output = promise.run();
/// let _again = promise.quiet();
/// ```
#[derive(Debug)]
pub struct ShellPromise {
    parsed: ParsedTemplate,
    cwd: PathBuf,
    env: EnvMap,
    throws: bool,
    pipefail: bool,
    output: OutputMode,
    stdin: StdinSource,
    timeout: Option<Duration>,
}

#[derive(Debug)]
enum StdinSource {
    Null,
    Inherit,
    Value(ShellValue),
}

impl ShellPromise {
    /// Run in `cwd`; relative paths resolve against the current setting.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = self.cwd.join(cwd.into());
        self
    }

    /// Replace the whole environment.
    pub fn env(mut self, env: EnvMap) -> Self {
        self.env = env;
        self
    }

    /// Add or override one variable.
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    pub fn quiet(self) -> Self {
        self.output(OutputMode::Quiet)
    }

    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }

    /// Resolve with the output even when the exit code is non-zero.
    pub fn nothrow(self) -> Self {
        self.throws(false)
    }

    pub fn throws(mut self, throws: bool) -> Self {
        self.throws = throws;
        self
    }

    pub fn pipefail(mut self, pipefail: bool) -> Self {
        self.pipefail = pipefail;
        self
    }

    /// Feed `value` to the first stage's stdin.
    pub fn stdin(mut self, value: impl Into<ShellValue>) -> Self {
        self.stdin = StdinSource::Value(value.into());
        self
    }

    /// Let the first stage read the host process's stdin. The default is
    /// an empty stdin.
    pub fn inherit_stdin(mut self) -> Self {
        self.stdin = StdinSource::Inherit;
        self
    }

    /// Cancel the invocation if it has not finished after `timeout`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Template source with values shown as `${N}` placeholders.
    pub fn source(&self) -> &str {
        &self.parsed.source
    }

    /// Run on the calling thread.
    pub fn run(self) -> Result<ShellOutput, ShellError> {
        self.execute(CancelToken::new(), None)
    }

    /// Run on a background thread.
    pub fn spawn(self) -> ShellTask {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || self.execute(token, None));
        ShellTask {
            handle: Some(handle),
            cancel,
        }
    }

    pub fn text(self) -> Result<String, ShellError> {
        self.require_capture("text")?;
        Ok(self.run()?.text())
    }

    pub fn bytes(self) -> Result<Vec<u8>, ShellError> {
        self.require_capture("bytes")?;
        let output = self.run()?;
        Ok(match output.stdout {
            Captured::Bytes(bytes) => bytes,
            Captured::Streamed => Vec::new(),
        })
    }

    pub fn json<T: DeserializeOwned>(self) -> Result<T, ShellError> {
        self.require_capture("json")?;
        self.run()?.json()
    }

    /// Stream stdout line by line while the invocation runs.
    pub fn lines(self) -> Result<Lines, ShellError> {
        self.require_capture("lines")?;
        let (reader, writer) = os_pipe::pipe()?;
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let handle = thread::spawn(move || self.execute(token, Some(Output::Pipe(writer))));
        Ok(Lines {
            reader: BufReader::new(reader),
            task: Some(ShellTask {
                handle: Some(handle),
                cancel,
            }),
        })
    }

    fn require_capture(&self, what: &str) -> Result<(), ShellError> {
        match self.output {
            OutputMode::Buffered | OutputMode::Tee => Ok(()),
            OutputMode::Quiet | OutputMode::Inherit => Err(ShellError::usage(format!(
                "`{what}` needs captured stdout, but the output mode is {:?}",
                self.output
            ))
            .with_context("use OutputMode::Buffered or OutputMode::Tee")),
        }
    }

    fn stdin_input(value: ShellValue) -> Result<Input, ShellError> {
        Ok(match value {
            ShellValue::Handle(RawHandle::File(file)) => Input::File(file.try_clone()?),
            ShellValue::Handle(RawHandle::Bytes(data)) => Input::Bytes(data),
            ShellValue::String(text) | ShellValue::Raw(text) => Input::Bytes(text.into_bytes().into()),
            ShellValue::StringArray(items) => Input::Bytes(items.join("\n").into_bytes().into()),
            other => Input::Bytes(other.as_word().unwrap_or_default().into_bytes().into()),
        })
    }

    fn execute(self, cancel: CancelToken, stream: Option<Output>) -> Result<ShellOutput, ShellError> {
        if !self.cwd.is_dir() {
            return Err(ShellError::spawn(
                SpawnErrorKind::FileNotFound,
                format!("{}: working directory does not exist", self.cwd.display()),
            ));
        }
        let mut ctx = ExecutionContext::new(self.cwd, self.env);
        ctx.cancel = cancel;
        ctx.pipefail = self.pipefail;
        ctx.nothrow = !self.throws;
        ctx.quiet = self.output == OutputMode::Quiet;
        let mut stdin_feeder = None;
        ctx.stdin = match self.stdin {
            StdinSource::Null => Input::Null,
            StdinSource::Inherit => Input::Inherit,
            // In-memory stdin goes through one pipe so successive commands
            // consume it rather than each reading it from the start.
            StdinSource::Value(value) => match Self::stdin_input(value)? {
                Input::Bytes(data) => {
                    let (reader, writer) = os_pipe::pipe()?;
                    stdin_feeder = Some(feed(writer, data));
                    Input::Pipe(reader)
                }
                other => other,
            },
        };

        let (stdout_tee, stderr_tee) = match self.output {
            OutputMode::Tee => (Tee::Stdout, Tee::Stderr),
            _ => (Tee::None, Tee::None),
        };
        let stdout_collector = match (stream, self.output) {
            (Some(output), _) => {
                ctx.stdout = output;
                None
            }
            (None, OutputMode::Buffered | OutputMode::Tee) => {
                let (reader, writer) = os_pipe::pipe()?;
                ctx.stdout = Output::Pipe(writer);
                Some(drain(reader, stdout_tee))
            }
            (None, OutputMode::Quiet) => {
                ctx.stdout = Output::Null;
                None
            }
            (None, OutputMode::Inherit) => {
                ctx.stdout = Output::Inherit;
                None
            }
        };
        let stderr_collector = match self.output {
            OutputMode::Buffered | OutputMode::Tee => {
                let (reader, writer) = os_pipe::pipe()?;
                ctx.stderr = Output::Pipe(writer);
                Some(drain(reader, stderr_tee))
            }
            OutputMode::Quiet => {
                ctx.stderr = Output::Null;
                None
            }
            OutputMode::Inherit => {
                ctx.stderr = Output::Inherit;
                None
            }
        };

        let timer = self.timeout.map(|timeout| start_timer(timeout, ctx.cancel.clone()));
        let mut script = self.parsed.script;
        script.set_pipefail(self.pipefail);
        let executor = Executor::new(self.parsed.handles);
        let status = executor.run(&mut ctx, &script);

        let signal = ctx.last_signal.take();
        let nothrow = ctx.nothrow;
        let quiet = ctx.quiet;
        let cancel = ctx.cancel.clone();
        // Closing the context's write ends lets the collectors reach EOF.
        drop(ctx);
        if let Some(feeder) = stdin_feeder {
            if feeder.join().is_err() {
                debug!("shell event=stdin-feeder-panicked");
            }
        }
        if let Some((done, handle)) = timer {
            drop(done);
            if handle.join().is_err() {
                debug!("shell event=timer-panicked");
            }
        }
        let stdout = collect(stdout_collector, quiet)?;
        let stderr = collect(stderr_collector, quiet)?;
        let exit_code = status?;

        let output = ShellOutput {
            exit_code,
            signal,
            stdout,
            stderr,
        };
        debug!(
            "shell event=done status={} signal={} cancelled={}",
            output.exit_code,
            output.signal.as_deref().unwrap_or("-"),
            cancel.is_cancelled()
        );
        if cancel.is_cancelled() {
            return Err(ShellError::cancelled(output));
        }
        if output.exit_code != 0 && !nothrow {
            return Err(ShellError::non_zero_exit(output));
        }
        Ok(output)
    }
}

fn start_timer(timeout: Duration, cancel: CancelToken) -> (mpsc::Sender<()>, JoinHandle<()>) {
    let (done, finished) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = finished.recv_timeout(timeout) {
            debug!("shell event=timeout after_ms={}", timeout.as_millis());
            cancel.cancel();
        }
    });
    (done, handle)
}

fn collect(collector: Option<JoinHandle<Vec<u8>>>, quiet: bool) -> Result<Captured, ShellError> {
    match collector {
        Some(handle) => handle
            .join()
            .map(Captured::Bytes)
            .map_err(|_| ShellError::from(io::Error::other("output reader panicked"))),
        None if quiet => Ok(Captured::Bytes(Vec::new())),
        None => Ok(Captured::Streamed),
    }
}

/// Handle to an invocation running on its own thread.
#[derive(Debug)]
pub struct ShellTask {
    handle: Option<JoinHandle<Result<ShellOutput, ShellError>>>,
    cancel: CancelToken,
}

impl ShellTask {
    /// Block until the invocation completes.
    pub fn wait(mut self) -> Result<ShellOutput, ShellError> {
        match self.handle.take() {
            Some(handle) => join_task(handle),
            None => Err(ShellError::usage("the result was already taken by try_wait")),
        }
    }

    /// The result if the invocation has finished; it can be taken once.
    pub fn try_wait(&mut self) -> Option<Result<ShellOutput, ShellError>> {
        if !self.is_finished() {
            return None;
        }
        self.handle.take().map(join_task)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Terminate every live process and stop builtin loops. The invocation
    /// then completes with `ErrorKind::Cancelled`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Token that aborts this task, for use from other threads.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

fn join_task(handle: JoinHandle<Result<ShellOutput, ShellError>>) -> Result<ShellOutput, ShellError> {
    handle
        .join()
        .unwrap_or_else(|_| Err(ShellError::from(io::Error::other("invocation thread panicked"))))
}

/// Stdout of a running invocation, one line at a time.
///
/// After the last line the invocation is waited on; a failure is yielded as
/// a final `Err` item.
#[derive(Debug)]
pub struct Lines {
    reader: BufReader<PipeReader>,
    task: Option<ShellTask>,
}

impl Lines {
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl Iterator for Lines {
    type Item = Result<String, ShellError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.task.as_ref()?;
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => {
                let task = self.task.take()?;
                match task.wait() {
                    Ok(_) => None,
                    Err(err) => Some(Err(err)),
                }
            }
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Some(Ok(line))
            }
            Err(err) => {
                self.task = None;
                Some(Err(err.into()))
            }
        }
    }
}
