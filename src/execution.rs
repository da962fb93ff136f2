//! Script evaluation and pipeline wiring.
//!
//! Every stage of a pipeline is created and connected before any stage is
//! waited on. Stage i writes into an `os_pipe` whose read end is stage i+1's
//! stdin; external stages are child processes, builtin stages run on threads
//! when the pipeline has more than one stage and inline otherwise.
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use os_pipe::{PipeReader, PipeWriter};

use crate::builtins::{is_builtin, run_builtin, BuiltinIo};
use crate::context::ExecutionContext;
use crate::error::{ShellError, SpawnErrorKind};
use crate::expansion::{expand_assignment, expand_target, expand_words, ExpansionContext};
use crate::parse::{CommandNode, Connector, List, Pipeline, RedirectOp, RedirectTarget, Script};
use crate::value::RawHandle;

pub mod cancel;
pub mod spawning;
pub mod stdio;

use spawning::{resolve_program, spawn_external, ExitInfo, ProcessHandle};
use stdio::{drain, open_input, open_output, Input, Output, Tee};

/// A command after expansion, ready to be started.
#[derive(Debug)]
struct PreparedStage {
    argv: Vec<String>,
    assignments: Vec<(String, String)>,
    redirects: Vec<(RedirectOp, PreparedTarget)>,
}

#[derive(Debug)]
enum PreparedTarget {
    Path(PathBuf),
    Handle(usize),
    None,
}

enum Started {
    Process(ProcessHandle),
    Builtin(JoinHandle<i32>),
    Done(i32),
}

/// Runs the parsed script of one invocation.
#[derive(Clone)]
pub(crate) struct Executor {
    handles: Arc<[Option<RawHandle>]>,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Executor {
    pub(crate) fn new(handles: Vec<Option<RawHandle>>) -> Self {
        Self {
            handles: Arc::from(handles),
            background: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Evaluate `script` and wait for every background chain it started.
    pub(crate) fn run(&self, ctx: &mut ExecutionContext, script: &Script) -> Result<i32, ShellError> {
        let result = self.run_list(ctx, &script.list);
        self.join_background();
        result
    }

    fn join_background(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = match self.background.lock() {
                Ok(mut guard) => guard.drain(..).collect(),
                Err(poisoned) => poisoned.into_inner().drain(..).collect(),
            };
            if pending.is_empty() {
                break;
            }
            for handle in pending {
                if handle.join().is_err() {
                    warn!("shell event=background-panicked");
                }
            }
        }
    }

    fn run_list(&self, ctx: &mut ExecutionContext, list: &List) -> Result<i32, ShellError> {
        let items = &list.items;
        let mut start = 0;
        while start < items.len() {
            if ctx.cancel.is_cancelled() {
                break;
            }
            // An and-or chain ends at the first `;`, newline or `&`.
            let mut end = start;
            while end + 1 < items.len() && matches!(items[end].1, Connector::And | Connector::Or) {
                end += 1;
            }
            let chain = &items[start..=end];
            if items[end].1 == Connector::Background {
                self.spawn_background(ctx, chain.to_vec())?;
            } else {
                self.run_chain(ctx, chain)?;
            }
            if ctx.exit_requested.is_some() {
                break;
            }
            start = end + 1;
        }
        Ok(ctx.exit_requested.unwrap_or(ctx.last_status))
    }

    fn spawn_background(
        &self,
        ctx: &mut ExecutionContext,
        chain: Vec<(Pipeline, Connector)>,
    ) -> Result<(), ShellError> {
        let chain_len = chain.len();
        let mut forked = ctx.fork()?;
        let exec = self.clone();
        let handle = thread::spawn(move || {
            if let Err(err) = exec.run_chain(&mut forked, &chain) {
                debug!("shell event=background-failed error={}", err.display_simple());
            }
        });
        match self.background.lock() {
            Ok(mut guard) => guard.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
        debug!("shell event=background-start pipelines={}", chain_len);
        ctx.last_status = 0;
        ctx.last_signal = None;
        Ok(())
    }

    fn run_chain(&self, ctx: &mut ExecutionContext, chain: &[(Pipeline, Connector)]) -> Result<(), ShellError> {
        for (idx, (pipeline, _)) in chain.iter().enumerate() {
            if idx > 0 {
                let should_run = match chain[idx - 1].1 {
                    Connector::And => ctx.last_status == 0,
                    Connector::Or => ctx.last_status != 0,
                    Connector::Sequential | Connector::Background => true,
                };
                if !should_run {
                    continue;
                }
            }
            if ctx.cancel.is_cancelled() {
                break;
            }
            let info = match self.run_pipeline(ctx, pipeline) {
                Ok(info) => info,
                // Inside an and-or chain the next connector decides what a
                // failed start means, as it would for any failing status.
                Err(err) if idx + 1 < chain.len() && err.spawn_kind().is_some() => spawn_failure_status(ctx, &err),
                Err(err) => return Err(err),
            };
            ctx.last_status = info.code;
            ctx.last_signal = info.signal;
            if ctx.exit_requested.is_some() {
                break;
            }
        }
        Ok(())
    }

    /// Run a command substitution and return its stdout minus trailing newlines.
    fn run_subst(&self, ctx: &ExecutionContext, script: &Script) -> Result<String, ShellError> {
        let mut forked = ctx.fork()?;
        let (reader, writer) = os_pipe::pipe()?;
        forked.stdout = Output::Pipe(writer);
        let collector = drain(reader, Tee::None);
        let result = self.run_list(&mut forked, &script.list);
        drop(forked);
        let bytes = collector
            .join()
            .map_err(|_| ShellError::from(std::io::Error::other("substitution reader panicked")))?;
        result?;
        let mut text = String::from_utf8_lossy(&bytes).into_owned();
        while text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        Ok(text)
    }

    fn prepare(&self, ctx: &ExecutionContext, command: &CommandNode) -> Result<PreparedStage, ShellError> {
        let subst = |script: &Script| self.run_subst(ctx, script);
        let ectx = ExpansionContext {
            ctx,
            command_subst: &subst,
        };
        let mut assignments = Vec::with_capacity(command.assignments.len());
        for assignment in &command.assignments {
            assignments.push((
                assignment.name.clone(),
                expand_assignment(&assignment.value, &ectx)?,
            ));
        }
        let argv = expand_words(&command.argv, &ectx)?;
        let mut redirects = Vec::with_capacity(command.redirects.len());
        for redirect in &command.redirects {
            let target = match &redirect.target {
                RedirectTarget::Path(word) => PreparedTarget::Path(ctx.resolve(expand_target(word, &ectx)?)),
                RedirectTarget::Handle(index) => PreparedTarget::Handle(*index),
                RedirectTarget::None => PreparedTarget::None,
            };
            redirects.push((redirect.op, target));
        }
        Ok(PreparedStage {
            argv,
            assignments,
            redirects,
        })
    }

    fn handle(&self, index: usize) -> Result<&RawHandle, ShellError> {
        self.handles
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| ShellError::usage(format!("template value ${{{index}}} is not a stdio handle")))
    }

    fn handle_input(&self, index: usize) -> Result<Input, ShellError> {
        Ok(match self.handle(index)? {
            RawHandle::File(file) => Input::File(file.try_clone()?),
            RawHandle::Bytes(data) => Input::Bytes(Arc::clone(data)),
        })
    }

    fn handle_output(&self, index: usize) -> Result<Output, ShellError> {
        match self.handle(index)? {
            RawHandle::File(file) => Ok(Output::File(file.try_clone()?)),
            RawHandle::Bytes(_) => Err(ShellError::usage(format!(
                "template value ${{{index}}} holds in-memory bytes and cannot receive output"
            ))
            .with_context("redirect output to a file handle or a path instead")),
        }
    }

    /// Apply a stage's redirections, in order, on top of its pipe wiring.
    fn apply_redirects(
        &self,
        stage: &PreparedStage,
        mut stdin: Input,
        mut stdout: Output,
        mut stderr: Output,
    ) -> Result<(Input, Output, Output), ShellError> {
        for (op, target) in &stage.redirects {
            match (*op, target) {
                (RedirectOp::In, PreparedTarget::Path(path)) => stdin = Input::File(open_input(path)?),
                (RedirectOp::In, PreparedTarget::Handle(index)) => stdin = self.handle_input(*index)?,
                (RedirectOp::Out { append }, PreparedTarget::Path(path)) => {
                    stdout = Output::File(open_output(path, append)?)
                }
                (RedirectOp::Out { .. }, PreparedTarget::Handle(index)) => stdout = self.handle_output(*index)?,
                (RedirectOp::Err { append }, PreparedTarget::Path(path)) => {
                    stderr = Output::File(open_output(path, append)?)
                }
                (RedirectOp::Err { .. }, PreparedTarget::Handle(index)) => stderr = self.handle_output(*index)?,
                (RedirectOp::Both { append }, PreparedTarget::Path(path)) => {
                    let file = open_output(path, append)?;
                    stderr = Output::File(file.try_clone()?);
                    stdout = Output::File(file);
                }
                (RedirectOp::Both { .. }, PreparedTarget::Handle(index)) => {
                    stdout = self.handle_output(*index)?;
                    stderr = stdout.try_clone()?;
                }
                (RedirectOp::ErrToOut, _) => stderr = stdout.try_clone()?,
                (RedirectOp::OutToErr, _) => stdout = stderr.try_clone()?,
                (op, PreparedTarget::None) => {
                    return Err(ShellError::usage(format!("redirection {op:?} has no target")));
                }
            }
        }
        Ok((stdin, stdout, stderr))
    }

    fn run_pipeline(&self, ctx: &mut ExecutionContext, pipeline: &Pipeline) -> Result<ExitInfo, ShellError> {
        let mut stages = Vec::with_capacity(pipeline.commands.len());
        for command in &pipeline.commands {
            stages.push(self.prepare(ctx, command)?);
        }
        let count = stages.len();
        debug!("shell event=pipeline-start stages={}", count);

        let mut info = if count == 1 {
            self.run_single(ctx, &stages[0])?
        } else {
            self.run_stages(ctx, &stages, pipeline.pipefail || ctx.pipefail)?
        };

        if pipeline.negated {
            info.code = if info.code == 0 { 1 } else { 0 };
        }
        debug!(
            "shell event=pipeline-done status={} signal={}",
            info.code,
            info.signal.as_deref().unwrap_or("-")
        );
        Ok(info)
    }

    /// One stage: builtins and assignment-only commands run inline so they
    /// can change the invocation context.
    fn run_single(&self, ctx: &mut ExecutionContext, stage: &PreparedStage) -> Result<ExitInfo, ShellError> {
        let (stdin, stdout, stderr) = self.apply_redirects(
            stage,
            ctx.stdin.try_clone()?,
            ctx.stdout.try_clone()?,
            ctx.stderr.try_clone()?,
        )?;

        let Some(name) = stage.argv.first() else {
            for (name, value) in &stage.assignments {
                ctx.env.set(name.clone(), value.clone());
            }
            return Ok(ExitInfo { code: 0, signal: None });
        };

        if is_builtin(name) {
            let saved: Vec<(String, Option<String>)> = stage
                .assignments
                .iter()
                .map(|(name, _)| (name.clone(), ctx.env.get(name).map(str::to_string)))
                .collect();
            for (name, value) in &stage.assignments {
                ctx.env.set(name.clone(), value.clone());
            }
            let mut io = BuiltinIo::new(stdin.into_reader(), stdout.into_writer(false), stderr.into_writer(true));
            let code = run_builtin(ctx, &stage.argv, &mut io);
            drop(io);
            for (name, value) in saved {
                match value {
                    Some(value) => ctx.env.set(name, value),
                    None => {
                        ctx.env.remove(&name);
                    }
                }
            }
            return Ok(ExitInfo { code, signal: None });
        }

        let handle = self.spawn_process(ctx, stage, stdin, stdout, stderr)?;
        handle.wait()
    }

    fn spawn_process(
        &self,
        ctx: &ExecutionContext,
        stage: &PreparedStage,
        stdin: Input,
        stdout: Output,
        stderr: Output,
    ) -> Result<ProcessHandle, ShellError> {
        let mut env = ctx.env.clone();
        env.extend(stage.assignments.iter().cloned());
        let program = resolve_program(&stage.argv[0], &ctx.cwd, &env)?;
        spawn_external(&program, &stage.argv, &ctx.cwd, &env, stdin, stdout, stderr, &ctx.cancel)
    }

    fn run_stages(
        &self,
        ctx: &ExecutionContext,
        stages: &[PreparedStage],
        pipefail: bool,
    ) -> Result<ExitInfo, ShellError> {
        let count = stages.len();
        let mut readers: Vec<Option<PipeReader>> = Vec::with_capacity(count - 1);
        let mut writers: Vec<Option<PipeWriter>> = Vec::with_capacity(count - 1);
        for _ in 1..count {
            let (reader, writer) = os_pipe::pipe()?;
            readers.push(Some(reader));
            writers.push(Some(writer));
        }

        let mut started = Vec::with_capacity(count);
        let mut failure = None;
        for (idx, stage) in stages.iter().enumerate() {
            match self.start_stage(ctx, stage, idx, count, &mut readers, &mut writers) {
                Ok(stage) => started.push(stage),
                Err(err) => {
                    debug!("shell event=stage-failed stage={} error={}", idx, err.message);
                    failure = Some(err);
                    break;
                }
            }
        }
        // Unstarted stages are abandoned; closing their pipe ends lets the
        // started ones see EOF or EPIPE and finish.
        drop(readers);
        drop(writers);

        let mut results = Vec::with_capacity(started.len());
        for stage in started {
            results.push(match stage {
                Started::Process(handle) => match handle.wait() {
                    Ok(info) => info,
                    Err(err) => {
                        failure.get_or_insert(err);
                        continue;
                    }
                },
                Started::Builtin(handle) => ExitInfo {
                    code: handle.join().unwrap_or_else(|_| {
                        warn!("shell event=builtin-panicked");
                        1
                    }),
                    signal: None,
                },
                Started::Done(code) => ExitInfo { code, signal: None },
            });
        }
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(combine(results, pipefail))
    }

    fn start_stage(
        &self,
        ctx: &ExecutionContext,
        stage: &PreparedStage,
        idx: usize,
        count: usize,
        readers: &mut [Option<PipeReader>],
        writers: &mut [Option<PipeWriter>],
    ) -> Result<Started, ShellError> {
        let stdin = if idx == 0 {
            ctx.stdin.try_clone()?
        } else {
            readers[idx - 1].take().map(Input::Pipe).unwrap_or(Input::Null)
        };
        let stdout = if idx + 1 == count {
            ctx.stdout.try_clone()?
        } else {
            writers[idx].take().map(Output::Pipe).unwrap_or(Output::Null)
        };
        let (stdin, stdout, stderr) = self.apply_redirects(stage, stdin, stdout, ctx.stderr.try_clone()?)?;

        let Some(name) = stage.argv.first() else {
            return Ok(Started::Done(0));
        };
        if is_builtin(name) {
            let mut forked = ctx.fork()?;
            forked.env.extend(stage.assignments.iter().cloned());
            let argv = stage.argv.clone();
            let mut io = BuiltinIo::new(stdin.into_reader(), stdout.into_writer(false), stderr.into_writer(true));
            debug!("shell event=spawn stage={} builtin={}", idx, name);
            return Ok(Started::Builtin(thread::spawn(move || {
                run_builtin(&mut forked, &argv, &mut io)
            })));
        }
        let handle = self.spawn_process(ctx, stage, stdin, stdout, stderr)?;
        debug!("shell event=spawn stage={} pid={}", idx, handle.id());
        Ok(Started::Process(handle))
    }
}

/// Report a stage that failed to start on the context stderr and turn it
/// into the conventional status: 127 not found, 126 not executable.
fn spawn_failure_status(ctx: &ExecutionContext, err: &ShellError) -> ExitInfo {
    let code = match err.spawn_kind() {
        Some(SpawnErrorKind::ProgramNotFound) => 127,
        Some(SpawnErrorKind::PermissionDenied) => 126,
        _ => 1,
    };
    debug!("shell event=spawn-failed-in-chain status={} error={}", code, err.message);
    match ctx.stderr.try_clone() {
        Ok(stderr) => {
            let mut stderr = stderr.into_writer(true);
            if let Err(write_err) = writeln!(stderr, "{}", err.message) {
                debug!("shell event=stderr-write-failed error={}", write_err);
            }
        }
        Err(clone_err) => warn!("shell event=stderr-clone-failed error={}", clone_err),
    }
    ExitInfo { code, signal: None }
}

/// Pipeline status: the last stage's code, or the first failing stage's
/// under pipefail. The last stage's signal wins; an upstream signal is only
/// reported when the last stage has none.
fn combine(results: Vec<ExitInfo>, pipefail: bool) -> ExitInfo {
    let mut last = results.last().cloned().unwrap_or(ExitInfo { code: 0, signal: None });
    if pipefail {
        if let Some(first) = results.iter().find(|r| r.code != 0) {
            last.code = first.code;
        }
    }
    if last.signal.is_none() {
        last.signal = results.iter().find_map(|r| r.signal.clone());
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(code: i32, signal: Option<&str>) -> ExitInfo {
        ExitInfo {
            code,
            signal: signal.map(str::to_string),
        }
    }

    #[test]
    fn combine_uses_last_stage() {
        let combined = combine(vec![info(3, None), info(0, None)], false);
        assert_eq!(combined, info(0, None));
    }

    #[test]
    fn combine_pipefail_uses_first_failure() {
        let combined = combine(vec![info(0, None), info(3, None), info(4, None)], true);
        assert_eq!(combined.code, 3);
        let combined = combine(vec![info(0, None), info(0, None)], true);
        assert_eq!(combined.code, 0);
    }

    #[test]
    fn combine_records_upstream_signal() {
        let combined = combine(vec![info(143, Some("SIGTERM")), info(0, None)], false);
        assert_eq!(combined, info(0, Some("SIGTERM")));
        let combined = combine(vec![info(141, Some("SIGPIPE")), info(143, Some("SIGTERM"))], false);
        assert_eq!(combined.signal.as_deref(), Some("SIGTERM"));
    }
}
