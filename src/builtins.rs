//! In-engine implementations of common utilities.
//!
//! Builtins see the invocation's `ExecutionContext` instead of process state,
//! so `cd` only moves the invocation and relative paths resolve against the
//! context cwd. Failures are reported as `name: message` on the stage stderr
//! with a non-zero status, the same way an external program would.
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use log::debug;

use crate::context::ExecutionContext;
use crate::execution::spawning::search_path;

mod fs_cmds;
mod path_cmds;

/// Stdio of one builtin stage.
pub struct BuiltinIo {
    pub stdin: Box<dyn Read + Send>,
    pub stdout: BufWriter<Box<dyn Write + Send>>,
    pub stderr: Box<dyn Write + Send>,
}

impl BuiltinIo {
    pub fn new(
        stdin: Box<dyn Read + Send>,
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            stdin,
            stdout: BufWriter::new(stdout),
            stderr,
        }
    }

    /// Report `name: message` on stderr and return the failure status.
    pub(crate) fn fail(&mut self, name: &str, message: impl std::fmt::Display) -> i32 {
        // Nothing useful can be done if stderr itself is gone.
        let _ = writeln!(self.stderr, "{name}: {message}");
        1
    }
}

type BuiltinFn = fn(&mut ExecutionContext, &[String], &mut BuiltinIo) -> io::Result<i32>;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("echo", builtin_echo),
    ("cd", builtin_cd),
    ("pwd", builtin_pwd),
    ("true", builtin_true),
    ("false", builtin_false),
    ("exit", builtin_exit),
    ("which", builtin_which),
    ("basename", path_cmds::basename),
    ("dirname", path_cmds::dirname),
    ("ls", fs_cmds::ls),
    ("rm", fs_cmds::rm),
    ("mv", fs_cmds::mv),
    ("cp", fs_cmds::cp),
    ("mkdir", fs_cmds::mkdir),
    ("touch", fs_cmds::touch),
    ("cat", fs_cmds::cat),
];

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, f)| *f)
}

/// Run `argv[0]` as a builtin and return its exit status.
pub fn run_builtin(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> i32 {
    let Some(name) = argv.first() else {
        return 0;
    };
    let Some(builtin) = lookup(name) else {
        return io.fail(name, "not a builtin");
    };
    debug!("shell event=builtin name={} argc={}", name, argv.len());
    let result = builtin(ctx, argv, io).and_then(|code| io.stdout.flush().map(|()| code));
    match result {
        Ok(code) => code,
        // The reader went away; like a process killed by SIGPIPE, stop quietly.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => 1,
        Err(err) => io.fail(name, err),
    }
}

/// Split leading `-abc` clusters from operands. `--` ends option parsing.
pub(crate) fn parse_flags<'a>(
    args: &'a [String],
    allowed: &str,
) -> Result<(Vec<char>, Vec<&'a str>), char> {
    let mut flags = Vec::new();
    let mut operands = Vec::new();
    let mut options_done = false;
    for arg in args {
        if !options_done && arg == "--" {
            options_done = true;
            continue;
        }
        if !options_done && arg.len() > 1 && arg.starts_with('-') {
            for ch in arg.chars().skip(1) {
                if !allowed.contains(ch) {
                    return Err(ch);
                }
                flags.push(ch);
            }
            continue;
        }
        operands.push(arg.as_str());
    }
    Ok((flags, operands))
}

fn builtin_echo(_ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let mut args = &argv[1..];
    let mut newline = true;
    while let Some(first) = args.first() {
        if first.len() > 1 && first.starts_with('-') && first.chars().skip(1).all(|c| c == 'n') {
            newline = false;
            args = &args[1..];
        } else {
            break;
        }
    }
    io.stdout.write_all(args.join(" ").as_bytes())?;
    if newline {
        io.stdout.write_all(b"\n")?;
    }
    Ok(0)
}

fn builtin_cd(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    if argv.len() > 2 {
        return Ok(io.fail("cd", "too many arguments"));
    }
    let mut print_target = false;
    let target = match argv.get(1).map(String::as_str) {
        None => match ctx.home_dir() {
            Some(home) => PathBuf::from(home),
            None => return Ok(io.fail("cd", "HOME not set")),
        },
        Some("-") => match ctx.prev_cwd.clone() {
            Some(prev) => {
                print_target = true;
                prev
            }
            None => return Ok(io.fail("cd", "OLDPWD not set")),
        },
        Some(dir) => ctx.resolve(dir),
    };
    let target = normalize(&target);
    match target.metadata() {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(io.fail("cd", format!("{}: Not a directory", target.display()))),
        Err(err) => return Ok(io.fail("cd", format!("{}: {}", target.display(), describe(&err)))),
    }
    let previous = std::mem::replace(&mut ctx.cwd, target);
    ctx.env.set("OLDPWD", previous.to_string_lossy());
    ctx.env.set("PWD", ctx.cwd.to_string_lossy());
    ctx.prev_cwd = Some(previous);
    if print_target {
        writeln!(io.stdout, "{}", ctx.cwd.display())?;
    }
    Ok(0)
}

fn builtin_pwd(ctx: &mut ExecutionContext, _argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    writeln!(io.stdout, "{}", ctx.cwd.display())?;
    Ok(0)
}

fn builtin_true(_ctx: &mut ExecutionContext, _argv: &[String], _io: &mut BuiltinIo) -> io::Result<i32> {
    Ok(0)
}

fn builtin_false(_ctx: &mut ExecutionContext, _argv: &[String], _io: &mut BuiltinIo) -> io::Result<i32> {
    Ok(1)
}

fn builtin_exit(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let code = match argv.get(1) {
        None => ctx.last_status,
        Some(arg) => match arg.parse::<i32>() {
            Ok(code) => code & 0xff,
            Err(_) => {
                io.fail("exit", format!("{arg}: numeric argument required"));
                2
            }
        },
    };
    ctx.exit_requested = Some(code);
    Ok(code)
}

fn builtin_which(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (flags, names) = match parse_flags(&argv[1..], "a") {
        Ok(parsed) => parsed,
        Err(flag) => return Ok(io.fail("which", format!("invalid option -- '{flag}'"))),
    };
    let all = flags.contains(&'a');
    let mut status = 0;
    for name in names {
        let found = search_path(name, &ctx.cwd, &ctx.env, all);
        if found.is_empty() {
            if is_builtin(name) {
                writeln!(io.stdout, "{name}: shell built-in command")?;
            } else {
                writeln!(io.stdout, "{name} not found")?;
                status = 1;
            }
            continue;
        }
        for path in found {
            writeln!(io.stdout, "{}", path.display())?;
        }
    }
    Ok(status)
}

/// Lexically resolve `.` and `..` so the context cwd stays readable.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Error text without the ` (os error N)` suffix.
pub(crate) fn describe(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "No such file or directory".to_string(),
        io::ErrorKind::PermissionDenied => "Permission denied".to_string(),
        io::ErrorKind::AlreadyExists => "File exists".to_string(),
        _ => {
            let text = err.to_string();
            match text.find(" (os error") {
                Some(idx) => text[..idx].to_string(),
                None => text,
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{context, run};
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn echo_joins_arguments() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        assert_eq!(run(&mut ctx, &["echo", "hi", "there"]).stdout, "hi there\n");
        assert_eq!(run(&mut ctx, &["echo", "-n", "x"]).stdout, "x");
        assert_eq!(run(&mut ctx, &["echo"]).stdout, "\n");
        assert_eq!(run(&mut ctx, &["echo", "-"]).stdout, "-\n");
    }

    #[test]
    fn cd_changes_only_the_context() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let process_cwd = std::env::current_dir().unwrap();
        let mut ctx = context(dir.path());

        assert_eq!(run(&mut ctx, &["cd", "sub"]).code, 0);
        assert_eq!(ctx.cwd, dir.path().join("sub"));
        assert_eq!(std::env::current_dir().unwrap(), process_cwd);

        assert_eq!(run(&mut ctx, &["cd", ".."]).code, 0);
        assert_eq!(ctx.cwd, dir.path());

        let back = run(&mut ctx, &["cd", "-"]);
        assert_eq!(back.stdout, format!("{}\n", dir.path().join("sub").display()));

        assert_eq!(run(&mut ctx, &["cd"]).code, 0);
        assert_eq!(ctx.cwd, dir.path());
    }

    #[test]
    fn cd_reports_missing_directory() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let ran = run(&mut ctx, &["cd", "missing"]);
        assert_eq!(ran.code, 1);
        assert!(ran.stderr.starts_with("cd: "));
        assert!(ran.stderr.contains("No such file or directory"));
        assert_eq!(ctx.cwd, dir.path());
    }

    #[test]
    fn pwd_true_false_exit() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        assert_eq!(run(&mut ctx, &["pwd"]).stdout, format!("{}\n", dir.path().display()));
        assert_eq!(run(&mut ctx, &["true"]).code, 0);
        assert_eq!(run(&mut ctx, &["false"]).code, 1);
        assert_eq!(run(&mut ctx, &["exit", "3"]).code, 3);
        assert_eq!(ctx.exit_requested, Some(3));
        assert_eq!(run(&mut ctx, &["exit", "nope"]).code, 2);
    }

    #[cfg(unix)]
    #[test]
    fn which_finds_programs_and_builtins() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let ran = run(&mut ctx, &["which", "sh"]);
        assert_eq!(ran.code, 0);
        assert!(ran.stdout.trim_end().ends_with("/sh"));
        let ran = run(&mut ctx, &["which", "no-such-tool-xyz"]);
        assert_eq!(ran.code, 1);
        let ran = run(&mut ctx, &["which", "-z"]);
        assert_eq!(ran.code, 1);
        assert!(ran.stderr.contains("invalid option"));
    }

    #[test]
    fn flags_and_operands() {
        let args: Vec<String> = ["-rf", "a", "--", "-b"].iter().map(|s| s.to_string()).collect();
        let (flags, operands) = parse_flags(&args, "rf").unwrap();
        assert_eq!(flags, vec!['r', 'f']);
        assert_eq!(operands, vec!["a", "-b"]);
        assert_eq!(parse_flags(&args, "r").unwrap_err(), 'f');
    }

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
    }
}
