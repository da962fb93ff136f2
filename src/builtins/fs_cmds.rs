//! File-system builtins.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use crate::context::ExecutionContext;

use super::{describe, parse_flags, BuiltinIo};

const CAT_CHUNK: usize = 64 * 1024;

macro_rules! flags_or_fail {
    ($io:expr, $name:literal, $args:expr, $allowed:literal) => {
        match parse_flags($args, $allowed) {
            Ok(parsed) => parsed,
            Err(flag) => return Ok($io.fail($name, format!("invalid option -- '{flag}'"))),
        }
    };
}

pub(super) fn ls(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (flags, mut operands) = flags_or_fail!(io, "ls", &argv[1..], "aA1");
    let all = flags.contains(&'a');
    let almost_all = flags.contains(&'A');
    if operands.is_empty() {
        operands.push(".");
    }
    let headers = operands.len() > 1;
    let mut status = 0;
    for (idx, operand) in operands.iter().enumerate() {
        let path = ctx.resolve(operand);
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) => {
                status = io.fail("ls", format!("cannot access '{operand}': {}", describe(&err)));
                continue;
            }
        };
        if !meta.is_dir() {
            writeln!(io.stdout, "{operand}")?;
            continue;
        }
        let mut names: Vec<String> = match fs::read_dir(&path) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| all || almost_all || !name.starts_with('.'))
                .collect(),
            Err(err) => {
                status = io.fail("ls", format!("cannot open directory '{operand}': {}", describe(&err)));
                continue;
            }
        };
        if all {
            names.push(".".to_string());
            names.push("..".to_string());
        }
        names.sort();
        if headers {
            if idx > 0 {
                writeln!(io.stdout)?;
            }
            writeln!(io.stdout, "{operand}:")?;
        }
        for name in names {
            writeln!(io.stdout, "{name}")?;
        }
    }
    Ok(status)
}

pub(super) fn rm(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (flags, operands) = flags_or_fail!(io, "rm", &argv[1..], "rRf");
    let recursive = flags.iter().any(|f| matches!(f, 'r' | 'R'));
    let force = flags.contains(&'f');
    if operands.is_empty() {
        return Ok(if force { 0 } else { io.fail("rm", "missing operand") });
    }
    let mut status = 0;
    for operand in operands {
        let path = ctx.resolve(operand);
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound && force => continue,
            Err(err) => {
                status = io.fail("rm", format!("cannot remove '{operand}': {}", describe(&err)));
                continue;
            }
        };
        let result = if meta.is_dir() {
            if !recursive {
                status = io.fail("rm", format!("cannot remove '{operand}': Is a directory"));
                continue;
            }
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(err) = result {
            status = io.fail("rm", format!("cannot remove '{operand}': {}", describe(&err)));
        }
    }
    Ok(status)
}

pub(super) fn mv(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (_, operands) = flags_or_fail!(io, "mv", &argv[1..], "f");
    let Some((dest, sources)) = operands.split_last() else {
        return Ok(io.fail("mv", "missing file operand"));
    };
    if sources.is_empty() {
        return Ok(io.fail("mv", format!("missing destination file operand after '{dest}'")));
    }
    let dest_path = ctx.resolve(dest);
    let into_dir = dest_path.is_dir();
    if sources.len() > 1 && !into_dir {
        return Ok(io.fail("mv", format!("target '{dest}' is not a directory")));
    }
    let mut status = 0;
    for source in sources {
        let from = ctx.resolve(source);
        let to = if into_dir {
            match from.file_name() {
                Some(name) => dest_path.join(name),
                None => {
                    status = io.fail("mv", format!("cannot move '{source}'"));
                    continue;
                }
            }
        } else {
            dest_path.clone()
        };
        if let Err(err) = move_path(&from, &to) {
            status = io.fail("mv", format!("cannot move '{source}' to '{dest}': {}", describe(&err)));
        }
    }
    Ok(status)
}

fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    fs::symlink_metadata(from)?;
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Rename cannot cross file systems; fall back to copy and delete.
        Err(_) if from.is_file() => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(_) if from.is_dir() => {
            copy_recursive(from, to)?;
            fs::remove_dir_all(from)
        }
        Err(err) => Err(err),
    }
}

pub(super) fn cp(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (flags, operands) = flags_or_fail!(io, "cp", &argv[1..], "rRf");
    let recursive = flags.iter().any(|f| matches!(f, 'r' | 'R'));
    let Some((dest, sources)) = operands.split_last() else {
        return Ok(io.fail("cp", "missing file operand"));
    };
    if sources.is_empty() {
        return Ok(io.fail("cp", format!("missing destination file operand after '{dest}'")));
    }
    let dest_path = ctx.resolve(dest);
    let into_dir = dest_path.is_dir();
    if sources.len() > 1 && !into_dir {
        return Ok(io.fail("cp", format!("target '{dest}' is not a directory")));
    }
    let mut status = 0;
    for source in sources {
        let from = ctx.resolve(source);
        let to = match (into_dir, from.file_name()) {
            (true, Some(name)) => dest_path.join(name),
            _ => dest_path.clone(),
        };
        let result = if from.is_dir() {
            if !recursive {
                status = io.fail("cp", format!("-r not specified; omitting directory '{source}'"));
                continue;
            }
            if to.starts_with(&from) {
                status = io.fail("cp", format!("cannot copy a directory, '{source}', into itself"));
                continue;
            }
            copy_recursive(&from, &to)
        } else {
            fs::copy(&from, &to).map(|_| ())
        };
        if let Err(err) = result {
            status = io.fail("cp", format!("cannot copy '{source}': {}", describe(&err)));
        }
    }
    Ok(status)
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

pub(super) fn mkdir(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (flags, operands) = flags_or_fail!(io, "mkdir", &argv[1..], "p");
    let parents = flags.contains(&'p');
    if operands.is_empty() {
        return Ok(io.fail("mkdir", "missing operand"));
    }
    let mut status = 0;
    for operand in operands {
        let path = ctx.resolve(operand);
        let result = if parents {
            fs::create_dir_all(&path)
        } else {
            fs::create_dir(&path)
        };
        if let Err(err) = result {
            status = io.fail(
                "mkdir",
                format!("cannot create directory '{operand}': {}", describe(&err)),
            );
        }
    }
    Ok(status)
}

pub(super) fn touch(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (_, operands) = flags_or_fail!(io, "touch", &argv[1..], "");
    if operands.is_empty() {
        return Ok(io.fail("touch", "missing file operand"));
    }
    let mut status = 0;
    for operand in operands {
        let path = ctx.resolve(operand);
        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .and_then(|file| file.set_modified(SystemTime::now()));
        if let Err(err) = result {
            status = io.fail("touch", format!("cannot touch '{operand}': {}", describe(&err)));
        }
    }
    Ok(status)
}

/// Copy `reader` to stdout in fixed-size chunks, stopping on cancellation.
fn stream(ctx: &ExecutionContext, reader: &mut dyn Read, io: &mut BuiltinIo) -> io::Result<bool> {
    let mut buf = vec![0u8; CAT_CHUNK];
    loop {
        if ctx.cancel.is_cancelled() {
            return Ok(false);
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(true),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        io.stdout.write_all(&buf[..n])?;
    }
}

pub(super) fn cat(ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    let (_, mut operands) = flags_or_fail!(io, "cat", &argv[1..], "");
    if operands.is_empty() {
        operands.push("-");
    }
    let mut status = 0;
    for operand in operands {
        let completed = if operand == "-" {
            let mut stdin = std::mem::replace(&mut io.stdin, Box::new(io::empty()));
            let result = stream(ctx, &mut stdin, io);
            io.stdin = stdin;
            result?
        } else {
            let path = ctx.resolve(operand);
            if path.is_dir() {
                status = io.fail("cat", format!("{operand}: Is a directory"));
                continue;
            }
            match File::open(&path) {
                Ok(mut file) => stream(ctx, &mut file, io)?,
                Err(err) => {
                    status = io.fail("cat", format!("{operand}: {}", describe(&err)));
                    continue;
                }
            }
        };
        if !completed {
            return Ok(130);
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use crate::builtins::test_support::{context, run, run_with_input};
    use tempfile::tempdir;

    #[test]
    fn ls_lists_sorted_and_hides_dotfiles() {
        let dir = tempdir().unwrap();
        for name in ["b", "a", ".hidden"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let mut ctx = context(dir.path());
        assert_eq!(run(&mut ctx, &["ls"]).stdout, "a\nb\n");
        assert_eq!(run(&mut ctx, &["ls", "-A"]).stdout, ".hidden\na\nb\n");
        assert_eq!(run(&mut ctx, &["ls", "-a1"]).stdout, ".\n..\n.hidden\na\nb\n");
        let missing = run(&mut ctx, &["ls", "nope"]);
        assert_eq!(missing.code, 1);
        assert!(missing.stderr.starts_with("ls: cannot access 'nope'"));
    }

    #[test]
    fn rm_needs_recursive_for_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("d/e")).unwrap();
        std::fs::write(dir.path().join("f"), "").unwrap();
        let mut ctx = context(dir.path());
        assert_eq!(run(&mut ctx, &["rm", "d"]).code, 1);
        assert_eq!(run(&mut ctx, &["rm", "-r", "d", "f"]).code, 0);
        assert!(!dir.path().join("d").exists());
        assert!(!dir.path().join("f").exists());
        assert_eq!(run(&mut ctx, &["rm", "missing"]).code, 1);
        assert_eq!(run(&mut ctx, &["rm", "-f", "missing"]).code, 0);
    }

    #[test]
    fn mv_and_cp() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("src.txt"), "data").unwrap();
        std::fs::create_dir(dir.path().join("into")).unwrap();
        std::fs::create_dir_all(dir.path().join("tree/sub")).unwrap();
        std::fs::write(dir.path().join("tree/sub/leaf"), "leaf").unwrap();
        let mut ctx = context(dir.path());

        assert_eq!(run(&mut ctx, &["cp", "src.txt", "copy.txt"]).code, 0);
        assert_eq!(std::fs::read_to_string(dir.path().join("copy.txt")).unwrap(), "data");
        assert_eq!(run(&mut ctx, &["mv", "copy.txt", "into"]).code, 0);
        assert!(dir.path().join("into/copy.txt").exists());
        assert!(!dir.path().join("copy.txt").exists());

        let ran = run(&mut ctx, &["cp", "tree", "tree2"]);
        assert_eq!(ran.code, 1);
        assert!(ran.stderr.contains("-r not specified"));
        assert_eq!(run(&mut ctx, &["cp", "-r", "tree", "tree2"]).code, 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tree2/sub/leaf")).unwrap(),
            "leaf"
        );
    }

    #[test]
    fn mkdir_and_touch() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        assert_eq!(run(&mut ctx, &["mkdir", "a/b"]).code, 1);
        assert_eq!(run(&mut ctx, &["mkdir", "-p", "a/b"]).code, 0);
        assert!(dir.path().join("a/b").is_dir());
        assert_eq!(run(&mut ctx, &["touch", "a/b/new"]).code, 0);
        assert!(dir.path().join("a/b/new").is_file());
    }

    #[test]
    fn cat_files_and_stdin() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("one"), "1\n").unwrap();
        let mut ctx = context(dir.path());
        let ran = run_with_input(&mut ctx, &["cat", "one", "-"], b"piped\n");
        assert_eq!(ran.stdout, "1\npiped\n");
        let big = vec![b'x'; 200_000];
        let ran = run_with_input(&mut ctx, &["cat"], &big);
        assert_eq!(ran.stdout.len(), big.len());
        let missing = run(&mut ctx, &["cat", "missing"]);
        assert_eq!(missing.code, 1);
        assert_eq!(missing.stderr, "cat: missing: No such file or directory\n");
    }
}
