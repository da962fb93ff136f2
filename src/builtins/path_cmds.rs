use std::io::{self, Write};

use crate::context::ExecutionContext;

use super::BuiltinIo;

fn trim_trailing_slashes(name: &str) -> &str {
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() && !name.is_empty() {
        "/"
    } else {
        trimmed
    }
}

pub(super) fn base_name(name: &str, suffix: Option<&str>) -> String {
    let trimmed = trim_trailing_slashes(name);
    if trimmed == "/" {
        return "/".to_string();
    }
    let base = trimmed.rsplit('/').next().unwrap_or(trimmed);
    match suffix {
        Some(suffix) if !suffix.is_empty() && base != suffix => {
            base.strip_suffix(suffix).unwrap_or(base).to_string()
        }
        _ => base.to_string(),
    }
}

pub(super) fn dir_name(name: &str) -> String {
    let trimmed = trim_trailing_slashes(name);
    if trimmed == "/" {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        None => ".".to_string(),
        Some(idx) => {
            let parent = trim_trailing_slashes(&trimmed[..idx]);
            if parent.is_empty() {
                "/".to_string()
            } else {
                parent.to_string()
            }
        }
    }
}

pub(super) fn basename(_ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    match argv.len() {
        1 => Ok(io.fail("basename", "missing operand")),
        2 | 3 => {
            let base = base_name(&argv[1], argv.get(2).map(String::as_str));
            writeln!(io.stdout, "{base}")?;
            Ok(0)
        }
        _ => Ok(io.fail("basename", format!("extra operand '{}'", argv[3]))),
    }
}

pub(super) fn dirname(_ctx: &mut ExecutionContext, argv: &[String], io: &mut BuiltinIo) -> io::Result<i32> {
    if argv.len() < 2 {
        return Ok(io.fail("dirname", "missing operand"));
    }
    for name in &argv[1..] {
        writeln!(io.stdout, "{}", dir_name(name))?;
    }
    Ok(0)
}
