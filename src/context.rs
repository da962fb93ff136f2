//! Per-invocation shell state.
//!
//! An `ExecutionContext` replaces the process-wide working directory and
//! environment of a conventional shell. Every invocation owns exactly one;
//! background chains, builtin pipeline stages and command substitutions run
//! against a fork so nothing they do leaks back.
use std::collections::BTreeMap;
use std::env;
use std::io;
use std::path::{Path, PathBuf};

use crate::execution::cancel::CancelToken;
use crate::execution::stdio::{Input, Output};

/// Environment variables with unique keys.
///
/// Keys compare case-insensitively on Windows and exactly elsewhere; the
/// spelling of the first insertion is kept for child processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvMap {
    vars: BTreeMap<String, (String, String)>,
}

fn normalize_key(key: &str) -> String {
    if cfg!(windows) {
        key.to_ascii_uppercase()
    } else {
        key.to_string()
    }
}

impl EnvMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the host process environment.
    pub fn from_process() -> Self {
        env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(&normalize_key(key)).map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.get_mut(&normalize_key(&key)) {
            Some(entry) => entry.1 = value,
            None => {
                self.vars.insert(normalize_key(&key), (key, value));
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(&normalize_key(key)).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(&normalize_key(key))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.values().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = EnvMap::new();
        map.extend(iter);
        map
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for EnvMap {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}

/// Mutable state of one invocation.
#[derive(Debug)]
pub struct ExecutionContext {
    pub cwd: PathBuf,
    /// Directory before the last successful `cd`, for `cd -`.
    pub prev_cwd: Option<PathBuf>,
    pub env: EnvMap,
    pub stdin: Input,
    pub stdout: Output,
    pub stderr: Output,
    /// Captured output is discarded instead of returned.
    pub quiet: bool,
    /// A non-zero final status resolves instead of failing.
    pub nothrow: bool,
    pub pipefail: bool,
    /// Status of the most recent pipeline, read by `$?`.
    pub last_status: i32,
    /// Signal that ended the most recent pipeline, if any.
    pub last_signal: Option<String>,
    /// Set by the `exit` builtin; stops the rest of the list.
    pub exit_requested: Option<i32>,
    pub cancel: CancelToken,
}

impl ExecutionContext {
    pub fn new(cwd: PathBuf, env: EnvMap) -> Self {
        Self {
            cwd,
            prev_cwd: None,
            env,
            stdin: Input::Null,
            stdout: Output::Inherit,
            stderr: Output::Inherit,
            quiet: false,
            nothrow: false,
            pipefail: false,
            last_status: 0,
            last_signal: None,
            exit_requested: None,
            cancel: CancelToken::new(),
        }
    }

    /// Independent copy sharing only the cancellation token.
    pub fn fork(&self) -> io::Result<Self> {
        Ok(Self {
            cwd: self.cwd.clone(),
            prev_cwd: self.prev_cwd.clone(),
            env: self.env.clone(),
            stdin: self.stdin.try_clone()?,
            stdout: self.stdout.try_clone()?,
            stderr: self.stderr.try_clone()?,
            quiet: self.quiet,
            nothrow: self.nothrow,
            pipefail: self.pipefail,
            last_status: self.last_status,
            last_signal: None,
            exit_requested: None,
            cancel: self.cancel.clone(),
        })
    }

    /// Resolve `path` against the context working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    pub fn home_dir(&self) -> Option<String> {
        let home = if cfg!(windows) {
            self.env.get("USERPROFILE").or_else(|| self.env.get("HOME"))
        } else {
            self.env.get("HOME")
        };
        home.filter(|h| !h.is_empty()).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_map_keeps_unique_keys() {
        let mut env = EnvMap::new();
        env.set("PATH", "/bin");
        env.set("PATH", "/usr/bin");
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("PATH"), Some("/usr/bin"));
        assert_eq!(env.remove("PATH").as_deref(), Some("/usr/bin"));
        assert!(env.is_empty());
    }

    #[cfg(windows)]
    #[test]
    fn env_map_is_case_insensitive_on_windows() {
        let mut env = EnvMap::new();
        env.set("Path", "C:\\bin");
        env.set("PATH", "C:\\tools");
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("path"), Some("C:\\tools"));
        assert_eq!(env.iter().next().map(|(k, _)| k), Some("Path"));
    }

    #[cfg(unix)]
    #[test]
    fn env_map_is_case_sensitive_on_unix() {
        let env: EnvMap = [("a", "1"), ("A", "2")].into_iter().collect();
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("a"), Some("1"));
    }

    #[test]
    fn fork_is_independent() {
        let mut ctx = ExecutionContext::new(PathBuf::from("/"), EnvMap::new());
        ctx.env.set("X", "1");
        let mut forked = ctx.fork().unwrap();
        forked.env.set("X", "2");
        forked.cwd = PathBuf::from("/tmp");
        assert_eq!(ctx.env.get("X"), Some("1"));
        assert_eq!(ctx.cwd, PathBuf::from("/"));
    }

    #[test]
    fn resolve_joins_relative_paths() {
        let ctx = ExecutionContext::new(PathBuf::from("/work"), EnvMap::new());
        assert_eq!(ctx.resolve("a/b"), PathBuf::from("/work/a/b"));
        #[cfg(unix)]
        assert_eq!(ctx.resolve("/etc"), PathBuf::from("/etc"));
    }
}
