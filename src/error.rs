//! Error types and reporting for the shell engine.
//!
//! Every failure surfaced to the host is a `ShellError`, which carries:
//! - an error kind (parse, spawn, non-zero exit, cancellation, usage, io)
//! - a human-readable message
//! - optional context about what input caused the error
//! - an optional character position into the template source
//! - the captured output, for failures that happen after execution began

use std::fmt;
use std::io;

use thiserror::Error;

use crate::shell::ShellOutput;

/// Syntax failures, raised before any process is spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unterminated quote")]
    UnterminatedQuote,
    #[error("unterminated expansion")]
    UnterminatedExpansion,
    #[error("unexpected token")]
    UnexpectedToken,
    #[error("empty command")]
    EmptyCommand,
}

/// Failures to start a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpawnErrorKind {
    #[error("program not found")]
    ProgramNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("spawn failed")]
    Other,
}

/// Categorized error types for better diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Syntax error during lexing/parsing
    Parse(ParseErrorKind),
    /// A stage could not be started
    Spawn(SpawnErrorKind),
    /// The script finished with a non-zero status and the policy is to throw
    NonZeroExit,
    /// The invocation was aborted or timed out
    Cancelled,
    /// The API was used incorrectly
    Usage,
    /// Any other I/O failure while wiring or draining stages
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Parse(kind) => write!(f, "Parse error ({kind})"),
            ErrorKind::Spawn(kind) => write!(f, "Spawn error ({kind})"),
            ErrorKind::NonZeroExit => write!(f, "Non-zero exit"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
            ErrorKind::Usage => write!(f, "Usage error"),
            ErrorKind::Io => write!(f, "I/O error"),
        }
    }
}

/// Rich error type with context information
#[derive(Debug)]
pub struct ShellError {
    pub kind: ErrorKind,
    pub message: String,
    /// Additional context explaining what was being processed
    pub context: Option<String>,
    /// Character position in the template source where the error occurred
    pub position: Option<usize>,
    /// Output captured before the failure was detected
    pub output: Option<Box<ShellOutput>>,
}

impl ShellError {
    /// Create a new error with just the kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ShellError {
            kind,
            message: message.into(),
            context: None,
            position: None,
            output: None,
        }
    }

    pub fn parse(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse(kind), message)
    }

    pub fn spawn(kind: SpawnErrorKind, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Spawn(kind), message)
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub(crate) fn non_zero_exit(output: ShellOutput) -> Self {
        let mut message = format!("command failed with exit code {}", output.exit_code);
        if let Some(ref signal) = output.signal {
            message.push_str(&format!(" (signal {signal})"));
        }
        let mut err = Self::new(ErrorKind::NonZeroExit, message);
        err.output = Some(Box::new(output));
        err
    }

    pub(crate) fn cancelled(output: ShellOutput) -> Self {
        let mut err = Self::new(ErrorKind::Cancelled, "invocation was cancelled");
        err.output = Some(Box::new(output));
        err
    }

    /// Add context string (e.g., "Expected: cmd < filename")
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add character position in input where error occurred
    pub fn with_position(mut self, pos: usize) -> Self {
        self.position = Some(pos);
        self
    }

    pub fn parse_kind(&self) -> Option<ParseErrorKind> {
        match self.kind {
            ErrorKind::Parse(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn spawn_kind(&self) -> Option<SpawnErrorKind> {
        match self.kind {
            ErrorKind::Spawn(kind) => Some(kind),
            _ => None,
        }
    }

    /// Exit code of the failed invocation, if it ran far enough to have one.
    pub fn exit_code(&self) -> Option<i32> {
        self.output.as_ref().map(|output| output.exit_code)
    }

    pub fn signal(&self) -> Option<&str> {
        self.output.as_ref().and_then(|output| output.signal.as_deref())
    }

    pub fn stdout(&self) -> &[u8] {
        self.output
            .as_ref()
            .map(|output| output.stdout.as_bytes())
            .unwrap_or_default()
    }

    pub fn stderr(&self) -> &[u8] {
        self.output
            .as_ref()
            .map(|output| output.stderr.as_bytes())
            .unwrap_or_default()
    }

    /// Format error with a snippet of the input showing where the problem is
    pub fn display_with_input(&self, input: &str) -> String {
        let mut msg = format!("{}: {}", self.kind, self.message);

        if let Some(pos) = self.position {
            let chars: Vec<char> = input.chars().collect();
            if pos < chars.len() {
                // Show a snippet around the error position
                let start = pos.saturating_sub(15);
                let end = (pos + 15).min(chars.len());
                let snippet: String = chars[start..end].iter().collect();

                msg.push_str(&format!("\n  near: '{}'", snippet.replace('\n', "↵")));
                msg.push('\n');

                let offset = pos - start;
                msg.push_str(&format!("  {}{}", " ".repeat(offset + 9), "^"));
            } else {
                msg.push_str(&format!("\n  at position {} (end of input)", pos));
            }
        } else if let Some(context) = &self.context {
            msg.push_str(&format!("\n  hint: {}", context));
        }

        msg
    }

    /// Simplified display without input context
    pub fn display_simple(&self) -> String {
        let mut msg = format!("{}: {}", self.kind, self.message);
        if let Some(context) = &self.context {
            msg.push_str(&format!("\n  hint: {}", context));
        }
        msg
    }
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.display_simple())
    }
}

impl std::error::Error for ShellError {}

impl From<io::Error> for ShellError {
    fn from(err: io::Error) -> Self {
        ShellError::new(ErrorKind::Io, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_points_at_position() {
        let err = ShellError::parse(ParseErrorKind::UnterminatedQuote, "unterminated \" quote")
            .with_position(5);
        let rendered = err.display_with_input("echo \"abc");
        assert!(rendered.starts_with("Parse error (unterminated quote)"));
        assert!(rendered.contains("near: 'echo \"abc'"));
        assert!(rendered.ends_with('^'));
    }

    #[test]
    fn display_falls_back_to_hint() {
        let err = ShellError::parse(ParseErrorKind::UnexpectedToken, "unexpected `|`")
            .with_context("a pipe needs a command on both sides");
        assert_eq!(
            err.display_simple(),
            "Parse error (unexpected token): unexpected `|`\n  hint: a pipe needs a command on both sides"
        );
    }

    #[test]
    fn kind_accessors() {
        let err = ShellError::spawn(SpawnErrorKind::FileNotFound, "missing.txt: not found");
        assert_eq!(err.spawn_kind(), Some(SpawnErrorKind::FileNotFound));
        assert_eq!(err.parse_kind(), None);
        assert_eq!(err.exit_code(), None);
        assert!(err.stdout().is_empty());
    }
}
