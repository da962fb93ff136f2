//! Embedded shell engine driven by `$`-style templates.
//!
//! A template is literal script text with host values spliced in. Values
//! never pass through the tokenizer, so `sh!("echo {}", name)` passes
//! `name` as one argument whatever it contains.
//!
//! ```no_run
//! use dollar_shell::{sh, Shell};
//!
//! let file = "notes with spaces.txt";
//! let output = sh!("cat {} | wc -l", file)?.run()?;
//! println!("{}", output.text().trim());
//!
//! let branch = Shell::new().cmd("git rev-parse --abbrev-ref HEAD")?.text()?;
//! # let _ = branch;
//! # Ok::<(), dollar_shell::ShellError>(())
//! ```
//!
//! Each invocation runs against its own working directory and environment;
//! `cd` and `export`-style assignments never touch the host process.

pub mod builtins;
pub mod context;
pub mod error;
pub mod execution;
pub mod expansion;
pub mod parse;
pub mod shell;
mod sys;
pub mod value;

pub use context::{EnvMap, ExecutionContext};
pub use error::{ErrorKind, ParseErrorKind, ShellError, SpawnErrorKind};
pub use execution::cancel::CancelToken;
pub use shell::{Captured, Lines, OutputMode, Shell, ShellOutput, ShellPromise, ShellTask};
pub use value::{escape, RawHandle, ShellValue, Template};

/// Build a template from a format string and values, then parse it with a
/// fresh [`Shell`].
///
/// Each `{}` in the format string takes the next value; `{{` and `}}` are
/// literal braces. Evaluates to `Result<ShellPromise, ShellError>`.
#[macro_export]
macro_rules! sh {
    ($source:expr $(, $value:expr)* $(,)?) => {
        $crate::Template::format($source, vec![$($crate::ShellValue::from($value)),*])
            .and_then(|template| $crate::Shell::new().cmd(template))
    };
}
