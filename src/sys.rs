//! Platform-specific process plumbing.
//!
//! The executor only talks to the functions re-exported here; everything
//! that differs between POSIX and Windows lives in the submodules.
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub(crate) use unix::{exit_info, is_executable, program_candidates, terminate};
#[cfg(windows)]
pub(crate) use windows::{exit_info, is_executable, program_candidates, terminate};
