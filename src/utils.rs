//! Utility functions for process execution

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Render a program and its arguments as one space-joined line
pub fn command_line<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg.as_ref());
    }
    line
}

/// Map an exit status to a shell-style exit code plus the terminating signal.
///
/// A child killed by a signal reports `128 + signal`.
pub fn exit_code(status: ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    match status.signal() {
        Some(signal) => (128 + signal, Some(signal)),
        None => (-1, None),
    }
}

/// Milliseconds in a duration, saturating at `u64::MAX`
pub fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
