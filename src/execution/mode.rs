//! I/O mode selection
//!
//! Each public entry point of the supervisor maps to one [`ExecutionMode`],
//! and each mode maps to a fixed [`Wiring`]: where every standard stream of
//! the child is connected and what the pump serving it does on completion.
//!
//! | mode        | stdin                | stdout             | stderr         |
//! |-------------|----------------------|--------------------|----------------|
//! | logging     | null                 | console, close     | console, close |
//! | capture     | null                 | caller sink, leave | console, leave |
//! | interactive | caller source, close | caller sink, leave | console, leave |

use std::fmt;
use std::io::{self, Write};
use std::process::Stdio;

use serde::Serialize;

use super::pump::{ClosePolicy, StreamKind};

/// How the supervisor wires a child's standard streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Passthrough: child output goes to the console.
    Logging,
    /// Child stdout goes to a caller-supplied sink.
    Capture,
    /// Caller source feeds child stdin, child stdout goes to a caller sink.
    Interactive,
}

/// Where one child stream is connected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Not piped; the child gets `/dev/null`.
    Null,
    /// The console's standard output or standard error.
    Console,
    /// A source or sink supplied by the caller.
    Caller,
}

/// Endpoint plus the close policy of the pump serving it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attachment {
    pub endpoint: Endpoint,
    pub close: ClosePolicy,
}

impl Attachment {
    const fn new(endpoint: Endpoint, close: ClosePolicy) -> Self {
        Self { endpoint, close }
    }

    const fn null() -> Self {
        Self::new(Endpoint::Null, ClosePolicy::Close)
    }

    pub fn is_pumped(&self) -> bool {
        self.endpoint != Endpoint::Null
    }
}

/// Full stream wiring for one execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wiring {
    pub stdin: Attachment,
    pub stdout: Attachment,
    pub stderr: Attachment,
}

impl Wiring {
    pub fn attachment(&self, stream: StreamKind) -> Attachment {
        match stream {
            StreamKind::Stdin => self.stdin,
            StreamKind::Stdout => self.stdout,
            StreamKind::Stderr => self.stderr,
        }
    }

    /// Stdio configuration for spawning a child with this wiring
    pub fn stdio(&self, stream: StreamKind) -> Stdio {
        if self.attachment(stream).is_pumped() {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    }
}

impl ExecutionMode {
    pub const fn wiring(self) -> Wiring {
        match self {
            ExecutionMode::Logging => Wiring {
                stdin: Attachment::null(),
                stdout: Attachment::new(Endpoint::Console, ClosePolicy::Close),
                stderr: Attachment::new(Endpoint::Console, ClosePolicy::Close),
            },
            ExecutionMode::Capture => Wiring {
                stdin: Attachment::null(),
                stdout: Attachment::new(Endpoint::Caller, ClosePolicy::Leave),
                stderr: Attachment::new(Endpoint::Console, ClosePolicy::Leave),
            },
            ExecutionMode::Interactive => Wiring {
                stdin: Attachment::new(Endpoint::Caller, ClosePolicy::Close),
                stdout: Attachment::new(Endpoint::Caller, ClosePolicy::Leave),
                stderr: Attachment::new(Endpoint::Console, ClosePolicy::Leave),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Logging => "logging",
            ExecutionMode::Capture => "capture",
            ExecutionMode::Interactive => "interactive",
        }
    }

    pub fn all() -> [ExecutionMode; 3] {
        [
            ExecutionMode::Logging,
            ExecutionMode::Capture,
            ExecutionMode::Interactive,
        ]
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target for console-bound streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Console {
    /// The calling process's own stdout and stderr.
    #[default]
    Inherit,
    /// Drained and discarded.
    Null,
}

impl Console {
    /// Writer standing in for standard output. Dropping it never closes fd 1.
    pub fn stdout(&self) -> Box<dyn Write + Send> {
        match self {
            Console::Inherit => Box::new(io::stdout()),
            Console::Null => Box::new(io::sink()),
        }
    }

    /// Writer standing in for standard error. Dropping it never closes fd 2.
    pub fn stderr(&self) -> Box<dyn Write + Send> {
        match self {
            Console::Inherit => Box::new(io::stderr()),
            Console::Null => Box::new(io::sink()),
        }
    }

    pub fn for_stream(&self, stream: StreamKind) -> Box<dyn Write + Send> {
        match stream {
            StreamKind::Stderr => self.stderr(),
            _ => self.stdout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_mode_drains_both_outputs() {
        for mode in ExecutionMode::all() {
            let wiring = mode.wiring();
            assert!(wiring.stdout.is_pumped(), "{} leaves stdout undrained", mode);
            assert!(wiring.stderr.is_pumped(), "{} leaves stderr undrained", mode);
        }
    }

    #[test]
    fn logging_mode_closes_console_pumps() {
        let wiring = ExecutionMode::Logging.wiring();
        assert_eq!(wiring.stdin.endpoint, Endpoint::Null);
        assert_eq!(wiring.stdout.endpoint, Endpoint::Console);
        assert_eq!(wiring.stdout.close, ClosePolicy::Close);
        assert_eq!(wiring.stderr.close, ClosePolicy::Close);
    }

    #[test]
    fn capture_mode_leaves_caller_sink_open() {
        let wiring = ExecutionMode::Capture.wiring();
        assert_eq!(wiring.stdout, Attachment::new(Endpoint::Caller, ClosePolicy::Leave));
        assert_eq!(wiring.stderr, Attachment::new(Endpoint::Console, ClosePolicy::Leave));
        assert!(!wiring.stdin.is_pumped());
    }

    #[test]
    fn interactive_mode_closes_child_stdin_only() {
        let wiring = ExecutionMode::Interactive.wiring();
        assert_eq!(wiring.stdin, Attachment::new(Endpoint::Caller, ClosePolicy::Close));
        assert_eq!(wiring.stdout.close, ClosePolicy::Leave);
        assert_eq!(wiring.stderr.close, ClosePolicy::Leave);
    }

    #[test]
    fn only_interactive_pipes_stdin() {
        assert_eq!(
            ExecutionMode::Interactive.wiring().attachment(StreamKind::Stdin).endpoint,
            Endpoint::Caller
        );
        assert!(!ExecutionMode::Capture.wiring().attachment(StreamKind::Stdin).is_pumped());
    }

    #[test]
    fn null_console_swallows_writes() {
        let mut out = Console::Null.stdout();
        out.write_all(b"ignored").unwrap();
        out.flush().unwrap();
    }

    #[test]
    fn mode_display_names() {
        assert_eq!(ExecutionMode::Capture.to_string(), "capture");
        assert_eq!(
            serde_json::to_string(&ExecutionMode::Interactive).unwrap(),
            "\"interactive\""
        );
    }
}
