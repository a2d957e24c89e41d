//! procrun: external process execution with concurrent stream pumping
//!
//! Launches one child process per call, attaches one pump thread per
//! standard stream, and returns only after the child has exited and every
//! pump has delivered its last byte.
//!
//! # Modules
//!
//! - **execution**: Stream pumps, I/O modes, process specs, cancellation
//! - **supervisor**: Child lifecycle, timeouts, and the public execute calls
//! - **errors**: Error type and `Result` alias
//! - **utils**: Command-line rendering and exit status decoding
//!
//! # Example
//!
//! ```no_run
//! use procrun::{ProcessSpec, SupervisorBuilder};
//! use std::time::Duration;
//!
//! let supervisor = SupervisorBuilder::new("/tmp")
//!     .timeout(Duration::from_secs(30))
//!     .build()?;
//!
//! let mut output = Vec::new();
//! let result = supervisor.execute_capture(&ProcessSpec::new("ls").arg("-l"), &mut output)?;
//! println!("Exit code: {}", result.exit_code);
//! # Ok::<(), procrun::RunnerError>(())
//! ```

pub mod errors;
pub mod execution;
pub mod supervisor;
pub mod utils;

pub use errors::{Result, RunnerError};
pub use execution::{
    CancelToken, ClosePolicy, Console, ExecutionMode, ExecutionResult, ProcessSpec, Pump,
    PumpReport, StreamKind,
};
pub use supervisor::{Phase, ProcessSupervisor, SupervisorBuilder, SupervisorConfig};
