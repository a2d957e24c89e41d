//! Execution layer: stream pumps, I/O mode wiring, and child processes
//!
//! # Features
//!
//! - **Pumps**: one thread per stream, copying in fixed-size chunks
//! - **Modes**: logging, capture, and interactive stream wiring
//! - **Process specs**: program, arguments, environment, working directory
//! - **Cancellation**: a shared token checked by supervisors and pumps
//! - **Feeding**: detached readers for owned input sources
//!
//! # Examples
//!
//! ```
//! use procrun::execution::{Pump, StreamKind};
//! use std::io::Cursor;
//!
//! let mut sink = Vec::new();
//! let report = Pump::new(StreamKind::Stdout, Cursor::new(b"hello".to_vec()), &mut sink).run();
//! assert_eq!(report.bytes_copied, 5);
//! assert_eq!(sink, b"hello");
//! ```

pub mod cancel;
pub mod feed;
pub mod mode;
pub mod process;
pub mod pump;

pub use cancel::CancelToken;
pub use feed::FeedReader;
pub use mode::{Attachment, Console, Endpoint, ExecutionMode, Wiring};
pub use process::{ExecutionResult, ProcessSpec};
pub use pump::{
    ClosePolicy, DEFAULT_BUFFER_SIZE, Drained, Pump, PumpError, PumpErrorKind, PumpReport,
    SinkFailure, StreamKind,
};
