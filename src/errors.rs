//! Error types for process execution

use std::io;
use thiserror::Error;

use crate::execution::StreamKind;

/// Result type for process execution
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while launching or supervising a child process
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Pump for {stream} failed: {source}")]
    Pump {
        stream: StreamKind,
        #[source]
        source: io::Error,
    },

    #[error("Waiting for child failed: {0}")]
    Wait(#[source] io::Error),

    #[error("Signal delivery failed: {0}")]
    Signal(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Execution cancelled")]
    Cancelled,
}
