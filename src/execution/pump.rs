//! Unidirectional byte pump between two streams
//!
//! A [`Pump`] reads its source into a fixed-size buffer and writes every chunk
//! to its sink until the source reports end-of-stream or an I/O error occurs.
//! Failures are recorded in the returned [`PumpReport`], never discarded.

use std::fmt;
use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle, Scope, ScopedJoinHandle};

use log::{debug, trace, warn};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use super::cancel::CancelToken;

/// Default copy buffer size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// One of the three standard streams of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdin => "stdin",
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a pump does with its two ends once the source is drained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Flush the sink, then drop (close) both ends.
    Close,
    /// Flush the sink and hand both ends back to the owner.
    Leave,
}

/// What a pump does when a write to its sink fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFailure {
    /// Stop copying immediately.
    Stop,
    /// Keep reading the source to EOF and throw the bytes away, so the
    /// producer on the other side of the source never blocks.
    Discard,
}

/// Which operation of the copy loop failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpErrorKind {
    Read,
    Write,
    Flush,
    Panicked,
}

impl fmt::Display for PumpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PumpErrorKind::Read => "read",
            PumpErrorKind::Write => "write",
            PumpErrorKind::Flush => "flush",
            PumpErrorKind::Panicked => "pump thread",
        };
        f.write_str(name)
    }
}

/// First I/O failure a pump ran into
#[derive(Debug, thiserror::Error)]
#[error("{kind} failed: {source}")]
pub struct PumpError {
    pub kind: PumpErrorKind,
    #[source]
    pub source: io::Error,
}

impl Serialize for PumpError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PumpError", 2)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("message", &self.source.to_string())?;
        state.end()
    }
}

/// Outcome of a single pump run
#[derive(Debug, Serialize)]
pub struct PumpReport {
    /// Stream this pump served
    pub stream: StreamKind,
    /// Bytes written to the sink
    pub bytes_copied: u64,
    /// Bytes read after the sink failed and thrown away
    pub bytes_discarded: u64,
    /// Whether the pump quit early because its stop token fired
    pub stopped: bool,
    /// First failure, if any
    pub error: Option<PumpError>,
}

impl PumpReport {
    fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            bytes_copied: 0,
            bytes_discarded: 0,
            stopped: false,
            error: None,
        }
    }

    /// Report for a pump whose thread panicked before it could report.
    pub(crate) fn panicked(stream: StreamKind) -> Self {
        let mut report = Self::new(stream);
        report.record(
            PumpErrorKind::Panicked,
            io::Error::other(format!("{} pump thread panicked", stream)),
        );
        report
    }

    /// True when the pump finished without any I/O failure
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Keeps the first failure only; later ones are consequences of it.
    fn record(&mut self, kind: PumpErrorKind, source: io::Error) {
        if self.error.is_none() {
            self.error = Some(PumpError { kind, source });
        }
    }
}

/// Report plus the ends a [`ClosePolicy::Leave`] pump hands back
#[derive(Debug)]
pub struct Drained<R, W> {
    pub report: PumpReport,
    pub ends: Option<(R, W)>,
}

/// Copy loop from `source` to `sink`
pub struct Pump<R, W> {
    stream: StreamKind,
    source: R,
    sink: W,
    close: ClosePolicy,
    on_sink_error: SinkFailure,
    buffer_size: usize,
    stop: Option<CancelToken>,
}

impl<R, W> fmt::Debug for Pump<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pump")
            .field("stream", &self.stream)
            .field("close", &self.close)
            .field("on_sink_error", &self.on_sink_error)
            .field("buffer_size", &self.buffer_size)
            .finish_non_exhaustive()
    }
}

impl<R: Read, W: Write> Pump<R, W> {
    /// Create a pump that closes both ends on completion and stops on the
    /// first sink failure.
    pub fn new(stream: StreamKind, source: R, sink: W) -> Self {
        Self {
            stream,
            source,
            sink,
            close: ClosePolicy::Close,
            on_sink_error: SinkFailure::Stop,
            buffer_size: DEFAULT_BUFFER_SIZE,
            stop: None,
        }
    }

    pub fn close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close = policy;
        self
    }

    pub fn on_sink_error(mut self, behavior: SinkFailure) -> Self {
        self.on_sink_error = behavior;
        self
    }

    /// Set the copy buffer size. Zero is bumped to one byte.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }

    /// Stop between chunks once `token` fires. A read already blocked in the
    /// source is not interrupted.
    pub fn stop_when(mut self, token: CancelToken) -> Self {
        self.stop = Some(token);
        self
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Run the copy loop on the current thread.
    pub fn run(self) -> PumpReport {
        self.drain().report
    }

    /// Run the copy loop on the current thread and apply the close policy.
    pub fn drain(self) -> Drained<R, W> {
        let Pump {
            stream,
            mut source,
            mut sink,
            close,
            on_sink_error,
            buffer_size,
            stop,
        } = self;

        let mut report = PumpReport::new(stream);
        let mut buf = vec![0u8; buffer_size];
        let mut sink_healthy = true;

        loop {
            if stop.as_ref().is_some_and(CancelToken::is_cancelled) {
                trace!("{} pump stopped by token", stream);
                report.stopped = true;
                break;
            }

            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    report.record(PumpErrorKind::Read, e);
                    break;
                }
            };

            if !sink_healthy {
                report.bytes_discarded += n as u64;
                continue;
            }

            match sink.write_all(&buf[..n]) {
                Ok(()) => report.bytes_copied += n as u64,
                Err(e) => {
                    report.record(PumpErrorKind::Write, e);
                    match on_sink_error {
                        SinkFailure::Stop => break,
                        SinkFailure::Discard => {
                            sink_healthy = false;
                            report.bytes_discarded += n as u64;
                        }
                    }
                }
            }
        }

        if sink_healthy {
            if let Err(e) = sink.flush() {
                report.record(PumpErrorKind::Flush, e);
            }
        }

        match &report.error {
            Some(err) => warn!("{} pump failed: {}", stream, err),
            None => debug!("{} pump drained {} bytes", stream, report.bytes_copied),
        }

        let ends = match close {
            ClosePolicy::Close => {
                drop(sink);
                drop(source);
                None
            }
            ClosePolicy::Leave => Some((source, sink)),
        };

        Drained { report, ends }
    }
}

impl<R, W> Pump<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    /// Run the pump on its own named thread.
    pub fn spawn(self) -> io::Result<JoinHandle<Drained<R, W>>> {
        thread::Builder::new()
            .name(format!("pump-{}", self.stream))
            .spawn(move || self.drain())
    }
}

impl<R, W> Pump<R, W>
where
    R: Read + Send,
    W: Write + Send,
{
    /// Run the pump on a named thread joined by `scope`, which lets it borrow
    /// caller-owned ends.
    pub fn spawn_scoped<'scope, 'env>(
        self,
        scope: &'scope Scope<'scope, 'env>,
    ) -> io::Result<ScopedJoinHandle<'scope, PumpReport>>
    where
        R: 'scope,
        W: 'scope,
    {
        thread::Builder::new()
            .name(format!("pump-{}", self.stream))
            .spawn_scoped(scope, move || self.run())
    }
}
