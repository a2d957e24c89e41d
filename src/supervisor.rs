//! Process supervisor: launches one child per call and pumps its streams

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use crate::errors::{Result, RunnerError};
use crate::execution::cancel::CancelToken;
use crate::execution::feed;
use crate::execution::mode::{Console, Endpoint, ExecutionMode, Wiring};
use crate::execution::process::{ExecutionResult, ProcessSpec};
use crate::execution::pump::{DEFAULT_BUFFER_SIZE, Pump, PumpReport, SinkFailure, StreamKind};
use crate::utils;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Working directory every child starts in
    pub root: PathBuf,
    /// Pump copy buffer size in bytes
    pub buffer_size: usize,
    /// Kill the child once it has run this long
    pub timeout: Option<Duration>,
    /// Time between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// How often to check a timed or cancellable child
    pub poll_interval: Duration,
    /// Echo the command line to the console's stderr before spawning
    pub echo_command: bool,
    /// Target for console-bound streams
    pub console: Console,
    /// Fires to abort running and future executions
    pub cancel_token: Option<CancelToken>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: None,
            kill_grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            echo_command: true,
            console: Console::Inherit,
            cancel_token: None,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        self.validate_invariants()?;

        if !self.root.is_dir() {
            return Err(RunnerError::InvalidConfig(format!(
                "Root {} is not a directory",
                self.root.display()
            )));
        }

        Ok(())
    }

    fn validate_invariants(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(RunnerError::InvalidConfig(
                "Buffer size must be greater than zero".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(RunnerError::InvalidConfig(
                "Poll interval must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder pattern for supervisor creation
pub struct SupervisorBuilder {
    config: SupervisorConfig,
}

impl SupervisorBuilder {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            config: SupervisorConfig {
                root: root.as_ref().to_path_buf(),
                ..Default::default()
            },
        }
    }

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.config.buffer_size = bytes;
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.config.timeout = Some(duration);
        self
    }

    pub fn kill_grace(mut self, duration: Duration) -> Self {
        self.config.kill_grace = duration;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn echo_command(mut self, echo: bool) -> Self {
        self.config.echo_command = echo;
        self
    }

    pub fn console(mut self, console: Console) -> Self {
        self.config.console = console;
        self
    }

    /// Shorthand for [`Console::Null`]
    pub fn quiet(self) -> Self {
        self.console(Console::Null)
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.config.cancel_token = Some(token);
        self
    }

    pub fn build(self) -> Result<ProcessSupervisor> {
        self.config.validate()?;
        Ok(ProcessSupervisor {
            config: self.config,
        })
    }
}

/// Lifecycle of a single supervised invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Built,
    Started,
    Draining,
    ExitedAndDrained,
    Closed,
}

impl Phase {
    /// Successor phase; `Closed` is terminal.
    pub fn next(self) -> Phase {
        match self {
            Phase::Built => Phase::Started,
            Phase::Started => Phase::Draining,
            Phase::Draining => Phase::ExitedAndDrained,
            Phase::ExitedAndDrained | Phase::Closed => Phase::Closed,
        }
    }
}

/// Per-call bookkeeping. Phases only move forward one step at a time.
#[derive(Debug)]
pub(crate) struct Invocation {
    mode: ExecutionMode,
    pid: Option<u32>,
    phase: Phase,
}

impl Invocation {
    pub(crate) fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            pid: None,
            phase: Phase::Built,
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn advance(&mut self) {
        let next = self.phase.next();
        if next == self.phase {
            warn!("{} invocation already closed", self.mode);
            return;
        }
        trace!("{} invocation (pid {:?}): {:?} -> {:?}", self.mode, self.pid, self.phase, next);
        self.phase = next;
    }
}

/// How the wait for the child ended
struct Termination {
    status: ExitStatus,
    timed_out: bool,
    cancelled: bool,
}

impl Termination {
    fn exited(status: ExitStatus) -> Self {
        Self {
            status,
            timed_out: false,
            cancelled: false,
        }
    }
}

type BoxedPump<'a> = Pump<Box<dyn Read + Send + 'a>, Box<dyn Write + Send + 'a>>;

/// Where the stdin pump gets its bytes
enum Input<'a> {
    /// Read in place; a blocked read holds up the return of the call.
    Borrowed(&'a mut (dyn Read + Send)),
    /// Read by a detached feeder thread the call never waits for.
    Detached(Box<dyn Read + Send>),
}

/// Child streams taken out of the handle, one slot per stream
struct ChildStreams {
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ChildStreams {
    fn take(child: &mut Child) -> Self {
        Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        }
    }
}

/// Launches external processes under a fixed root and drains their streams
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    /// Supervisor with default settings rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        SupervisorBuilder::new(root).build()
    }

    pub fn builder(root: impl AsRef<Path>) -> SupervisorBuilder {
        SupervisorBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run `spec` with its output passed through to the console.
    ///
    /// Returns once the child has exited and both output pumps have drained.
    /// A nonzero exit is reported in the result, not as an error.
    pub fn execute(&self, spec: &ProcessSpec) -> Result<ExecutionResult> {
        let mode = ExecutionMode::Logging;
        let child = self.launch(spec, mode)?;
        self.supervise(child, mode, None, None)
    }

    /// Run `spec` with its stdout drained into `sink`.
    ///
    /// The sink is borrowed and stays open; stderr goes to the console.
    pub fn execute_capture<W>(&self, spec: &ProcessSpec, sink: &mut W) -> Result<ExecutionResult>
    where
        W: Write + Send,
    {
        let mode = ExecutionMode::Capture;
        let child = self.launch(spec, mode)?;
        self.supervise(child, mode, None, Some(sink))
    }

    /// Run `spec` as a filter: `source` feeds its stdin, its stdout drains
    /// into `sink`.
    ///
    /// Child stdin is closed once `source` reaches EOF so the child sees end
    /// of input. `source` and `sink` themselves are borrowed and stay open.
    ///
    /// Timeout and cancellation kill the child, but a read already blocked in
    /// `source` still has to return before this call can. For sources that
    /// may block indefinitely, such as a terminal, use
    /// [`execute_interactive_owned`](Self::execute_interactive_owned).
    pub fn execute_interactive<R, W>(
        &self,
        spec: &ProcessSpec,
        source: &mut R,
        sink: &mut W,
    ) -> Result<ExecutionResult>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let mode = ExecutionMode::Interactive;
        let child = self.launch(spec, mode)?;
        self.supervise(child, mode, Some(Input::Borrowed(source)), Some(sink))
    }

    /// Like [`execute_interactive`](Self::execute_interactive), but takes
    /// ownership of `source` and reads it on a detached thread.
    ///
    /// The call returns as soon as the child has exited and its outputs are
    /// drained, even while a read from `source` is still pending. The source
    /// is dropped by the feeder thread once that read returns.
    pub fn execute_interactive_owned<R, W>(
        &self,
        spec: &ProcessSpec,
        source: R,
        sink: &mut W,
    ) -> Result<ExecutionResult>
    where
        R: Read + Send + 'static,
        W: Write + Send,
    {
        let mode = ExecutionMode::Interactive;
        let child = self.launch(spec, mode)?;
        let input = Input::Detached(Box::new(source));
        self.supervise(child, mode, Some(input), Some(sink))
    }

    /// Supervise an already-started child in logging mode.
    ///
    /// Streams that were not piped belong to the caller and get no pump.
    pub fn attach(&self, child: Child) -> Result<ExecutionResult> {
        self.supervise(child, ExecutionMode::Logging, None, None)
    }

    /// Supervise an already-started child in capture mode.
    pub fn attach_capture<W>(&self, child: Child, sink: &mut W) -> Result<ExecutionResult>
    where
        W: Write + Send,
    {
        self.supervise(child, ExecutionMode::Capture, None, Some(sink))
    }

    /// Supervise an already-started child in interactive mode. The child's
    /// stdin must be piped.
    pub fn attach_interactive<R, W>(
        &self,
        child: Child,
        source: &mut R,
        sink: &mut W,
    ) -> Result<ExecutionResult>
    where
        R: Read + Send,
        W: Write + Send,
    {
        let input = Input::Borrowed(source);
        self.supervise(child, ExecutionMode::Interactive, Some(input), Some(sink))
    }

    /// Supervise an already-started child in interactive mode, reading an
    /// owned `source` on a detached thread.
    pub fn attach_interactive_owned<R, W>(
        &self,
        child: Child,
        source: R,
        sink: &mut W,
    ) -> Result<ExecutionResult>
    where
        R: Read + Send + 'static,
        W: Write + Send,
    {
        let input = Input::Detached(Box::new(source));
        self.supervise(child, ExecutionMode::Interactive, Some(input), Some(sink))
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        match &self.config.cancel_token {
            Some(token) if token.is_cancelled() => Err(RunnerError::Cancelled),
            _ => Ok(()),
        }
    }

    fn launch(&self, spec: &ProcessSpec, mode: ExecutionMode) -> Result<Child> {
        self.ensure_not_cancelled()?;
        spec.validate()?;

        let command_line = spec.command_line();
        info!("Executing ({}): {}", mode, command_line);
        if self.config.echo_command {
            self.echo(&command_line);
        }

        spec.spawn(&self.config.root, &mode.wiring())
    }

    fn echo(&self, command_line: &str) {
        let mut err = self.config.console.stderr();
        if let Err(e) = writeln!(err, "{}", command_line).and_then(|()| err.flush()) {
            warn!("Failed to echo command line: {}", e);
        }
    }

    fn supervise<'a>(
        &self,
        mut child: Child,
        mode: ExecutionMode,
        input: Option<Input<'a>>,
        sink: Option<&'a mut (dyn Write + Send)>,
    ) -> Result<ExecutionResult> {
        let mut invocation = Invocation::new(mode);
        invocation.pid = Some(child.id());
        invocation.advance();

        let pid = child.id();
        let started = Instant::now();
        let input_done = CancelToken::new();

        let streams = ChildStreams::take(&mut child);
        let pumps = match self.plan_pumps(mode.wiring(), streams, input, sink, &input_done) {
            Ok(pumps) => pumps,
            Err(e) => {
                self.abandon(&mut child);
                return Err(e);
            }
        };

        let (termination, reports) = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(pumps.len());
            let mut spawn_error = None;

            for pump in pumps {
                let stream = pump.stream();
                match pump.spawn_scoped(scope) {
                    Ok(handle) => handles.push((stream, handle)),
                    Err(e) => {
                        spawn_error = Some(e);
                        break;
                    }
                }
            }
            invocation.advance();

            let termination = match spawn_error {
                Some(e) => Err(RunnerError::Io(e)),
                None => self.wait(&mut child, started),
            };

            // Output pumps only finish once the child's pipes close.
            if termination.is_err() {
                self.abandon(&mut child);
            }
            input_done.cancel();

            let reports: Vec<PumpReport> = handles
                .into_iter()
                .map(|(stream, handle)| {
                    handle.join().unwrap_or_else(|_| PumpReport::panicked(stream))
                })
                .collect();

            (termination, reports)
        });
        invocation.advance();

        for report in reports.iter().filter(|r| !r.is_ok()) {
            if let Some(err) = &report.error {
                warn!("pid {}: {} pump reported: {}", pid, report.stream, err);
            }
        }

        let termination = termination?;
        drop(child);
        invocation.advance();

        let (exit_code, signal) = utils::exit_code(termination.status);
        let wall_time_ms = utils::millis(started.elapsed());
        debug!("pid {} finished with exit code {} in {}ms", pid, exit_code, wall_time_ms);

        Ok(ExecutionResult {
            mode,
            pid,
            exit_code,
            signal,
            timed_out: termination.timed_out,
            cancelled: termination.cancelled,
            wall_time_ms,
            pumps: reports,
        })
    }

    /// Pair every piped child stream with its endpoint according to `wiring`
    fn plan_pumps<'a>(
        &self,
        wiring: Wiring,
        streams: ChildStreams,
        mut input: Option<Input<'a>>,
        mut sink: Option<&'a mut (dyn Write + Send)>,
        input_done: &CancelToken,
    ) -> Result<Vec<BoxedPump<'a>>> {
        let ChildStreams {
            stdin,
            stdout,
            stderr,
        } = streams;
        let mut pumps = Vec::with_capacity(3);

        let outputs: [(StreamKind, Option<Box<dyn Read + Send + 'a>>); 2] = [
            (
                StreamKind::Stdout,
                stdout.map(|s| Box::new(s) as Box<dyn Read + Send + 'a>),
            ),
            (
                StreamKind::Stderr,
                stderr.map(|s| Box::new(s) as Box<dyn Read + Send + 'a>),
            ),
        ];

        for (stream, pipe) in outputs {
            let Some(pipe) = pipe else {
                debug!("{} not piped, leaving it to the caller", stream);
                continue;
            };
            let attachment = wiring.attachment(stream);
            let target: Box<dyn Write + Send + 'a> = match attachment.endpoint {
                Endpoint::Caller => match sink.take() {
                    Some(sink) => Box::new(sink),
                    None => {
                        return Err(RunnerError::InvalidConfig(format!(
                            "{} mode needs a sink for {}",
                            wiring_name(&wiring),
                            stream
                        )));
                    }
                },
                // A piped output always gets drained, even where the mode
                // would not have piped it.
                Endpoint::Console | Endpoint::Null => self.config.console.for_stream(stream),
            };
            pumps.push(
                Pump::new(stream, pipe, target)
                    .close_policy(attachment.close)
                    .on_sink_error(SinkFailure::Discard)
                    .buffer_size(self.config.buffer_size),
            );
        }

        let attachment = wiring.stdin;
        match (attachment.endpoint, stdin) {
            (Endpoint::Caller, Some(stdin)) => {
                let source: Box<dyn Read + Send + 'a> = match input.take() {
                    Some(Input::Borrowed(source)) => Box::new(source),
                    Some(Input::Detached(source)) => Box::new(feed::spawn_feeder(
                        source,
                        self.config.buffer_size,
                        self.config.poll_interval,
                    )?),
                    None => {
                        return Err(RunnerError::InvalidConfig(
                            "Interactive mode needs an input source".to_string(),
                        ));
                    }
                };
                pumps.push(
                    Pump::new(
                        StreamKind::Stdin,
                        source,
                        Box::new(stdin) as Box<dyn Write + Send + 'a>,
                    )
                    .close_policy(attachment.close)
                    .on_sink_error(SinkFailure::Stop)
                    .buffer_size(self.config.buffer_size)
                    .stop_when(input_done.clone()),
                );
            }
            (Endpoint::Caller, None) => {
                return Err(RunnerError::InvalidConfig(
                    "Interactive mode requires a piped child stdin".to_string(),
                ));
            }
            (_, Some(stdin)) => {
                debug!("Closing piped stdin the mode does not feed");
                drop(stdin);
            }
            (_, None) => {}
        }

        Ok(pumps)
    }

    /// Block until the child exits, the deadline passes, or the token fires
    fn wait(&self, child: &mut Child, started: Instant) -> Result<Termination> {
        let deadline = self.config.timeout.map(|t| started + t);
        let token = self.config.cancel_token.as_ref();

        if deadline.is_none() && token.is_none() {
            let status = child.wait().map_err(RunnerError::Wait)?;
            return Ok(Termination::exited(status));
        }

        loop {
            if let Some(status) = child.try_wait().map_err(RunnerError::Wait)? {
                return Ok(Termination::exited(status));
            }

            if token.is_some_and(CancelToken::is_cancelled) {
                info!("Cancelling pid {}", child.id());
                let status = self.terminate(child)?;
                return Ok(Termination {
                    status,
                    timed_out: false,
                    cancelled: true,
                });
            }

            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("pid {} exceeded its timeout, terminating", child.id());
                let status = self.terminate(child)?;
                return Ok(Termination {
                    status,
                    timed_out: true,
                    cancelled: false,
                });
            }

            thread::sleep(self.config.poll_interval);
        }
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL and reap
    fn terminate(&self, child: &mut Child) -> Result<ExitStatus> {
        let pid = Pid::from_raw(child.id() as i32);

        kill(pid, Signal::SIGTERM)
            .map_err(|e| RunnerError::Signal(format!("SIGTERM to {}: {}", pid, e)))?;

        let grace_deadline = Instant::now() + self.config.kill_grace;
        while Instant::now() < grace_deadline {
            if let Some(status) = child.try_wait().map_err(RunnerError::Wait)? {
                return Ok(status);
            }
            thread::sleep(self.config.poll_interval);
        }

        if let Some(status) = child.try_wait().map_err(RunnerError::Wait)? {
            return Ok(status);
        }

        warn!("pid {} ignored SIGTERM, sending SIGKILL", pid);
        kill(pid, Signal::SIGKILL)
            .map_err(|e| RunnerError::Signal(format!("SIGKILL to {}: {}", pid, e)))?;
        child.wait().map_err(RunnerError::Wait)
    }

    /// Kill and reap a child on an error path so no pump is left waiting
    fn abandon(&self, child: &mut Child) {
        if let Err(e) = child.kill() {
            warn!("Failed to kill pid {}: {}", child.id(), e);
        }
        if let Err(e) = child.wait() {
            warn!("Failed to reap pid {}: {}", child.id(), e);
        }
    }
}

fn wiring_name(wiring: &Wiring) -> &'static str {
    ExecutionMode::all()
        .into_iter()
        .find(|mode| mode.wiring() == *wiring)
        .map_or("custom", |mode| mode.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_supervisor_config_default() {
        let config = SupervisorConfig::default();
        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(config.timeout.is_none());
        assert!(config.echo_command);
        assert_eq!(config.console, Console::Inherit);
    }

    #[test]
    fn test_config_rejects_zero_buffer() {
        let config = SupervisorConfig {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(config.validate_invariants().is_err());
    }

    #[test]
    fn test_config_rejects_zero_poll_interval() {
        let config = SupervisorConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate_invariants().is_err());
    }

    #[test]
    fn test_builder_rejects_missing_root() {
        let tmp = tempdir().unwrap();
        let result = SupervisorBuilder::new(tmp.path().join("missing")).build();
        assert!(matches!(result, Err(RunnerError::InvalidConfig(_))));
    }

    #[test]
    fn test_builder_rejects_file_root() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(SupervisorBuilder::new(&file).build().is_err());
    }

    #[test]
    fn test_builder_settings() {
        let tmp = tempdir().unwrap();
        let token = CancelToken::new();
        let supervisor = SupervisorBuilder::new(tmp.path())
            .buffer_size(512)
            .timeout(Duration::from_secs(3))
            .kill_grace(Duration::from_millis(100))
            .poll_interval(Duration::from_millis(5))
            .echo_command(false)
            .quiet()
            .cancel_token(token)
            .build()
            .unwrap();

        let config = supervisor.config();
        assert_eq!(supervisor.root(), tmp.path());
        assert_eq!(config.buffer_size, 512);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.kill_grace, Duration::from_millis(100));
        assert!(!config.echo_command);
        assert_eq!(config.console, Console::Null);
        assert!(config.cancel_token.is_some());
    }

    #[test]
    fn phases_advance_in_order() {
        let mut invocation = Invocation::new(ExecutionMode::Logging);
        let mut seen = vec![invocation.phase()];
        for _ in 0..4 {
            invocation.advance();
            seen.push(invocation.phase());
        }
        assert_eq!(
            seen,
            vec![
                Phase::Built,
                Phase::Started,
                Phase::Draining,
                Phase::ExitedAndDrained,
                Phase::Closed
            ]
        );
    }

    #[test]
    fn closed_is_terminal() {
        let mut invocation = Invocation::new(ExecutionMode::Capture);
        for _ in 0..10 {
            invocation.advance();
        }
        assert_eq!(invocation.phase(), Phase::Closed);
        assert_eq!(Phase::Closed.next(), Phase::Closed);
    }

    #[test]
    fn wiring_names_resolve() {
        assert_eq!(wiring_name(&ExecutionMode::Capture.wiring()), "capture");
    }

    #[test]
    fn cancelled_supervisor_refuses_to_spawn() {
        let tmp = tempdir().unwrap();
        let token = CancelToken::new();
        let supervisor = SupervisorBuilder::new(tmp.path())
            .quiet()
            .cancel_token(token.clone())
            .build()
            .unwrap();
        token.cancel();

        let marker = tmp.path().join("ran");
        let spec = ProcessSpec::new("touch").arg(marker.to_string_lossy().into_owned());
        let result = supervisor.execute(&spec);

        assert!(matches!(result, Err(RunnerError::Cancelled)));
        assert!(!marker.exists());
    }

    #[test]
    fn attach_interactive_without_piped_stdin_is_rejected() {
        let tmp = tempdir().unwrap();
        let supervisor = SupervisorBuilder::new(tmp.path()).quiet().build().unwrap();
        let child = std::process::Command::new("sleep")
            .arg("5")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .unwrap();

        let mut source = std::io::empty();
        let mut sink = Vec::new();
        let started = Instant::now();
        let result = supervisor.attach_interactive(child, &mut source, &mut sink);

        assert!(matches!(result, Err(RunnerError::InvalidConfig(_))));
        // The child is killed rather than waited out.
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
