//! Child process description, spawning, and execution results

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use log::debug;
use serde::{Deserialize, Serialize};

use super::mode::{ExecutionMode, Wiring};
use super::pump::{PumpReport, StreamKind};
use crate::errors::{Result, RunnerError};
use crate::utils;

/// What to run: executable, arguments, and where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSpec {
    /// Program to execute, resolved through `PATH` when it has no slash
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Environment overrides
    pub env: BTreeMap<String, String>,
    /// Working directory, relative to the supervisor root unless absolute
    pub current_dir: Option<PathBuf>,
    /// Whether the child starts from the parent environment
    pub inherit_env: bool,
}

impl Default for ProcessSpec {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            current_dir: None,
            inherit_env: true,
        }
    }
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    /// Parse a spec from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let spec: Self = serde_json::from_str(json)
            .map_err(|e| RunnerError::InvalidConfig(format!("Invalid process spec: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "Program cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Space-joined command line, for diagnostics only
    pub fn command_line(&self) -> String {
        utils::command_line(&self.program, &self.args)
    }

    /// Directory the child runs in when launched under `root`
    pub fn working_dir(&self, root: &Path) -> PathBuf {
        match &self.current_dir {
            Some(dir) => root.join(dir),
            None => root.to_path_buf(),
        }
    }

    /// Build the command with stdio set up for `wiring`
    pub fn command(&self, root: &Path, wiring: &Wiring) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(self.working_dir(root))
            .stdin(wiring.stdio(StreamKind::Stdin))
            .stdout(wiring.stdio(StreamKind::Stdout))
            .stderr(wiring.stdio(StreamKind::Stderr));

        if !self.inherit_env {
            command.env_clear();
        }
        command.envs(&self.env);
        command
    }

    /// Start the child. Failure here is fatal and no pumps exist yet.
    pub fn spawn(&self, root: &Path, wiring: &Wiring) -> Result<Child> {
        let child = self
            .command(root, wiring)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        debug!("Spawned '{}' as pid {}", self.program, child.id());
        Ok(child)
    }
}

/// Result of one supervised execution
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    /// Mode the child ran in
    pub mode: ExecutionMode,
    /// Process ID
    pub pid: u32,
    /// Exit code; `128 + signal` when killed by a signal
    pub exit_code: i32,
    /// Signal if killed
    pub signal: Option<i32>,
    /// Whether the configured timeout fired
    pub timed_out: bool,
    /// Whether the cancel token fired
    pub cancelled: bool,
    /// Wall clock time in milliseconds
    pub wall_time_ms: u64,
    /// One report per pump, in spawn order
    pub pumps: Vec<PumpReport>,
}

impl ExecutionResult {
    /// Exit code 0, no timeout, no cancellation
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }

    pub fn has_pump_errors(&self) -> bool {
        self.pumps.iter().any(|p| !p.is_ok())
    }

    pub fn pump(&self, stream: StreamKind) -> Option<&PumpReport> {
        self.pumps.iter().find(|p| p.stream == stream)
    }

    /// Bytes delivered for `stream`, zero when it had no pump
    pub fn bytes_copied(&self, stream: StreamKind) -> u64 {
        self.pump(stream).map_or(0, |p| p.bytes_copied)
    }

    /// Convert to Result, returning the first pump failure as an error
    pub fn check_pumps(&self) -> Result<&ExecutionResult> {
        match self.pumps.iter().find_map(|p| p.error.as_ref().map(|e| (p.stream, e))) {
            Some((stream, err)) => Err(RunnerError::Pump {
                stream,
                source: std::io::Error::new(err.source.kind(), err.to_string()),
            }),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_spec_default() {
        let spec = ProcessSpec::default();
        assert!(spec.program.is_empty());
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
        assert!(spec.current_dir.is_none());
        assert!(spec.inherit_env);
    }

    #[test]
    fn test_process_spec_builder() {
        let spec = ProcessSpec::new("echo")
            .arg("hello")
            .args(["big", "world"])
            .env("LANG", "C")
            .current_dir("sub");

        assert_eq!(spec.program, "echo");
        assert_eq!(spec.args, vec!["hello", "big", "world"]);
        assert_eq!(spec.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(spec.current_dir, Some(PathBuf::from("sub")));
    }

    #[test]
    fn command_line_is_space_joined() {
        let spec = ProcessSpec::new("/usr/bin/sort").args(["-r", "-u"]);
        assert_eq!(spec.command_line(), "/usr/bin/sort -r -u");
    }

    #[test]
    fn working_dir_joins_relative_dirs() {
        let root = Path::new("/srv/work");
        assert_eq!(ProcessSpec::new("x").working_dir(root), root);
        assert_eq!(
            ProcessSpec::new("x").current_dir("batch").working_dir(root),
            Path::new("/srv/work/batch")
        );
        assert_eq!(
            ProcessSpec::new("x").current_dir("/tmp").working_dir(root),
            Path::new("/tmp")
        );
    }

    #[test]
    fn empty_program_is_rejected() {
        assert!(ProcessSpec::new("  ").validate().is_err());
    }

    #[test]
    fn from_json_fills_defaults() {
        let spec = ProcessSpec::from_json(r#"{"program": "wc", "args": ["-l"]}"#).unwrap();
        assert_eq!(spec.program, "wc");
        assert_eq!(spec.args, vec!["-l"]);
        assert!(spec.inherit_env);
    }

    #[test]
    fn from_json_reports_bad_input() {
        let err = ProcessSpec::from_json("{not json").unwrap_err();
        assert!(err.to_string().contains("Invalid process spec"));

        let err = ProcessSpec::from_json(r#"{"args": ["-l"]}"#).unwrap_err();
        assert!(err.to_string().contains("Program cannot be empty"));
    }

    #[test]
    fn spawn_failure_names_program() {
        let wiring = ExecutionMode::Logging.wiring();
        let err = ProcessSpec::new("/definitely/not/a/binary")
            .spawn(Path::new("/"), &wiring)
            .unwrap_err();
        assert!(matches!(
            err,
            RunnerError::Spawn { ref program, .. } if program == "/definitely/not/a/binary"
        ));
    }

    #[test]
    fn spawn_failure_for_missing_working_dir() {
        let wiring = ExecutionMode::Logging.wiring();
        let err = ProcessSpec::new("true")
            .current_dir("/definitely/not/a/dir")
            .spawn(Path::new("/"), &wiring)
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    fn result_with(pumps: Vec<PumpReport>) -> ExecutionResult {
        ExecutionResult {
            mode: ExecutionMode::Capture,
            pid: 1,
            exit_code: 0,
            signal: None,
            timed_out: false,
            cancelled: false,
            wall_time_ms: 5,
            pumps,
        }
    }

    #[test]
    fn clean_result_passes_pump_check() {
        let result = result_with(Vec::new());
        assert!(result.success());
        assert!(!result.has_pump_errors());
        assert!(result.check_pumps().is_ok());
        assert_eq!(result.bytes_copied(StreamKind::Stdout), 0);
    }

    #[test]
    fn pump_failure_surfaces_through_check() {
        let result = result_with(vec![PumpReport::panicked(StreamKind::Stderr)]);
        assert!(result.has_pump_errors());
        let err = result.check_pumps().unwrap_err();
        assert!(matches!(err, RunnerError::Pump { stream: StreamKind::Stderr, .. }));
    }

    #[test]
    fn timeout_is_not_success() {
        let mut result = result_with(Vec::new());
        result.timed_out = true;
        assert!(!result.success());
    }
}
