//! Core value types shared by the runner, the multiplexer and their consumers.

use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

/// Exit code reported when a command never ran to completion.
pub const NOT_RUN_EXIT_CODE: i32 = -1;

/// A single shell command invocation.
///
/// Unset working directory and timeout fall back to the engine defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            timeout: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Timeout for this invocation, or `default` when none was set.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }

    /// Working directory for this invocation, or `default` when none was set.
    pub fn working_dir_or<'a>(&'a self, default: &'a Path) -> &'a Path {
        self.working_dir.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)
    }
}

/// Which pipe an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// Why a session ended without a real exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected by the safety filter; nothing was spawned.
    Blocked,
    /// No output and no exit within the timeout.
    Timeout,
    /// The OS refused to start the process.
    SpawnFailure,
    /// Reading a pipe or waiting on the process failed.
    StreamFault,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Blocked => "blocked",
            FailureKind::Timeout => "timeout",
            FailureKind::SpawnFailure => "spawn_failure",
            FailureKind::StreamFault => "stream_fault",
        };
        f.write_str(label)
    }
}

/// One event of a streaming session.
///
/// Serialized as `{"type": "output", "stream": "stdout", "content": "..."}`,
/// `{"type": "error", "kind": "timeout", "content": "..."}` or
/// `{"type": "exit_code", "content": 0}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    Output { stream: StreamKind, content: String },
    Error { kind: FailureKind, content: String },
    ExitCode { content: i32 },
}

impl OutputEvent {
    pub fn stdout(line: impl Into<String>) -> Self {
        OutputEvent::Output {
            stream: StreamKind::Stdout,
            content: line.into(),
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        OutputEvent::Output {
            stream: StreamKind::Stderr,
            content: line.into(),
        }
    }

    /// Returns true for the events that end a session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutputEvent::Error { .. } | OutputEvent::ExitCode { .. })
    }

    /// Serialize as a single NDJSON line, without the trailing newline.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for OutputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputEvent::Output { stream, content } => write!(f, "{stream}: {content}"),
            OutputEvent::Error { kind, content } => write!(f, "error ({kind}): {content}"),
            OutputEvent::ExitCode { content } => write!(f, "exit code {content}"),
        }
    }
}

/// Complete result of a run-to-completion execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionResult {
    /// Result for a command that did not run; `reason` ends up in stderr.
    pub fn not_run(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: NOT_RUN_EXIT_CODE,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}
