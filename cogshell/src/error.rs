//! Error types for the execution engine, the pending store and event sinks.

use crate::types::{FailureKind, OutputEvent};
use thiserror::Error;

/// Failures that stop a command from producing a real exit code.
///
/// These never escape the engine as `Err`: the runner turns them into an
/// [`crate::types::ExecutionResult`] with exit code -1 and the multiplexer turns
/// them into a single `Error` event.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Unsafe command blocked: {command}")]
    Blocked { command: String, pattern: String },

    #[error("Command timed out after {seconds} seconds.")]
    Timeout { seconds: u64 },

    #[error("Command output stream timed out after {seconds} seconds and was terminated.")]
    InactivityTimeout { seconds: u64 },

    #[error("Failed to spawn process: {0}")]
    SpawnFailure(#[from] std::io::Error),

    #[error("Error executing command: {0}")]
    StreamFault(String),
}

impl ExecError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExecError::Blocked { .. } => FailureKind::Blocked,
            ExecError::Timeout { .. } | ExecError::InactivityTimeout { .. } => {
                FailureKind::Timeout
            }
            ExecError::SpawnFailure(_) => FailureKind::SpawnFailure,
            ExecError::StreamFault(_) => FailureKind::StreamFault,
        }
    }

    /// Whether running the same command again could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExecError::Timeout { .. } | ExecError::InactivityTimeout { .. } | ExecError::StreamFault(_)
        )
    }

    /// The terminal event a streaming session reports for this failure.
    pub fn to_event(&self) -> OutputEvent {
        OutputEvent::Error {
            kind: self.kind(),
            content: self.to_string(),
        }
    }
}

/// Errors returned by [`crate::pending::PendingRequestStore::pop`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The follow-up call carried no request id at all.
    #[error("Auto-debug request missing ID.")]
    MissingId,

    /// Unknown, already consumed, or expired.
    #[error("Auto-debug request not found or expired: {id}")]
    NotFound { id: String },
}

/// Errors that can occur when delivering events to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Event receiver disconnected")]
    Closed,

    #[error("Failed to write event: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}
