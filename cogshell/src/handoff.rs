//! # Auto-Debug Handoff
//!
//! Drives a command's [`OutputStream`] into an [`EventSink`] and watches for a
//! failure. When one shows up, the failure context is parked in the
//! [`PendingRequestStore`], the stream is dropped (which terminates the process),
//! and the caller gets back the request id to announce to the client. A later
//! auto-debug call resolves that id exactly once.
//!
//! The parked payload is the caller's context object extended with:
//!
//! - `shell_command`: the command text,
//! - `error_details`: the line or message that triggered the handoff,
//! - `full_shell_output`: everything printed to stdout so far.
//!
//! Output text is redacted before it is stored.

use crate::{
    error::{SinkError, StoreError},
    error_detector::{ErrorDetector, redact_sensitive_text},
    multiplexer::OutputStream,
    pending::{JsonMap, PendingRequestStore, RequestId},
    sink::EventSink,
    types::{OutputEvent, StreamKind},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Which output counts as a failure worth handing to auto-debug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugTrigger {
    /// `Error` events and non-zero exit codes.
    Failure,
    /// Any failure, plus the first line written to stderr.
    #[default]
    AnyStderr,
    /// Any failure, plus any line the [`ErrorDetector`] classifies as an error.
    ErrorPattern,
}

/// Result of driving one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// A failure was parked under `request_id`; processing stopped.
    Deferred {
        request_id: RequestId,
        error_details: String,
    },
    /// The command ran to completion without triggering a handoff.
    Completed { exit_code: i32, stdout: String },
}

impl HandoffOutcome {
    /// The client-facing announcement for a deferred failure.
    pub fn announcement(&self) -> Option<AutoDebugRequest> {
        match self {
            HandoffOutcome::Deferred {
                request_id,
                error_details,
            } => Some(AutoDebugRequest {
                request_id: request_id.clone(),
                error_details: error_details.clone(),
            }),
            HandoffOutcome::Completed { .. } => None,
        }
    }
}

/// Announcement telling the client that an auto-debug request is waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDebugRequest {
    pub request_id: RequestId,
    pub error_details: String,
}

#[derive(Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
enum Notice<'a> {
    AutoDebugRequest(&'a AutoDebugRequest),
}

impl AutoDebugRequest {
    /// `{"type": "auto_debug_request", "content": {"request_id": ..., "error_details": ...}}`
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(Notice::AutoDebugRequest(self))
    }
}

pub struct DebugHandoff {
    store: Arc<PendingRequestStore>,
    trigger: DebugTrigger,
    detector: ErrorDetector,
}

impl DebugHandoff {
    pub fn new(store: Arc<PendingRequestStore>, trigger: DebugTrigger) -> Self {
        Self {
            store,
            trigger,
            detector: ErrorDetector::new(),
        }
    }

    pub fn trigger(&self) -> DebugTrigger {
        self.trigger
    }

    pub fn store(&self) -> &Arc<PendingRequestStore> {
        &self.store
    }

    /// Forward every event of `stream` to `sink` until it ends or a failure triggers.
    ///
    /// Returns `Err` only when the sink fails; the stream is dropped in that case too.
    pub async fn drive(
        &self,
        mut stream: OutputStream,
        command_text: &str,
        context: JsonMap,
        sink: &dyn EventSink,
    ) -> Result<HandoffOutcome, SinkError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while let Some(event) = stream.next().await {
            sink.send(&event).await?;

            let error_details = match &event {
                OutputEvent::Output { stream: kind, content } => {
                    let details = self.line_trigger(*kind, content);
                    match kind {
                        StreamKind::Stdout => stdout.push(content.clone()),
                        StreamKind::Stderr => stderr.push(content.clone()),
                    }
                    details
                }
                OutputEvent::Error { content, .. } => Some(content.clone()),
                OutputEvent::ExitCode { content: 0 } => {
                    return Ok(HandoffOutcome::Completed {
                        exit_code: 0,
                        stdout: stdout.join("\n"),
                    });
                }
                OutputEvent::ExitCode { content } => Some(exit_details(*content, &stderr)),
            };

            if let Some(error_details) = error_details {
                drop(stream);
                return Ok(self
                    .defer(command_text, context, error_details, &stdout)
                    .await);
            }
        }

        // The driver always ends with a terminal event; reaching this means it died.
        let details = "Command output stream ended without an exit code.".to_string();
        Ok(self.defer(command_text, context, details, &stdout).await)
    }

    /// Consume a pending request announced earlier.
    pub async fn resolve(&self, request_id: Option<&str>) -> Result<JsonMap, StoreError> {
        self.store.resolve(request_id).await
    }

    fn line_trigger(&self, kind: StreamKind, line: &str) -> Option<String> {
        let triggered = match self.trigger {
            DebugTrigger::Failure => false,
            DebugTrigger::AnyStderr => kind == StreamKind::Stderr,
            DebugTrigger::ErrorPattern => self.detector.is_error(line),
        };
        triggered.then(|| line.to_string())
    }

    async fn defer(
        &self,
        command_text: &str,
        mut context: JsonMap,
        error_details: String,
        stdout: &[String],
    ) -> HandoffOutcome {
        let error_details = redact_sensitive_text(&error_details);
        context.insert("shell_command".to_string(), Value::from(command_text));
        context.insert(
            "error_details".to_string(),
            Value::from(error_details.clone()),
        );
        context.insert(
            "full_shell_output".to_string(),
            Value::from(redact_sensitive_text(&stdout.join("\n"))),
        );

        let request_id = self.store.register(context).await;
        tracing::info!(
            "Deferred failure of '{}' as auto-debug request {}",
            command_text,
            request_id
        );
        HandoffOutcome::Deferred {
            request_id,
            error_details,
        }
    }
}

fn exit_details(exit_code: i32, stderr: &[String]) -> String {
    if stderr.is_empty() {
        format!("Command exited with code {exit_code}")
    } else {
        format!("Command exited with code {exit_code}:\n{}", stderr.join("\n"))
    }
}
