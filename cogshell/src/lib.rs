//! # cogshell
//!
//! A concurrent command-execution and output-multiplexing engine for assistant
//! dashboards. A caller hands it a shell command string; cogshell checks it
//! against a denylist, spawns it, and either collects the complete result or
//! streams every output line back as a typed event while the process runs.
//!
//! ## Guarantees
//!
//! - **No pipe deadlock**: stdout and stderr are drained by independent reader tasks.
//! - **Deterministic termination**: a streaming session ends with exactly one terminal
//!   event, either `ExitCode` (always last) or a single `Error`.
//! - **No orphans**: timeouts, faults and early abandonment by the consumer all
//!   terminate the child process (SIGTERM, then SIGKILL after a grace period).
//! - **Deferred debugging**: a failing session can be parked in the
//!   [`pending::PendingRequestStore`] under an opaque id and picked up exactly once by
//!   a later auto-debug request.
//!
//! ## Modules
//!
//! - **`engine`**: The injected session object tying everything together.
//! - **`safety`**: Denylist filter applied before anything is spawned.
//! - **`spawner`**: The seam that turns a [`types::Command`] into an OS process.
//! - **`runner`**: Run-to-completion execution with a hard timeout.
//! - **`multiplexer`**: Live, ordered event stream over a running process.
//! - **`pending`**: Single-consumption correlation store for failure context.
//! - **`handoff`**: Drives a stream into a sink and defers failures to the store.
//! - **`error_detector`**: Line classification and secret redaction.
//! - **`sink`**: Destinations for output events.
//! - **`config`**: TOML-backed engine configuration.
//! - **`shell`**: The `cogshell` command-line front end.

pub mod config;
pub mod engine;
pub mod error;
pub mod error_detector;
pub mod handoff;
pub mod multiplexer;
pub mod pending;
pub mod runner;
pub mod safety;
pub mod shell;
pub mod sink;
pub mod spawner;
pub mod types;
pub mod utils;

// Test utilities
pub mod test_utils;

// Re-export main types for easier use
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{ExecError, SinkError, StoreError};
pub use multiplexer::{OutputStream, SessionOutcome};
pub use pending::{PendingRequestStore, RequestId};
pub use types::{Command, ExecutionResult, FailureKind, OutputEvent, StreamKind};
