//! Observable lifecycle of a single streaming command session.
//!
//! One `SessionStateMachine` is shared between the task that drives a child
//! process and the handle the consumer holds. It is the single source of truth
//! for "has this session produced its terminal signal yet", so the driver asks
//! it for permission before emitting a terminal event. A terminal transition
//! succeeds at most once; every later attempt is rejected.
//!
//! State changes are published through a `tokio::sync::watch` channel, so
//! observers wait for them without polling.
//!
//! # Example
//!
//! ```rust
//! use cogshell_common::session_state::{SessionState, SessionStateMachine};
//!
//! let sm = SessionStateMachine::new();
//! sm.transition_to_running(Some(4242)).unwrap();
//! sm.transition_to_draining(0).unwrap();
//! assert_eq!(sm.transition_to_exited().unwrap(), 0);
//!
//! // The session is already finished, so no second terminal signal is allowed.
//! assert!(sm.transition_to_failed("late fault".to_string()).is_err());
//! assert!(matches!(sm.current(), SessionState::Exited { exit_code: 0 }));
//! ```

use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle states of a streaming session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Command accepted, process not spawned yet.
    Starting,

    /// Process spawned and its output is being multiplexed.
    Running { pid: Option<u32> },

    /// Process has exited; buffered output is still being flushed.
    Draining { exit_code: i32 },

    /// All output delivered and the exit code emitted.
    Exited { exit_code: i32 },

    /// The session ended with an error event (blocked, timeout, spawn or stream fault).
    Failed { reason: String },

    /// The consumer stopped pulling events before the session finished.
    Abandoned,
}

impl SessionState {
    /// Returns true once the session can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Exited { .. } | SessionState::Failed { .. } | SessionState::Abandoned
        )
    }

    /// Process id while the session is running.
    pub fn pid(&self) -> Option<u32> {
        match self {
            SessionState::Running { pid } => *pid,
            _ => None,
        }
    }
}

/// Watch-channel backed state machine for a streaming session.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    sender: Arc<watch::Sender<SessionState>>,
    // Keeps the channel open even when no observer is subscribed.
    _receiver: watch::Receiver<SessionState>,
}

impl SessionStateMachine {
    /// Create a new state machine in the `Starting` state.
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(SessionState::Starting);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
        }
    }

    /// Get the current state without blocking.
    pub fn current(&self) -> SessionState {
        self.sender.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.sender.subscribe()
    }

    /// Check whether the session already produced its terminal signal.
    pub fn is_terminal(&self) -> bool {
        self.sender.borrow().is_terminal()
    }

    /// Transition from `Starting` to `Running`.
    pub fn transition_to_running(&self, pid: Option<u32>) -> Result<(), &'static str> {
        self.apply(
            |state| matches!(state, SessionState::Starting),
            SessionState::Running { pid },
            "Can only transition to Running from Starting",
        )
    }

    /// Transition from `Running` to `Draining` once the process exit is observed.
    pub fn transition_to_draining(&self, exit_code: i32) -> Result<(), &'static str> {
        self.apply(
            |state| matches!(state, SessionState::Running { .. }),
            SessionState::Draining { exit_code },
            "Can only transition to Draining from Running",
        )
    }

    /// Transition from `Draining` to `Exited`, returning the recorded exit code.
    pub fn transition_to_exited(&self) -> Result<i32, &'static str> {
        let mut exit_code = None;
        self.sender.send_if_modified(|state| {
            if let SessionState::Draining { exit_code: code } = *state {
                exit_code = Some(code);
                *state = SessionState::Exited { exit_code: code };
                true
            } else {
                false
            }
        });
        exit_code.ok_or("Can only transition to Exited from Draining")
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn transition_to_failed(&self, reason: String) -> Result<(), &'static str> {
        self.apply(
            |state| !state.is_terminal(),
            SessionState::Failed { reason },
            "Cannot transition from terminal state",
        )
    }

    /// Transition to `Abandoned` from any non-terminal state.
    pub fn transition_to_abandoned(&self) -> Result<(), &'static str> {
        self.apply(
            |state| !state.is_terminal(),
            SessionState::Abandoned,
            "Cannot transition from terminal state",
        )
    }

    /// Wait until the session reaches a terminal state and return it.
    pub async fn wait_for_terminal(&self) -> SessionState {
        let mut rx = self.sender.subscribe();
        loop {
            {
                let state = rx.borrow_and_update();
                if state.is_terminal() {
                    return state.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.current();
            }
        }
    }

    fn apply(
        &self,
        allowed: impl FnOnce(&SessionState) -> bool,
        next: SessionState,
        error: &'static str,
    ) -> Result<(), &'static str> {
        let mut transitioned = false;
        self.sender.send_if_modified(|state| {
            if allowed(state) {
                *state = next;
                transitioned = true;
                true
            } else {
                false
            }
        });
        if transitioned { Ok(()) } else { Err(error) }
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
