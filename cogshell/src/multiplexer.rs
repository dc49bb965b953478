//! # Stream Multiplexer
//!
//! Runs a command and turns its stdout and stderr into one live, ordered
//! [`OutputStream`] of [`OutputEvent`]s.
//!
//! ## Session layout
//!
//! Each session owns:
//!
//! - one reader task per pipe, reading lines into its own bounded queue. EOF is
//!   signalled by the reader dropping its queue sender;
//! - the child process, whose exit is awaited as a third concurrent unit;
//! - one driver task that races the two queues, the process exit, the inactivity
//!   deadline and the consumer's cancellation token with `tokio::select!`, and
//!   forwards events to the consumer.
//!
//! ## Termination
//!
//! A session reports exactly one terminal event, guarded by a
//! [`SessionStateMachine`] transition:
//!
//! - **Exit**: the driver keeps draining both queues until the readers reach EOF,
//!   and only then emits `ExitCode`. `drain_grace` bounds silence, not total
//!   drain time: a slow consumer never loses lines. If the pipes stay silent for
//!   `drain_grace` (a group member holding them open), the rest of the group is
//!   killed and what the readers still hold is flushed before `ExitCode`.
//! - **Inactivity timeout**: no line and no exit within the command timeout (reset
//!   on every line). The process group is terminated and one `Error{Timeout}` is
//!   emitted; there is no `ExitCode`.
//! - **Fault**: a read or wait failure kills the process and emits `Error{StreamFault}`.
//! - **Abandonment**: dropping the [`OutputStream`] (or calling
//!   [`OutputStream::cancel`]) cancels the session token. The driver terminates
//!   the process and stops without emitting anything further.
//!
//! If the runtime shuts down underneath a session, the driver's [`SessionGuard`]
//! aborts the readers and `kill_on_drop` takes the child down.

use crate::{
    config::EngineConfig,
    error::ExecError,
    safety::SafetyFilter,
    spawner::{self, ProcessSpawner},
    types::{Command, OutputEvent, StreamKind},
};
use cogshell_common::session_state::{SessionState, SessionStateMachine};
use futures::Stream;
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    sync::mpsc,
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::{CancellationToken, DropGuard};

/// What a reader task forwards to the driver.
#[derive(Debug)]
enum ReaderMessage {
    Line(String),
    Fault(std::io::Error),
}

/// How a finished session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { exit_code: i32 },
    Failed { reason: String },
    Abandoned,
}

impl SessionOutcome {
    fn from_state(state: &SessionState) -> Option<Self> {
        match state {
            SessionState::Exited { exit_code } => Some(SessionOutcome::Completed {
                exit_code: *exit_code,
            }),
            SessionState::Failed { reason } => Some(SessionOutcome::Failed {
                reason: reason.clone(),
            }),
            SessionState::Abandoned => Some(SessionOutcome::Abandoned),
            _ => None,
        }
    }
}

/// Live event stream of one command session.
///
/// Finite and lazily consumed. Dropping it before the end abandons the session
/// and terminates the process.
pub struct OutputStream {
    events: mpsc::Receiver<OutputEvent>,
    state: SessionStateMachine,
    token: CancellationToken,
    pid: Option<u32>,
    _cancel_on_drop: DropGuard,
}

impl OutputStream {
    fn new(
        events: mpsc::Receiver<OutputEvent>,
        state: SessionStateMachine,
        token: CancellationToken,
        pid: Option<u32>,
    ) -> Self {
        let _cancel_on_drop = token.clone().drop_guard();
        Self {
            events,
            state,
            token,
            pid,
            _cancel_on_drop,
        }
    }

    /// Process id of the spawned command, if one was spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// How the session ended, once it has.
    pub fn outcome(&self) -> Option<SessionOutcome> {
        SessionOutcome::from_state(&self.state.current())
    }

    /// Wait until the session has ended, without consuming further events.
    pub async fn finished(&self) -> Option<SessionOutcome> {
        SessionOutcome::from_state(&self.state.wait_for_terminal().await)
    }

    /// Abandon the session without dropping the stream.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Receive the next event. Equivalent to `StreamExt::next`.
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.events.recv().await
    }
}

impl Stream for OutputStream {
    type Item = OutputEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("pid", &self.pid)
            .field("state", &self.state.current())
            .finish()
    }
}

pub struct StreamMultiplexer {
    filter: Arc<SafetyFilter>,
    spawner: Arc<dyn ProcessSpawner>,
    config: Arc<EngineConfig>,
}

impl StreamMultiplexer {
    pub fn new(
        filter: Arc<SafetyFilter>,
        spawner: Arc<dyn ProcessSpawner>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            filter,
            spawner,
            config,
        }
    }

    /// Start `command` and return its event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn stream(&self, command: &Command) -> OutputStream {
        let capacity = self.config.capacity();
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let token = CancellationToken::new();
        let state = SessionStateMachine::new();

        if let Err(e) = self.filter.check(&command.program) {
            return finish_early(events_tx, events_rx, state, token, e);
        }

        let working_dir = command.working_dir_or(&self.config.working_dir);
        tracing::info!("Executing command: {}", command.program);
        let mut child = match self.spawner.spawn(command, working_dir) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Error executing command '{}': {}", command.program, e);
                return finish_early(events_tx, events_rx, state, token, ExecError::SpawnFailure(e));
            }
        };

        let pid = child.id();
        if let Err(e) = state.transition_to_running(pid) {
            tracing::debug!("Unexpected session state after spawn: {}", e);
        }

        let (stdout_tx, stdout_rx) = mpsc::channel(capacity);
        let (stderr_tx, stderr_rx) = mpsc::channel(capacity);
        let mut guard = SessionGuard::default();
        match child.stdout.take() {
            Some(pipe) => guard.readers.push(tokio::spawn(read_lines(pipe, StreamKind::Stdout, stdout_tx))),
            None => drop(stdout_tx),
        }
        match child.stderr.take() {
            Some(pipe) => guard.readers.push(tokio::spawn(read_lines(pipe, StreamKind::Stderr, stderr_tx))),
            None => drop(stderr_tx),
        }

        let session = Session {
            command: command.program.clone(),
            child,
            pid,
            stdout: stdout_rx,
            stderr: stderr_rx,
            stdout_open: true,
            stderr_open: true,
            events: events_tx,
            token: token.clone(),
            state: state.clone(),
            guard,
            timeout: command.timeout_or(self.config.default_timeout()),
            kill_grace: self.config.kill_grace(),
            drain_grace: self.config.drain_grace(),
        };
        tokio::spawn(session.drive());

        OutputStream::new(events_rx, state, token, pid)
    }
}

/// Build a stream that carries a single pre-spawn failure and ends.
fn finish_early(
    events_tx: mpsc::Sender<OutputEvent>,
    events_rx: mpsc::Receiver<OutputEvent>,
    state: SessionStateMachine,
    token: CancellationToken,
    error: ExecError,
) -> OutputStream {
    if state.transition_to_failed(error.to_string()).is_ok()
        && events_tx.try_send(error.to_event()).is_err()
    {
        tracing::debug!("Event channel rejected pre-spawn failure");
    }
    OutputStream::new(events_rx, state, token, None)
}

/// Aborts the reader tasks when the driver goes away, however that happens.
#[derive(Default)]
struct SessionGuard {
    readers: Vec<JoinHandle<()>>,
}

impl SessionGuard {
    fn any_running(&self) -> bool {
        self.readers.iter().any(|reader| !reader.is_finished())
    }

    fn abort_readers(&self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.abort_readers();
    }
}

/// Read `pipe` line by line into `queue`. Invalid UTF-8 is replaced, not fatal.
async fn read_lines<R>(pipe: R, kind: StreamKind, queue: mpsc::Sender<ReaderMessage>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!("{} stream ended", kind);
                break;
            }
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
                if queue.send(ReaderMessage::Line(line)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Error reading {}: {}", kind, e);
                let _ = queue.send(ReaderMessage::Fault(e)).await;
                break;
            }
        }
    }
}

/// `now + after`, saturating at roughly a year for absurd timeouts.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60))
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Why the main loop stopped.
enum Interrupt {
    Exited(i32),
    TimedOut,
    Fault(String),
    Abandoned,
}

/// Result of handling one queue message.
enum Step {
    Continue,
    Stop(Interrupt),
}

struct Session {
    command: String,
    child: Child,
    pid: Option<u32>,
    stdout: mpsc::Receiver<ReaderMessage>,
    stderr: mpsc::Receiver<ReaderMessage>,
    stdout_open: bool,
    stderr_open: bool,
    events: mpsc::Sender<OutputEvent>,
    token: CancellationToken,
    state: SessionStateMachine,
    guard: SessionGuard,
    timeout: Duration,
    kill_grace: Duration,
    drain_grace: Duration,
}

impl Session {
    async fn drive(mut self) {
        let command = self.command.clone();
        let interrupt = self.run_until_exit().await;
        match interrupt {
            Interrupt::Exited(exit_code) => self.finish_exited(exit_code).await,
            Interrupt::TimedOut => {
                tracing::warn!(
                    "Command '{}' produced no output for {} seconds. Terminating process.",
                    self.command,
                    self.timeout.as_secs()
                );
                let error = ExecError::InactivityTimeout {
                    seconds: self.timeout.as_secs(),
                };
                self.finish_failed(error).await;
            }
            Interrupt::Fault(reason) => {
                tracing::error!("Error executing command '{}': {}", self.command, reason);
                self.finish_failed(ExecError::StreamFault(reason)).await;
            }
            Interrupt::Abandoned => self.finish_abandoned().await,
        }
        tracing::info!("Command execution finished: {}", command);
    }

    /// Forward lines until the process exits or something interrupts the session.
    async fn run_until_exit(&mut self) -> Interrupt {
        let window = self.timeout;
        let mut deadline = deadline_after(window);
        loop {
            let step = tokio::select! {
                _ = self.token.cancelled() => Step::Stop(Interrupt::Abandoned),
                msg = self.stdout.recv(), if self.stdout_open => {
                    self.handle(StreamKind::Stdout, msg, Some((&mut deadline, window))).await
                }
                msg = self.stderr.recv(), if self.stderr_open => {
                    self.handle(StreamKind::Stderr, msg, Some((&mut deadline, window))).await
                }
                status = self.child.wait() => match status {
                    Ok(status) => Step::Stop(Interrupt::Exited(spawner::exit_code_of(status))),
                    Err(e) => Step::Stop(Interrupt::Fault(format!("failed to wait for process: {e}"))),
                },
                _ = tokio::time::sleep_until(deadline) => Step::Stop(Interrupt::TimedOut),
            };
            if let Step::Stop(interrupt) = step {
                return interrupt;
            }
        }
    }

    /// Handle one queue message.
    ///
    /// When a `(deadline, window)` pair is given, the deadline is pushed to
    /// `window` from now once the line has been delivered, so time spent waiting
    /// on a slow consumer never counts as silence.
    async fn handle(
        &mut self,
        kind: StreamKind,
        msg: Option<ReaderMessage>,
        deadline: Option<(&mut Instant, Duration)>,
    ) -> Step {
        match msg {
            Some(ReaderMessage::Line(line)) => {
                let event = OutputEvent::Output {
                    stream: kind,
                    content: line,
                };
                if !self.forward(event).await {
                    return Step::Stop(Interrupt::Abandoned);
                }
                if let Some((deadline, window)) = deadline {
                    *deadline = deadline_after(window);
                }
                Step::Continue
            }
            Some(ReaderMessage::Fault(e)) => {
                Step::Stop(Interrupt::Fault(format!("failed to read {kind}: {e}")))
            }
            None => {
                tracing::debug!("{} queue closed for '{}'", kind, self.command);
                match kind {
                    StreamKind::Stdout => self.stdout_open = false,
                    StreamKind::Stderr => self.stderr_open = false,
                }
                Step::Continue
            }
        }
    }

    /// Send an event to the consumer. Returns false once the consumer is gone.
    async fn forward(&self, event: OutputEvent) -> bool {
        tokio::select! {
            sent = self.events.send(event) => sent.is_ok(),
            _ = self.token.cancelled() => false,
        }
    }

    async fn finish_exited(mut self, exit_code: i32) {
        if self.state.transition_to_draining(exit_code).is_err() {
            return;
        }
        tracing::info!("Command '{}' exited with code {}", self.command, exit_code);

        if let Some(interrupt) = self.drain().await {
            match interrupt {
                Interrupt::Abandoned => self.finish_abandoned().await,
                Interrupt::Fault(reason) => {
                    self.finish_failed(ExecError::StreamFault(reason)).await
                }
                Interrupt::Exited(_) | Interrupt::TimedOut => {}
            }
            return;
        }

        if let Ok(exit_code) = self.state.transition_to_exited() {
            self.forward(OutputEvent::ExitCode { content: exit_code })
                .await;
        }
    }

    /// Keep forwarding lines after exit until both readers hit EOF.
    ///
    /// A group member that outlives the shell can hold a pipe open without
    /// writing. Once the pipes stay silent for `drain_grace`, the rest of the
    /// group is killed, the readers get one more quiet period to deliver what
    /// they still hold, and whatever is queued after that is flushed.
    async fn drain(&mut self) -> Option<Interrupt> {
        match self.drain_until_quiet().await {
            Err(interrupt) => return Some(interrupt),
            Ok(true) => return None,
            Ok(false) => {}
        }

        spawner::kill_group(self.pid);
        if let Err(interrupt) = self.drain_until_quiet().await {
            return Some(interrupt);
        }
        self.guard.abort_readers();

        for kind in [StreamKind::Stdout, StreamKind::Stderr] {
            while let Some(msg) = self.try_next(kind) {
                if let Step::Stop(interrupt) = self.handle(kind, Some(msg), None).await {
                    return Some(interrupt);
                }
            }
        }
        None
    }

    /// Forward lines until both queues close (`Ok(true)`) or neither produces a
    /// line for `drain_grace` (`Ok(false)`).
    async fn drain_until_quiet(&mut self) -> Result<bool, Interrupt> {
        let window = self.drain_grace;
        let mut deadline = deadline_after(window);
        while self.stdout_open || self.stderr_open {
            let step = tokio::select! {
                _ = self.token.cancelled() => Step::Stop(Interrupt::Abandoned),
                msg = self.stdout.recv(), if self.stdout_open => {
                    self.handle(StreamKind::Stdout, msg, Some((&mut deadline, window))).await
                }
                msg = self.stderr.recv(), if self.stderr_open => {
                    self.handle(StreamKind::Stderr, msg, Some((&mut deadline, window))).await
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!(
                        "Pipes of '{}' silent for {}ms after exit",
                        self.command,
                        window.as_millis()
                    );
                    return Ok(false);
                }
            };
            if let Step::Stop(interrupt) = step {
                return Err(interrupt);
            }
        }
        Ok(true)
    }

    fn try_next(&mut self, kind: StreamKind) -> Option<ReaderMessage> {
        let queue = match kind {
            StreamKind::Stdout => &mut self.stdout,
            StreamKind::Stderr => &mut self.stderr,
        };
        queue.try_recv().ok()
    }

    async fn finish_failed(mut self, error: ExecError) {
        self.terminate().await;
        if self.state.transition_to_failed(error.to_string()).is_ok() {
            self.forward(error.to_event()).await;
        }
    }

    async fn finish_abandoned(mut self) {
        if self.state.transition_to_abandoned().is_ok() {
            tracing::info!("Consumer abandoned '{}', terminating process", self.command);
        }
        self.terminate().await;
    }

    /// Terminate the child, then kill the rest of its group only if a reader is
    /// still waiting on a pipe some member could be holding open.
    async fn terminate(&mut self) {
        spawner::terminate(&mut self.child, self.pid, self.kill_grace).await;
        if self.guard.any_running() {
            spawner::kill_group(self.pid);
        }
        self.guard.abort_readers();
    }
}
