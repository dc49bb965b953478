//! Process creation and teardown.
//!
//! [`ProcessSpawner`] is the seam between the engine and the OS. The production
//! implementation, [`ShellSpawner`], runs `<shell> -c <command>` with piped
//! stdout/stderr, a null stdin, and `kill_on_drop(true)`. On Unix the child is
//! placed in its own process group so that termination reaches anything the
//! shell started, not just the shell itself.

use crate::types::Command;
use std::{
    path::Path,
    process::{ExitStatus, Stdio},
    time::Duration,
};
use tokio::process::Child;

/// Turns a [`Command`] into a running child process.
pub trait ProcessSpawner: Send + Sync {
    /// Spawn `command` in `working_dir`. Both stdout and stderr must be piped.
    fn spawn(&self, command: &Command, working_dir: &Path) -> std::io::Result<Child>;
}

/// Spawns commands through a POSIX shell.
#[derive(Debug, Clone)]
pub struct ShellSpawner {
    shell: String,
}

impl ShellSpawner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl Default for ShellSpawner {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SHELL)
    }
}

impl ProcessSpawner for ShellSpawner {
    fn spawn(&self, command: &Command, working_dir: &Path) -> std::io::Result<Child> {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&command.program)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn()?;
        tracing::info!(
            "Spawned '{}' in {} (pid {:?})",
            command.program,
            working_dir.display(),
            child.id()
        );
        Ok(child)
    }
}

/// Exit code for a finished process. A signal-terminated process reports `-signal`.
pub fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    crate::types::NOT_RUN_EXIT_CODE
}

/// Terminate a child and everything in its process group.
///
/// Sends SIGTERM, waits up to `grace` for the child to exit, then escalates to
/// SIGKILL. The child is always reaped before this returns. A child that was
/// already reaped is left alone: its group id may no longer be ours. Members
/// that ignored SIGTERM and outlived the leader are the caller's business (see
/// [`kill_group`]), since only the caller knows whether they still hold a pipe.
pub async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    signal_group(pid, GroupSignal::Terminate);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            tracing::warn!("Failed to wait for terminated process {:?}: {}", pid, e);
            kill_now(child, pid).await
        }
        Err(_) => {
            tracing::warn!(
                "Process {:?} ignored SIGTERM for {}ms, sending SIGKILL",
                pid,
                grace.as_millis()
            );
            kill_now(child, pid).await
        }
    }
}

/// Kill the child and its group immediately and reap it.
pub async fn kill_now(child: &mut Child, pid: Option<u32>) -> Option<ExitStatus> {
    signal_group(pid, GroupSignal::Kill);
    if let Err(e) = child.start_kill() {
        tracing::debug!("start_kill on {:?} failed: {}", pid, e);
    }
    child.wait().await.ok()
}

/// Kill whatever is left of a process group whose leader already exited.
///
/// Only call this while a pipe of the group is still open: that open pipe is
/// what shows a member is alive and the group id is still ours.
pub fn kill_group(pid: Option<u32>) {
    signal_group(pid, GroupSignal::Kill);
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: GroupSignal) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    // ESRCH just means the group is already gone.
    if let Err(e) = killpg(Pid::from_raw(pid), signal)
        && e != nix::errno::Errno::ESRCH
    {
        tracing::debug!("killpg({}, {:?}) failed: {}", pid, signal, e);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: Option<u32>, _signal: GroupSignal) {}
