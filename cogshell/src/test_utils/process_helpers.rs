use crate::{
    spawner::{ProcessSpawner, ShellSpawner},
    types::Command,
};
use std::{
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::process::Child;

/// Returns true while `pid` names a running process. Zombies count as gone.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks existence; EPERM still means the process exists.
    let exists = match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(e) => e == nix::errno::Errno::EPERM,
    };
    exists && !is_zombie(pid)
}

/// Orphans reparented to an init that never reaps stay zombies forever.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            // The state field follows the parenthesised command name.
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

/// Poll until `pid` is gone or `timeout` elapses. Returns true once it is gone.
pub async fn wait_for_process_exit(pid: u32, timeout: Duration) -> bool {
    super::wait_for_condition(timeout, Duration::from_millis(25), || async move {
        !is_process_alive(pid)
    })
    .await
}

/// Spawner that records every spawn request before delegating to a real shell.
///
/// Used to prove that blocked commands never reach the OS.
#[derive(Debug, Default)]
pub struct SpySpawner {
    inner: ShellSpawner,
    calls: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl SpySpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawn_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn spawned_commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }
}

impl ProcessSpawner for SpySpawner {
    fn spawn(&self, command: &Command, working_dir: &Path) -> std::io::Result<Child> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.program.clone());
        }
        self.inner.spawn(command, working_dir)
    }
}

/// Spawner that always fails, for exercising spawn-failure paths.
#[derive(Debug, Default)]
pub struct FailingSpawner;

impl ProcessSpawner for FailingSpawner {
    fn spawn(&self, _command: &Command, _working_dir: &Path) -> std::io::Result<Child> {
        Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "spawning is disabled",
        ))
    }
}
