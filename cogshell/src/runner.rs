//! Run-to-completion execution.
//!
//! [`CommandRunner::run`] never fails from the caller's point of view: every
//! problem (blocked command, spawn failure, timeout, I/O fault) comes back as an
//! [`ExecutionResult`] with exit code -1 and an explanatory stderr.

use crate::{
    config::EngineConfig,
    error::ExecError,
    safety::SafetyFilter,
    spawner::{self, ProcessSpawner},
    types::{Command, ExecutionResult},
};
use std::{sync::Arc, time::Duration};
use tokio::{io::AsyncReadExt, task::JoinHandle};

type PipeReader = JoinHandle<std::io::Result<Vec<u8>>>;

pub struct CommandRunner {
    filter: Arc<SafetyFilter>,
    spawner: Arc<dyn ProcessSpawner>,
    config: Arc<EngineConfig>,
}

impl CommandRunner {
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

    /// Run `command` to completion and collect its output.
    pub async fn run(&self, command: &Command) -> ExecutionResult {
        if let Err(e) = self.filter.check(&command.program) {
            return ExecutionResult::not_run(e.to_string());
        }

        let timeout = command.timeout_or(self.config.default_timeout());
        let working_dir = command.working_dir_or(&self.config.working_dir);
        tracing::info!("Executing command synchronously: {}", command.program);

        let mut child = match self.spawner.spawn(command, working_dir) {
            Ok(child) => child,
            Err(e) => {
                let err = ExecError::SpawnFailure(e);
                tracing::error!("Error executing sync command '{}': {}", command.program, err);
                return ExecutionResult::not_run(err.to_string());
            }
        };
        let pid = child.id();

        let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
        let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let exit_code = spawner::exit_code_of(status);
                let drain_grace = self.config.drain_grace();
                let stdout = self.collect(stdout_reader, pid, drain_grace).await;
                let stderr = self.collect(stderr_reader, pid, drain_grace).await;
                tracing::info!(
                    "Command '{}' finished with exit code {}",
                    command.program,
                    exit_code
                );
                match (stdout, stderr) {
                    (Ok(stdout), Ok(stderr)) => ExecutionResult {
                        stdout,
                        stderr,
                        exit_code,
                    },
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::error!("Failed to read output of '{}': {}", command.program, e);
                        ExecutionResult::not_run(ExecError::StreamFault(e.to_string()).to_string())
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to wait for '{}': {}", command.program, e);
                spawner::terminate(&mut child, pid, self.config.kill_grace()).await;
                stop_readers(pid, [stdout_reader, stderr_reader]);
                ExecutionResult::not_run(ExecError::StreamFault(e.to_string()).to_string())
            }
            Err(_) => {
                tracing::warn!(
                    "Command '{}' timed out after {} seconds.",
                    command.program,
                    timeout.as_secs()
                );
                spawner::terminate(&mut child, pid, self.config.kill_grace()).await;
                stop_readers(pid, [stdout_reader, stderr_reader]);
                ExecutionResult::not_run(
                    ExecError::Timeout {
                        seconds: timeout.as_secs(),
                    }
                    .to_string(),
                )
            }
        }
    }

    /// Wait for a pipe reader after the process exited.
    ///
    /// A background grandchild can keep the pipe open past the shell's exit. If the
    /// reader is still busy after `grace`, the rest of the process group is killed,
    /// which closes the pipe and lets the reader finish with what it has.
    async fn collect(
        &self,
        reader: Option<PipeReader>,
        pid: Option<u32>,
        grace: Duration,
    ) -> std::io::Result<String> {
        let Some(mut reader) = reader else {
            return Ok(String::new());
        };

        let joined = match tokio::time::timeout(grace, &mut reader).await {
            Ok(joined) => joined,
            Err(_) => {
                tracing::debug!("Pipe still open {}ms after exit, killing group", grace.as_millis());
                spawner::kill_group(pid);
                match tokio::time::timeout(grace, &mut reader).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        reader.abort();
                        return Ok(String::new());
                    }
                }
            }
        };

        let bytes = joined.map_err(std::io::Error::other)??;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn spawn_pipe_reader<R>(mut pipe: R) -> PipeReader
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf).await?;
        Ok(buf)
    })
}

/// Abort the pipe readers of a terminated child. A reader still running means
/// some group member holds its pipe open, so the group is killed first.
fn stop_readers<const N: usize>(pid: Option<u32>, readers: [Option<PipeReader>; N]) {
    if readers.iter().flatten().any(|reader| !reader.is_finished()) {
        spawner::kill_group(pid);
    }
    for reader in readers.into_iter().flatten() {
        reader.abort();
    }
}
