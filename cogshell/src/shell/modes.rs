//! # Execution Modes
//!
//! Each mode builds an [`Engine`] from the effective configuration, runs one
//! command and returns the command's exit code for the process to mirror.
//! Results go to stdout; logs never do.

use crate::{
    config::EngineConfig,
    engine::Engine,
    handoff::HandoffOutcome,
    pending::JsonMap,
    sink::{EventSink, NdjsonSink},
    types::{Command, NOT_RUN_EXIT_CODE, OutputEvent},
};
use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, stdout};

/// Run to completion and print one `{stdout, stderr, exit_code}` object.
pub async fn run_sync_mode(config: EngineConfig, command: &Command) -> Result<i32> {
    let engine = Engine::new(config);
    let result = engine.run(command).await;

    let json = serde_json::to_string(&result).context("Failed to serialize execution result")?;
    let mut out = stdout();
    out.write_all(json.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;

    Ok(result.exit_code)
}

/// Print every event as NDJSON while the command runs.
pub async fn run_stream_mode(config: EngineConfig, command: &Command) -> Result<i32> {
    let engine = Engine::new(config);
    let sink = NdjsonSink::new(stdout());
    let mut stream = engine.stream(command);

    let mut exit_code = NOT_RUN_EXIT_CODE;
    while let Some(event) = stream.next().await {
        sink.send(&event)
            .await
            .context("Failed to write event to stdout")?;
        if let OutputEvent::ExitCode { content } = event {
            exit_code = content;
        }
    }

    Ok(exit_code)
}

/// Stream like [`run_stream_mode`], but park the first failure for auto-debug
/// and print its announcement.
pub async fn run_handoff_mode(config: EngineConfig, command: &Command) -> Result<i32> {
    let engine = Engine::new(config);
    let sink = NdjsonSink::new(stdout());

    let outcome = engine
        .handoff(command, JsonMap::new(), &sink)
        .await
        .context("Failed to write event to stdout")?;

    match outcome {
        HandoffOutcome::Completed { exit_code, .. } => Ok(exit_code),
        HandoffOutcome::Deferred { .. } => {
            if let Some(announcement) = outcome.announcement() {
                let value = announcement
                    .to_value()
                    .context("Failed to serialize auto-debug announcement")?;
                let mut out = sink.into_inner();
                out.write_all(format!("{value}\n").as_bytes()).await?;
                out.flush().await?;
            }
            Ok(NOT_RUN_EXIT_CODE)
        }
    }
}
