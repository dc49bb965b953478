//! Destinations for output events.
//!
//! An [`EventSink`] receives every event of a session as the [`crate::handoff`]
//! driver pulls it from the stream. Three implementations cover the common cases:
//!
//! - [`ChannelEventSink`]: forwards events to an mpsc channel (web or chat transports).
//! - [`LoggingEventSink`]: writes events to the `tracing` log.
//! - [`NdjsonSink`]: writes one JSON object per line to any async writer.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use cogshell::sink::{EventSink, LoggingEventSink};
//! use cogshell::types::OutputEvent;
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = LoggingEventSink::new("build_42".to_string());
//!     sink.send(&OutputEvent::stdout("Compiling cogshell")).await.unwrap();
//! }
//! ```

use crate::{error::SinkError, types::OutputEvent};
use async_trait::async_trait;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::{Mutex, mpsc},
};

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    async fn send(&self, event: &OutputEvent) -> Result<(), SinkError>;

    /// Deliver several events in order, stopping at the first failure.
    async fn send_batch(&self, events: &[OutputEvent]) -> Result<(), SinkError> {
        for event in events {
            self.send(event).await?;
        }
        Ok(())
    }
}

/// Channel-backed sink.
pub struct ChannelEventSink {
    sender: mpsc::Sender<OutputEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::Sender<OutputEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn send(&self, event: &OutputEvent) -> Result<(), SinkError> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Create a channel sink together with its receiver.
pub fn channel_sink(capacity: usize) -> (ChannelEventSink, mpsc::Receiver<OutputEvent>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelEventSink::new(sender), receiver)
}

/// Sink that writes events to the log.
pub struct LoggingEventSink {
    session_name: String,
}

impl LoggingEventSink {
    pub fn new(session_name: String) -> Self {
        Self { session_name }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn send(&self, event: &OutputEvent) -> Result<(), SinkError> {
        match event {
            OutputEvent::Error { .. } => tracing::warn!("{}: {event}", self.session_name),
            _ => tracing::debug!("{}: {event}", self.session_name),
        }
        Ok(())
    }
}

/// Sink writing newline-delimited JSON.
///
/// Each event is flushed as soon as it is written so a reader on the other end
/// of a pipe sees it immediately.
pub struct NdjsonSink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for NdjsonSink<W> {
    async fn send(&self, event: &OutputEvent) -> Result<(), SinkError> {
        let mut line = event.to_ndjson()?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}
