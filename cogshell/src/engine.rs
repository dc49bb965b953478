//! The injected session object.
//!
//! An [`Engine`] owns one safety filter, one process spawner, the configuration
//! and the shared pending-request store, and exposes the three ways to execute a
//! command: [`Engine::run`], [`Engine::stream`] and [`Engine::handoff`]. There is
//! no global state; hosts create an engine at startup and pass it (or its store)
//! to whoever needs it.

use crate::{
    config::EngineConfig,
    error::{SinkError, StoreError},
    handoff::{DebugHandoff, HandoffOutcome},
    multiplexer::{OutputStream, StreamMultiplexer},
    pending::{JsonMap, PendingRequestStore},
    runner::CommandRunner,
    safety::SafetyFilter,
    sink::EventSink,
    spawner::{ProcessSpawner, ShellSpawner},
    types::{Command, ExecutionResult},
};
use std::{sync::Arc, time::Duration};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct Engine {
    config: Arc<EngineConfig>,
    filter: Arc<SafetyFilter>,
    store: Arc<PendingRequestStore>,
    runner: CommandRunner,
    multiplexer: StreamMultiplexer,
    handoff: DebugHandoff,
}

impl Engine {
    /// Engine spawning through `config.shell`, with a fresh store.
    pub fn new(config: EngineConfig) -> Self {
        let spawner = Arc::new(ShellSpawner::new(config.shell.clone()));
        Self::with_spawner(config, spawner)
    }

    /// Engine with a custom spawner, with a fresh store.
    pub fn with_spawner(config: EngineConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let store = Arc::new(PendingRequestStore::with_ttl(config.pending_ttl()));
        Self::with_parts(config, spawner, store)
    }

    /// Engine sharing an existing store, e.g. between several front ends.
    pub fn with_parts(
        config: EngineConfig,
        spawner: Arc<dyn ProcessSpawner>,
        store: Arc<PendingRequestStore>,
    ) -> Self {
        let filter = Arc::new(SafetyFilter::with_extra_patterns(
            config.extra_denylist.iter().cloned(),
        ));
        let trigger = config.debug_trigger;
        let config = Arc::new(config);

        Self {
            runner: CommandRunner::new(filter.clone(), spawner.clone(), config.clone()),
            multiplexer: StreamMultiplexer::new(filter.clone(), spawner, config.clone()),
            handoff: DebugHandoff::new(store.clone(), trigger),
            config,
            filter,
            store,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn filter(&self) -> &SafetyFilter {
        &self.filter
    }

    pub fn store(&self) -> &Arc<PendingRequestStore> {
        &self.store
    }

    /// Run to completion. Never fails; see [`CommandRunner::run`].
    pub async fn run(&self, command: &Command) -> ExecutionResult {
        self.runner.run(command).await
    }

    /// Start a streaming session. Must be called from within a tokio runtime.
    pub fn stream(&self, command: &Command) -> OutputStream {
        self.multiplexer.stream(command)
    }

    /// Stream `command` into `sink`, deferring any failure to the pending store.
    pub async fn handoff(
        &self,
        command: &Command,
        context: JsonMap,
        sink: &dyn EventSink,
    ) -> Result<HandoffOutcome, SinkError> {
        let stream = self.stream(command);
        self.handoff
            .drive(stream, &command.program, context, sink)
            .await
    }

    /// Consume a deferred failure by the id announced to the client.
    pub async fn resolve(&self, request_id: Option<&str>) -> Result<JsonMap, StoreError> {
        self.handoff.resolve(request_id).await
    }

    /// Start purging expired pending requests in the background.
    ///
    /// Only meaningful when `pending_ttl_secs` is configured.
    pub fn start_pending_sweeper(&self) {
        if let Some(ttl) = self.config.pending_ttl() {
            let interval = (ttl / 2).max(MIN_SWEEP_INTERVAL);
            PendingRequestStore::start_background_sweeper(self.store.clone(), interval);
        }
    }
}
