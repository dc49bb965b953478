//! Test helper utilities for cogshell.
//!
//! Reusable helpers for unit and integration tests: polling and barrier-based
//! concurrency helpers, process liveness checks, and instrumented spawners.
//! These APIs are intended for test-only code paths.

pub mod concurrent_helpers;
pub mod process_helpers;

pub use concurrent_helpers::*;
pub use process_helpers::*;

use crate::{config::EngineConfig, engine::Engine, spawner::ProcessSpawner};
use std::{path::Path, sync::Arc};

/// Initialize verbose logging for tests.
pub fn init_test_logging() {
    crate::utils::logging::init_test_logging();
}

/// Engine config tuned for tests: short grace periods, working dir `dir`.
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig {
        working_dir: dir.to_path_buf(),
        kill_grace_ms: 500,
        drain_grace_ms: 300,
        ..Default::default()
    }
}

/// Engine with a custom spawner and test config.
pub fn test_engine_with(dir: &Path, spawner: Arc<dyn ProcessSpawner>) -> Engine {
    Engine::with_spawner(test_config(dir), spawner)
}
