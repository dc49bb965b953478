//! # Logging Initialization
//!
//! One-time setup of the `tracing` subscriber for the `cogshell` binary and tests.
//!
//! - **Filter**: `RUST_LOG` wins when set; otherwise `<level>,cogshell=debug`.
//! - **File (default)**: a daily rolling `cogshell.log` in the user cache directory
//!   (via `directories`), written through a non-blocking `tracing-appender` writer
//!   with ANSI colors off.
//! - **Stderr**: used when file logging is disabled or the cache directory is not
//!   writable. Colors on.
//!
//! Stdout is never used for logs because the CLI writes its NDJSON events there.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, path::Path, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

const LOG_FILE_NAME: &str = "cogshell.log";

/// Initialize verbose stderr logging for tests. Safe to call from every test.
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}

/// Install the global subscriber. Only the first call has any effect.
///
/// # Errors
///
/// Currently infallible; the `Result` leaves room for fallible sinks.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},cogshell=debug")));

        if log_to_file
            && let Some(proj_dirs) = ProjectDirs::from("com", "cogshell", "cogshell")
            && can_write_to(proj_dirs.cache_dir())
        {
            let log_dir = proj_dirs.cache_dir();
            // tracing_appender::rolling::daily panics on permission errors.
            let appender = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME)
            }));
            if let Ok(appender) = appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();
                // Leaked so buffered lines are flushed at exit.
                Box::leak(Box::new(guard));
                return;
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

/// Create `dir` if needed and check that a file can be written there.
fn can_write_to(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let marker = dir.join(".cogshell_log_check");
    match std::fs::write(&marker, b"marker") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}
