//! # Engine Configuration
//!
//! `EngineConfig` carries every tunable the engine needs: default timeout and
//! working directory for commands, the shell used to interpret them, the grace
//! periods used when tearing a process down, queue capacity for streaming, extra
//! denylist patterns, the optional pending-request TTL, and the auto-debug trigger.
//!
//! Configuration is read from a TOML file. Every field is optional and unknown
//! keys are rejected so typos surface immediately:
//!
//! ```toml
//! default_timeout_secs = 120
//! working_dir = "/srv/project"
//! extra_denylist = ["shutdown", "reboot"]
//! pending_ttl_secs = 900
//! debug_trigger = "error_pattern"
//! ```
//!
//! Command-line flags override file values (see [`crate::shell::cli`]).

use crate::handoff::DebugTrigger;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_SHELL: &str = "/bin/sh";
pub const DEFAULT_KILL_GRACE_MS: u64 = 2000;
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 500;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Timeout applied when a command does not carry its own.
    pub default_timeout_secs: u64,
    /// Working directory applied when a command does not carry its own.
    pub working_dir: PathBuf,
    /// Shell used as `<shell> -c <command>`.
    pub shell: String,
    /// Time between SIGTERM and SIGKILL.
    pub kill_grace_ms: u64,
    /// How long to keep draining pipes after the process exits.
    pub drain_grace_ms: u64,
    /// Capacity of each per-stream line queue and of the event channel.
    pub channel_capacity: usize,
    /// Patterns appended to the built-in denylist.
    pub extra_denylist: Vec<String>,
    /// Expire unconsumed pending requests after this many seconds. Unset keeps them forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_ttl_secs: Option<u64>,
    /// What counts as a failure worth handing to auto-debug.
    pub debug_trigger: DebugTrigger,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            working_dir: PathBuf::from("."),
            shell: DEFAULT_SHELL.to_string(),
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            extra_denylist: Vec::new(),
            pending_ttl_secs: None,
            debug_trigger: DebugTrigger::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.default_timeout_secs > 0,
            "default_timeout_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.channel_capacity > 0,
            "channel_capacity must be greater than zero"
        );
        anyhow::ensure!(!self.shell.trim().is_empty(), "shell must not be empty");
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn pending_ttl(&self) -> Option<Duration> {
        self.pending_ttl_secs.map(Duration::from_secs)
    }

    pub fn capacity(&self) -> usize {
        self.channel_capacity.max(1)
    }
}
