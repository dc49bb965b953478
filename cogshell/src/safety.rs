//! Denylist filter applied to every command before anything is spawned.
//!
//! This is a heuristic guard against obviously destructive commands, not a
//! sandbox. Shell metacharacters (`;`, `&`, `|`, backtick) are allowed but
//! logged, since legitimate pipelines use them all the time.

use crate::error::ExecError;

/// Patterns rejected by every filter.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "rm -rf /",
    "mkfs",
    "dd if=/dev/zero of=/dev/",
    ":(){ :|:& };:",
    "> /dev/sda",
];

const METACHARACTERS: &[char] = &[';', '&', '|', '`'];

#[derive(Debug, Clone)]
pub struct SafetyFilter {
    denylist: Vec<String>,
}

impl SafetyFilter {
    /// Filter using only [`DEFAULT_DENYLIST`].
    pub fn new() -> Self {
        Self::with_extra_patterns(std::iter::empty::<String>())
    }

    /// Filter using the default denylist plus `extra` patterns.
    pub fn with_extra_patterns<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut denylist: Vec<String> = DEFAULT_DENYLIST.iter().map(|p| p.to_string()).collect();
        for pattern in extra {
            let pattern = pattern.into();
            if !pattern.is_empty() && !denylist.contains(&pattern) {
                denylist.push(pattern);
            }
        }
        Self { denylist }
    }

    pub fn patterns(&self) -> &[String] {
        &self.denylist
    }

    /// Returns false if the command contains any denylisted substring.
    pub fn is_safe(&self, command: &str) -> bool {
        self.check(command).is_ok()
    }

    /// Like [`SafetyFilter::is_safe`], but reports which pattern matched.
    pub fn check(&self, command: &str) -> Result<(), ExecError> {
        if let Some(pattern) = self.denylist.iter().find(|p| command.contains(p.as_str())) {
            tracing::error!("Unsafe command blocked: {} (matched '{}')", command, pattern);
            return Err(ExecError::Blocked {
                command: command.to_string(),
                pattern: pattern.clone(),
            });
        }

        if command.contains(METACHARACTERS) {
            tracing::warn!(
                "Executing command with potentially dangerous characters: {}",
                command
            );
        }
        Ok(())
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new()
    }
}
