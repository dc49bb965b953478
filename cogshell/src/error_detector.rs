//! # Error Detection and Redaction
//!
//! Classifies individual output lines as error or warning by pattern, and masks
//! secrets in captured output before it is parked as auto-debug context.
//!
//! Classification works on whole words, case-insensitively, anywhere in the line,
//! because shell commands print failures in every format imaginable:
//!
//! - **Error**: `error`, `panicked`, `Traceback`, `fatal`, `exception`, `failed`
//! - **Warn**: `warn`, `warning`, `deprecated`
//!
//! Counters such as `0 errors` do not match, since `errors` is a different word.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::OnceLock};

const REDACTION_PLACEHOLDER: &str = "[REDACTED]";

const ERROR_PATTERNS: &[&str] = &[
    r"(?i)\berror\b",
    r"(?i)\bpanicked\b",
    r"\bTraceback\b",
    r"(?i)\bfatal\b",
    r"(?i)\bexception\b",
    r"(?i)\bfailed\b",
];

const WARN_PATTERNS: &[&str] = &[r"(?i)\bwarn(ing)?\b", r"(?i)\bdeprecated\b"];

const REDACTION_RULES: &[(&str, &str)] = &[
    (
        r"(?i)\bAuthorization\b\s*:\s*\S+\s+\S+",
        "Authorization: [REDACTED]",
    ),
    (r"(?i)\bBearer\s+[A-Za-z0-9._+/=-]{8,}", "Bearer [REDACTED]"),
    (
        r"(?i)\b(password|passwd|token|secret|api[_-]?key)\b\s*[:=]\s*(\S+)",
        "$1=[REDACTED]",
    ),
    (r"\bAKIA[0-9A-Z]{16}\b", REDACTION_PLACEHOLDER),
    (r"\bgh[pousr]_[A-Za-z0-9]{20,}\b", REDACTION_PLACEHOLDER),
    (r"\bsk-[A-Za-z0-9_-]{16,}\b", REDACTION_PLACEHOLDER),
];

fn redaction_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        REDACTION_RULES
            .iter()
            .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
                Ok(regex) => Some((regex, *replacement)),
                Err(e) => {
                    tracing::error!("Invalid redaction pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Redact common secret/token patterns from a single output line.
pub fn redact_sensitive_line(line: &str) -> String {
    let mut redacted = line.to_owned();
    for (pattern, replacement) in redaction_rules() {
        redacted = pattern.replace_all(&redacted, *replacement).into_owned();
    }
    redacted
}

/// Redact common secret/token patterns from multi-line output.
pub fn redact_sensitive_text(text: &str) -> String {
    text.split('\n')
        .map(redact_sensitive_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Severity of a classified line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warn,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warn => write!(f, "warn"),
        }
    }
}

/// Compiled pattern sets for classifying output lines.
pub struct ErrorDetector {
    error_patterns: RegexSet,
    warn_patterns: RegexSet,
}

impl ErrorDetector {
    /// Build a detector with the default pattern sets.
    pub fn new() -> Self {
        Self {
            error_patterns: compile_set(ERROR_PATTERNS),
            warn_patterns: compile_set(WARN_PATTERNS),
        }
    }

    /// Most severe classification of `line`, if any pattern matches.
    pub fn classify(&self, line: &str) -> Option<Severity> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        if self.error_patterns.is_match(trimmed) {
            return Some(Severity::Error);
        }
        if self.warn_patterns.is_match(trimmed) {
            return Some(Severity::Warn);
        }
        None
    }

    pub fn is_error(&self, line: &str) -> bool {
        self.classify(line) == Some(Severity::Error)
    }
}

fn compile_set(patterns: &[&str]) -> RegexSet {
    RegexSet::new(patterns).unwrap_or_else(|e| {
        tracing::error!("Invalid detector patterns: {}", e);
        RegexSet::empty()
    })
}

impl Default for ErrorDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorDetector")
            .field("error_patterns", &self.error_patterns.len())
            .field("warn_patterns", &self.warn_patterns.len())
            .finish()
    }
}
