//! Logging setup and serde helpers.

pub mod logging;
pub mod time;
