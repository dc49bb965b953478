//! # Shell Module
//!
//! Entry point and CLI logic for the `cogshell` binary.
//!
//! ## Sub-modules
//!
//! - **`cli`**: Argument parsing, configuration layering and mode dispatch
//! - **`modes`**: The sync, streaming and auto-debug execution modes

pub mod cli;
pub mod modes;

pub use cli::{Cli, build_config, command_text, process_exit_code, run};
