//! Shared building blocks for the cogshell workspace.
//!
//! - [`session_state`]: observable lifecycle of one streaming command session.

pub mod session_state;
