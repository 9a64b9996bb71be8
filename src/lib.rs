//! tcpdaemon - a supervised TCP connection daemon
//!
//! A singleton daemon that accepts TCP connections, runs each admitted
//! connection in its own worker under a configurable ceiling and shuts down
//! cleanly on a termination signal.

pub mod cli;
pub mod commands;
pub mod common;
pub mod daemon;
pub mod handler;
pub mod net;

// Re-export commonly used types for tests
pub use common::{Error, Result};
