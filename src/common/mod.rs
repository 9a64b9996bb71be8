//! Common utilities shared by the bootstrap process and the daemon

pub mod config;
pub mod error;
pub mod fatal;
pub mod logging;
pub mod paths;

pub use config::Options;
pub use error::{Error, ErrorClass, Result};
