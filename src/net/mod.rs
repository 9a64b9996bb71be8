//! Network layer
//!
//! # Data Flow
//! ```text
//! Startup:
//!     listener.rs (resolve host, bind, listen)
//!
//! Accept loop:
//!     accept.rs (accept one connection, squash transient errors)
//!     → daemon::server (admission) → daemon::worker
//! ```

pub mod accept;
pub mod listener;
