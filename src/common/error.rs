//! Error types for the daemon
//!
//! Every error belongs to one of four classes. Only `Startup` and `Fatal`
//! errors are allowed to end the process; transient and admission conditions
//! are absorbed by the accept loop.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// How an error is allowed to affect the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recoverable within the current loop iteration
    Transient,
    /// Expected and user-visible, the process keeps serving
    Admission,
    /// Internal inconsistency, the process must terminate immediately
    Fatal,
    /// Failure before serving begins
    Startup,
}

/// Main error type for the daemon
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Instance Errors ===
    #[error("Can't start new daemon: already running, pid={pid}")]
    AlreadyRunning { pid: i32 },

    #[error("No running daemon to terminate: nobody holds the lock")]
    NotRunning,

    #[error("Cannot secure lock on {path}: {source}")]
    LockCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Error reading contents of lock file {path}")]
    LockCorrupt { path: PathBuf },

    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: io::Error,
    },

    // === Startup Errors ===
    #[error("Failed to bind listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start detached daemon: {0}")]
    DetachFailed(String),

    #[error("Detached daemon did not take the lock within {0} seconds")]
    SpawnTimeout(u64),

    // === Serving Errors ===
    #[error("Connection dropped before accept: {0}")]
    AcceptTransient(#[source] io::Error),

    #[error("Maximum processes reached")]
    AtCapacity,

    #[error("accept() failed: {0}")]
    Accept(#[source] io::Error),

    #[error("Shutdown failed: {0}")]
    Shutdown(String),

    // === Internal Errors ===
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create an invariant violation error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Create a lock creation error
    pub fn lock_create(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LockCreate {
            path: path.into(),
            source,
        }
    }

    /// Classify this error according to the daemon's error taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::AcceptTransient(_) => ErrorClass::Transient,
            Error::AtCapacity => ErrorClass::Admission,
            Error::Config(_)
            | Error::ConfigParse(_)
            | Error::FileRead { .. }
            | Error::AlreadyRunning { .. }
            | Error::NotRunning
            | Error::LockCreate { .. }
            | Error::Signal { .. }
            | Error::Bind { .. }
            | Error::DetachFailed(_)
            | Error::SpawnTimeout(_) => ErrorClass::Startup,
            Error::LockCorrupt { .. }
            | Error::Accept(_)
            | Error::Shutdown(_)
            | Error::Invariant(_)
            | Error::Io(_) => ErrorClass::Fatal,
        }
    }

    /// Whether this error must terminate the process without further cleanup
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}
