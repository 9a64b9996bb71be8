//! Default file locations for the lock, log and configuration files
//!
//! Unix: lock file under `$XDG_RUNTIME_DIR` or `/tmp`, log and config files
//! under the platform directories reported by the `directories` crate.

use std::io;
use std::path::{Path, PathBuf};

/// Name used for the lock file and the project directories
const APP_NAME: &str = "tcpdaemon";

/// Get the default lock file path
///
/// - `$XDG_RUNTIME_DIR/tcpdaemon.pid` when a runtime dir is set
/// - `/tmp/tcpdaemon-<uid>.pid` otherwise
pub fn lock_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !runtime_dir.is_empty() {
            return PathBuf::from(runtime_dir).join(format!("{}.pid", APP_NAME));
        }
    }

    // Fallback to /tmp with uid so users don't share a lock
    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/{}-{}.pid", APP_NAME, uid))
}

/// Get the configuration directory path
///
/// - Linux: `~/.config/tcpdaemon/`
/// - macOS: `~/Library/Application Support/tcpdaemon/`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the default configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Get the default daemon log file, falling back to the working directory
pub fn log_path() -> PathBuf {
    log_dir()
        .map(|dir| dir.join("daemon.log"))
        .unwrap_or_else(|| PathBuf::from("daemon.log"))
}

/// Make a path absolute against the current working directory
///
/// Daemonizing changes the working directory to `/`, so every path handed to
/// the detached process must be resolved first.
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    std::path::absolute(path)
}

/// Ensure the parent directory of a file exists
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir)?;
        }
    }
    Ok(())
}
