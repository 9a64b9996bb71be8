//! Logging and tracing configuration
//!
//! The bootstrap process and foreground daemons log to stderr. The detached
//! daemon has no terminal, so it appends to the configured log file through a
//! non-blocking writer whose guard is the sink's flush handle.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::config::Options;
use super::{paths, Error, Result};

/// Flush handle of the file sink, present while the file sink is open
static FILE_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);

/// Initialize tracing for this process
///
/// The level comes from the options unless `RUST_LOG` is set. Returns the log
/// file path when records go to a file.
pub fn init(options: &Options) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::builder()
        .with_default_directive(options.level_filter().into())
        .from_env_lossy();

    if !options.detached {
        // try_init: a subscriber may already be installed (tests)
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .compact(),
            )
            .try_init();
        return Ok(None);
    }

    let log_file = &options.log_file;
    paths::ensure_parent_dir(log_file)?;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .map_err(|e| Error::FileRead {
            path: log_file.display().to_string(),
            error: e.to_string(),
        })?;

    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init();

    if let Ok(mut slot) = FILE_GUARD.lock() {
        *slot = Some(guard);
    }

    Ok(Some(log_file.clone()))
}

/// Flush and close the log sink
///
/// Records emitted afterwards are dropped. Safe to call more than once.
pub fn finish() {
    let guard = FILE_GUARD.lock().ok().and_then(|mut slot| slot.take());
    drop(guard);
}

/// Whether a file sink is currently open
pub fn is_file_sink_open() -> bool {
    FILE_GUARD
        .lock()
        .map(|slot| slot.is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_without_file_sink_is_noop() {
        finish();
        finish();
        assert!(!is_file_sink_open());
    }
}
