//! Fatal error reporter
//!
//! Used for conditions after which the process state can no longer be
//! trusted. Nothing is cleaned up here: a lock file left behind is recovered
//! as stale by the next instance.

use super::{logging, Error};

/// Log the error, flush the log sink and terminate the process
///
/// With `dump_core` the process aborts so a core file can be inspected.
pub fn report(error: &Error, dump_core: bool) -> ! {
    tracing::error!(pid = std::process::id(), "PANIC: {}", error);

    // stderr may already point at /dev/null in the detached daemon
    if unsafe { libc::isatty(libc::STDERR_FILENO) } == 1 {
        eprintln!("PANIC: {}", error);
    }

    logging::finish();

    if dump_core {
        std::process::abort();
    }
    std::process::exit(1);
}
