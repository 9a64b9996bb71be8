//! Command verbs
//!
//! Sequences startup after the options are loaded: check-config mode,
//! terminate mode, the live-instance probe, then either daemonization or
//! serving in this process.

mod spawn;

use std::sync::Arc;

use crate::common::{Error, Options, Result};
use crate::daemon::{self, signals, LockManager, ShutdownSignal};
use crate::handler::EchoHandler;

/// Dispatch on the resolved options
pub async fn dispatch(options: &Options) -> Result<()> {
    if options.check_config {
        tracing::info!("check-config - exiting without running daemon");
        return Ok(());
    }

    if options.terminate {
        return terminate(options);
    }

    // The daemon refuses to start next to a live instance
    let lock = LockManager::new(&options.lock_file);
    if let Some(pid) = lock.check_holder()? {
        tracing::info!("Can't start new daemon: pid {} has a valid lock", pid);
        return Err(Error::AlreadyRunning { pid });
    }

    if !options.foreground && !options.detached {
        tracing::info!("Checked config. Initial process starting");
        let pid = spawn::spawn_detached(options).await?;
        tracing::info!("Initial process terminating. daemon started, pid={}", pid);
        println!("daemon started, pid={}", pid);
        return Ok(());
    }

    if options.detached {
        tracing::trace!("Now I'm a daemon");
    } else {
        tracing::debug!("Not daemonising - foreground flag set");
    }

    daemon::run(options, Arc::new(EchoHandler)).await
}

/// Ask the running instance to shut down
///
/// Sends SIGINT to the pid recorded in the lock file.
pub fn terminate(options: &Options) -> Result<()> {
    let lock = LockManager::new(&options.lock_file);
    if lock.is_acquired() {
        return Err(Error::invariant(
            "can't terminate others while holding the lock myself",
        ));
    }

    let pid = match lock.check_holder()? {
        Some(pid) => pid,
        None => return Err(Error::NotRunning),
    };

    if pid == std::process::id() as i32 {
        return Err(Error::invariant(format!(
            "pid in {} was same as mine ({})",
            lock.path().display(),
            pid
        )));
    }

    signals::send_signal(pid, ShutdownSignal::Interrupt)?;
    tracing::info!("Sent SIGINT to pid {}", pid);
    eprintln!("Killed pid {}", pid);
    Ok(())
}
