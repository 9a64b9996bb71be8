//! Daemonization
//!
//! The bootstrap process re-executes its own binary with the hidden
//! `--detached` flag in a new session, with `/` as working directory and
//! stdio on /dev/null. It then waits until the successor has taken the lock
//! and reports its pid.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::common::{paths, Error, Options, Result};
use crate::daemon::LockManager;

/// Timeout for the detached daemon to take the lock
const SPAWN_TIMEOUT_SECS: u64 = 5;

/// Start the detached daemon and return its pid
pub async fn spawn_detached(options: &Options) -> Result<u32> {
    tracing::debug!("Spawning detached daemon");

    let exe_path = std::env::current_exe()
        .map_err(|e| Error::DetachFailed(format!("Failed to get current executable path: {}", e)))?;

    let args = options.detached_args()?;
    let lock_path = paths::absolute(&options.lock_file)?;

    let mut command = Command::new(&exe_path);
    command
        .args(&args)
        .current_dir("/")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    {
        use std::os::unix::process::CommandExt;
        // Become session leader so the terminal can't take us down
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = command
        .spawn()
        .map_err(|e| Error::DetachFailed(format!("Failed to spawn daemon: {}", e)))?;
    let pid = child.id();

    let lock = LockManager::new(&lock_path);
    let deadline = Instant::now() + Duration::from_secs(SPAWN_TIMEOUT_SECS);

    loop {
        if Instant::now() >= deadline {
            return Err(Error::SpawnTimeout(SPAWN_TIMEOUT_SECS));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        if let Some(status) = child.try_wait()? {
            return Err(Error::DetachFailed(format!(
                "daemon exited during startup with {}",
                status
            )));
        }

        // The file may be mid-write; only a complete pid counts
        match lock.read_holder() {
            Ok(Some(holder)) if holder == pid as i32 => {
                tracing::debug!(pid, "Detached daemon holds the lock");
                return Ok(pid);
            }
            _ => continue,
        }
    }
}
