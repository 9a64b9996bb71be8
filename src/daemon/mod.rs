//! Daemon mode - the live, serving instance
//!
//! Entered once the foreground/background decision is made. The daemon:
//! 1. Registers handlers for the termination signals
//! 2. Binds the listening socket
//! 3. Takes the singleton lock (only now, since detaching changes the pid)
//! 4. Runs the supervisor's accept loop until a termination signal arrives

pub mod admission;
pub mod lock;
pub mod server;
pub mod signals;
pub mod worker;

use std::sync::Arc;

use crate::common::{Options, Result};
use crate::handler::ConnectionHandler;
use crate::net::listener;

pub use lock::LockManager;
pub use server::Supervisor;
pub use signals::{ProcessRole, ShutdownSignal, SignalListener};

/// Run the serving instance until it is told to shut down
pub async fn run(options: &Options, handler: Arc<dyn ConnectionHandler>) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Starting daemon"
    );

    let mut signals = SignalListener::new()?;

    let listener = listener::bind(options.port, options.dns_lookups).await?;

    let mut lock = LockManager::new(&options.lock_file);
    lock.acquire()?;

    let supervisor = Supervisor::new(
        listener,
        lock,
        handler,
        options.max_workers,
        options.dns_lookups,
    );

    supervisor.serve(async move { signals.recv().await }).await
}
