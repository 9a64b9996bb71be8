//! Supervisor - accept loop, admission and master-role shutdown
//!
//! The supervisor is single-threaded with respect to its own state: the
//! worker count, the lock and the listener are only touched from the
//! `select!` loop in [`Supervisor::serve`]. Admission decisions are therefore
//! serialized, and worker exits are reaped on the same task that admits.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};

use super::admission::{Admission, WorkerCount};
use super::lock::LockManager;
use super::signals::{ProcessRole, ShutdownMachine, ShutdownSignal};
use super::worker::{self, WorkerExit, WorkerStatus};
use crate::common::{logging, Error, ErrorClass, Result};
use crate::handler::ConnectionHandler;
use crate::net::accept;

/// Sent to a client refused by admission control
pub const REJECTION_MESSAGE: &str = "Maximum processes reached, try again later\n";

/// How long live workers get to unwind before they are aborted
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The live daemon instance
pub struct Supervisor {
    /// Listening socket, taken by `serve`
    listener: Option<TcpListener>,
    /// Singleton lock held by this instance
    lock: LockManager,
    /// Admission ceiling and live worker count
    count: WorkerCount,
    /// Running workers
    workers: JoinSet<WorkerExit>,
    /// Shutdown broadcast to every worker
    shutdown_tx: broadcast::Sender<i32>,
    /// Master-role state machine
    machine: ShutdownMachine,
    /// Protocol handler given to each worker
    handler: Arc<dyn ConnectionHandler>,
    /// Reverse-resolve peers in workers
    dns_lookups: bool,
    /// Id for the next worker
    next_worker_id: u64,
    drain_timeout: Duration,
}

impl Supervisor {
    /// Create a supervisor owning `listener` and an acquired `lock`
    pub fn new(
        listener: TcpListener,
        lock: LockManager,
        handler: Arc<dyn ConnectionHandler>,
        max_workers: usize,
        dns_lookups: bool,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            listener: Some(listener),
            lock,
            count: WorkerCount::new(max_workers),
            workers: JoinSet::new(),
            shutdown_tx,
            machine: ShutdownMachine::new(ProcessRole::Supervisor),
            handler,
            dns_lookups,
            next_worker_id: 1,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Override how long workers may take to unwind on shutdown
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(Error::invariant("listener already closed")),
        }
    }

    /// Serve connections until `shutdown` yields a termination signal
    ///
    /// Returns `Ok(())` after an orderly shutdown. Any error returned is
    /// fatal.
    pub async fn serve<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ShutdownSignal>,
    {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::invariant("serve called twice"))?;
        tokio::pin!(shutdown);

        loop {
            tracing::trace!("About to block on accept");
            tokio::select! {
                biased;

                signal = &mut shutdown => {
                    return self.shutdown(signal, listener).await;
                }

                joined = self.workers.join_next(), if !self.workers.is_empty() => {
                    if let Some(joined) = joined {
                        self.reap(joined)?;
                    }
                }

                accepted = accept::filtered_accept(&listener) => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer).await,
                    Err(e) if e.class() == ErrorClass::Transient => continue,
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// Admit or refuse one accepted connection
    ///
    /// The connection is already open both ways here, so a refused client
    /// still gets a rejection message before the close.
    async fn admit(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        tracing::info!("Connection attempt from {}", peer.ip());

        match self.count.try_admit() {
            Admission::AtCapacity => {
                tracing::info!(
                    live = self.count.live(),
                    "Maximum workers reached, refusing to start another"
                );
                if let Err(e) = reject(&mut stream).await {
                    tracing::debug!(peer = %peer, "Rejection not delivered: {}", e);
                }
            }
            Admission::Admitted => {
                let id = self.next_worker_id;
                self.next_worker_id += 1;
                tracing::trace!(worker = id, live = self.count.live(), "About to start a worker");

                self.workers.spawn(worker::run(
                    id,
                    stream,
                    peer,
                    self.dns_lookups,
                    Arc::clone(&self.handler),
                    self.shutdown_tx.subscribe(),
                ));
            }
        }
    }

    /// Handle one worker's exit notification
    fn reap(&mut self, joined: std::result::Result<WorkerExit, JoinError>) -> Result<()> {
        self.machine.on_worker_exit()?;

        match joined {
            Ok(exit) => match &exit.status {
                WorkerStatus::Finished => {
                    tracing::info!(peer = %exit.peer, "worker {} died", exit.id)
                }
                WorkerStatus::Failed(reason) => tracing::warn!(
                    peer = %exit.peer,
                    status = exit.status.exit_code(),
                    "worker {} failed: {}",
                    exit.id,
                    reason
                ),
                WorkerStatus::Terminated(signal) => tracing::info!(
                    peer = %exit.peer,
                    status = exit.status.exit_code(),
                    "worker {} terminated by {}",
                    exit.id,
                    signal
                ),
            },
            Err(e) if e.is_panic() => tracing::error!("worker crashed: {}", e),
            Err(e) => tracing::debug!("worker aborted: {}", e),
        }

        self.count.release()
    }

    /// Master-role unwind
    ///
    /// Workers are told to stop and reaped, the listener is closed, the lock
    /// released and the log sink flushed. Any failure here is fatal.
    async fn shutdown(mut self, signal: ShutdownSignal, listener: TcpListener) -> Result<()> {
        if self.machine.begin_shutdown(signal).is_none() {
            return Ok(());
        }

        // Every worker subscribed before this send sees the signal
        if self.shutdown_tx.send(signal.as_raw()).is_err() {
            tracing::debug!("No live workers to notify");
        }
        self.drain_workers().await?;

        drop(listener);
        tracing::debug!("Listener closed");

        self.lock.release()?;

        tracing::trace!("Finishing logging");
        logging::finish();
        Ok(())
    }

    /// Reap every worker, aborting those still running after the deadline
    async fn drain_workers(&mut self) -> Result<()> {
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);

        while !self.workers.is_empty() {
            tokio::select! {
                joined = self.workers.join_next() => {
                    if let Some(joined) = joined {
                        self.reap(joined)?;
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!(live = self.workers.len(), "Workers did not stop in time, aborting");
                    self.workers.abort_all();
                    while let Some(joined) = self.workers.join_next().await {
                        self.reap(joined)?;
                    }
                }
            }
        }

        if !self.count.is_idle() {
            return Err(Error::Shutdown(format!(
                "{} workers unaccounted for after drain",
                self.count.live()
            )));
        }
        Ok(())
    }
}

/// Tell a refused client why and close the connection
async fn reject(stream: &mut TcpStream) -> std::io::Result<()> {
    stream.write_all(REJECTION_MESSAGE.as_bytes()).await?;
    stream.flush().await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EchoHandler;
    use tokio::io::AsyncReadExt;

    async fn supervisor(max_workers: usize) -> (Supervisor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = LockManager::new(dir.path().join("daemon.pid"));
        lock.acquire().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let supervisor = Supervisor::new(listener, lock, Arc::new(EchoHandler), max_workers, false)
            .with_drain_timeout(Duration::from_millis(500));
        (supervisor, dir)
    }

    #[tokio::test]
    async fn test_immediate_shutdown_releases_lock() {
        let (supervisor, dir) = supervisor(1).await;
        let lock_path = dir.path().join("daemon.pid");
        assert!(lock_path.exists());

        supervisor
            .serve(async { ShutdownSignal::Terminate })
            .await
            .unwrap();

        assert!(!lock_path.exists());
    }

    #[tokio::test]
    async fn test_refused_client_gets_rejection() {
        let (supervisor, dir) = supervisor(1).await;
        let addr = supervisor.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<ShutdownSignal>();

        let server = tokio::spawn(supervisor.serve(async move {
            stop_rx.await.unwrap_or(ShutdownSignal::Terminate)
        }));

        // First client occupies the only slot
        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 16];
        first.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"Hello 127.0.0.1\n");

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut reply = String::new();
        second.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, REJECTION_MESSAGE);

        stop_tx.send(ShutdownSignal::Terminate).unwrap();
        server.await.unwrap().unwrap();

        // The worker was told to stop, so its connection is closed
        let mut rest = Vec::new();
        let _ = first.read_to_end(&mut rest).await;
        assert!(!dir.path().join("daemon.pid").exists());
    }
}
