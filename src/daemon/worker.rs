//! Per-connection workers
//!
//! A worker is a task owning one admitted connection. It resolves the peer's
//! identity, runs a single handler invocation to completion and ends. It
//! never sees the listener, the lock or the worker count. Its only link back
//! to the supervisor is its completion, which the supervisor reaps.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use super::signals::{ProcessRole, ShutdownMachine, ShutdownSignal};
use crate::handler::{Connection, ConnectionHandler};

/// Buffer size for host names returned by getnameinfo
const MAX_HOST_LEN: usize = 1025;

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerStatus {
    /// The handler ran to completion
    Finished,
    /// The handler returned an error
    Failed(String),
    /// The supervisor broadcast a termination signal
    Terminated(ShutdownSignal),
}

impl WorkerStatus {
    /// Exit status as the supervisor sees it
    pub fn exit_code(&self) -> i32 {
        match self {
            WorkerStatus::Finished => 0,
            WorkerStatus::Failed(_) | WorkerStatus::Terminated(_) => 1,
        }
    }
}

/// Completion record of one worker
#[derive(Debug)]
pub struct WorkerExit {
    pub id: u64,
    pub peer: SocketAddr,
    pub status: WorkerStatus,
}

/// Run one worker to completion
pub async fn run(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    dns_lookups: bool,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown: broadcast::Receiver<i32>,
) -> WorkerExit {
    let mut machine = ShutdownMachine::new(ProcessRole::Worker);
    tracing::trace!(worker = id, peer = %peer, "Created new worker");

    let conversation = async move {
        let peer_name = resolve_peer(peer, dns_lookups).await;
        let (reader, writer) = stream.into_split();
        handler
            .handle(Connection {
                reader: BufReader::new(reader),
                writer,
                peer_addr: peer,
                peer_name,
            })
            .await
    };

    let status = tokio::select! {
        result = conversation => match result {
            Ok(()) => WorkerStatus::Finished,
            Err(e) => {
                tracing::debug!(worker = id, "Handler failed: {}", e);
                WorkerStatus::Failed(e.to_string())
            }
        },
        received = shutdown.recv() => {
            // A closed channel means the supervisor is gone
            let signum = received.unwrap_or(libc::SIGTERM);
            match ShutdownSignal::from_raw(signum) {
                Ok(signal) => {
                    machine.begin_shutdown(signal);
                    tracing::debug!(worker = id, exit_code = machine.exit_code(), "Worker unwinding");
                    WorkerStatus::Terminated(signal)
                }
                Err(e) => {
                    tracing::error!(worker = id, "PANIC: {}", e);
                    WorkerStatus::Failed(e.to_string())
                }
            }
        }
    };

    tracing::trace!(worker = id, "About to exit worker");
    WorkerExit { id, peer, status }
}

/// Resolve the peer's display name
///
/// With lookups disabled, or when the reverse lookup fails, this is the
/// numeric address. Lookups run on the blocking pool, off the supervisor.
pub async fn resolve_peer(peer: SocketAddr, dns_lookups: bool) -> String {
    let numeric = peer.ip().to_string();
    if !dns_lookups {
        return numeric;
    }

    match tokio::task::spawn_blocking(move || reverse_lookup(&peer)).await {
        Ok(Ok(name)) => {
            tracing::info!("Resolved {}", name);
            name
        }
        Ok(Err(e)) => {
            tracing::info!("PTR lookup failed for {}: {}", numeric, e);
            numeric
        }
        Err(e) => {
            tracing::info!("PTR lookup for {} did not complete: {}", numeric, e);
            numeric
        }
    }
}

/// Reverse-resolve an address to a host name
pub fn reverse_lookup(addr: &SocketAddr) -> io::Result<String> {
    let mut host = [0 as libc::c_char; MAX_HOST_LEN];

    let rc = match addr {
        SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            unsafe {
                libc::getnameinfo(
                    &sin as *const libc::sockaddr_in as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_scope_id = v6.scope_id();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            unsafe {
                libc::getnameinfo(
                    &sin6 as *const libc::sockaddr_in6 as *const libc::sockaddr,
                    mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
    };

    if rc != 0 {
        return Err(io::Error::other(format!("getnameinfo returned {}", rc)));
    }

    let name = unsafe { std::ffi::CStr::from_ptr(host.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Result;
    use crate::handler::EchoHandler;
    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (server, peer, client)
    }

    /// Handler that never finishes on its own
    struct Stall;

    #[async_trait]
    impl ConnectionHandler for Stall {
        async fn handle(&self, _conn: Connection) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolve_peer_without_lookup_is_numeric() {
        let peer: SocketAddr = "192.0.2.7:5555".parse().unwrap();
        assert_eq!(resolve_peer(peer, false).await, "192.0.2.7");
    }

    #[tokio::test]
    async fn test_worker_finishes_with_handler() {
        let (server, peer, client) = connected_pair().await;
        let (_tx, rx) = broadcast::channel(1);

        let worker = tokio::spawn(run(1, server, peer, false, Arc::new(EchoHandler), rx));

        let (reader, mut writer) = client.into_split();
        let mut reader = tokio::io::BufReader::new(reader);
        let mut greeting = String::new();
        reader.read_line(&mut greeting).await.unwrap();
        assert_eq!(greeting, "Hello 127.0.0.1\n");
        writer.write_all(b"1").await.unwrap();

        let exit = worker.await.unwrap();
        assert_eq!(exit.id, 1);
        assert_eq!(exit.status, WorkerStatus::Finished);
        assert_eq!(exit.status.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_worker_terminated_by_broadcast() {
        let (server, peer, _client) = connected_pair().await;
        let (tx, rx) = broadcast::channel(1);

        let worker = tokio::spawn(run(2, server, peer, false, Arc::new(Stall), rx));
        tx.send(libc::SIGTERM).unwrap();

        let exit = worker.await.unwrap();
        assert_eq!(exit.status, WorkerStatus::Terminated(ShutdownSignal::Terminate));
        assert_eq!(exit.status.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_worker_rejects_unknown_signal() {
        let (server, peer, _client) = connected_pair().await;
        let (tx, rx) = broadcast::channel(1);

        let worker = tokio::spawn(run(3, server, peer, false, Arc::new(Stall), rx));
        tx.send(libc::SIGHUP).unwrap();

        let exit = worker.await.unwrap();
        assert!(matches!(exit.status, WorkerStatus::Failed(_)));
    }
}
