//! Per-connection protocol handlers
//!
//! The daemon core knows nothing about the protocol spoken on a connection.
//! A handler receives both directions of an admitted connection plus the
//! resolved peer identity and runs the conversation to completion. The worker
//! running it terminates as soon as the handler returns.

mod echo;

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::common::Result;

pub use echo::EchoHandler;

/// An admitted connection, handed to exactly one handler invocation
pub struct Connection {
    /// Client to server direction
    pub reader: BufReader<OwnedReadHalf>,
    /// Server to client direction
    pub writer: OwnedWriteHalf,
    /// Numeric address of the peer
    pub peer_addr: SocketAddr,
    /// Host name of the peer, or its numeric address when not resolved
    pub peer_name: String,
}

/// Business logic for one connection
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Run the conversation with one client to completion
    async fn handle(&self, conn: Connection) -> Result<()>;
}
