//! Accept with error filtering
//!
//! `accept()` reports many errors that only mean "this connection went away
//! before we got to it". Those are squashed into a transient error and the
//! accept loop moves on. Anything else is treated as fatal.

use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

use crate::common::{Error, ErrorClass, Result};

/// Errno values which mean "no connection this time"
const TRANSIENT_ERRNOS: &[i32] = &[
    libc::ECONNREFUSED,
    libc::ECONNRESET,
    libc::ECONNABORTED,
    libc::EHOSTDOWN,
    libc::EHOSTUNREACH,
    libc::EINTR,
    libc::ENETDOWN,
    libc::ENETUNREACH,
    libc::ENOTCONN,
    libc::EWOULDBLOCK,
    libc::EAGAIN,
];

/// Classify an accept error as transient or fatal
pub fn classify(err: &io::Error) -> ErrorClass {
    if let Some(code) = err.raw_os_error() {
        return if TRANSIENT_ERRNOS.contains(&code) {
            ErrorClass::Transient
        } else {
            ErrorClass::Fatal
        };
    }

    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Accept one connection, mapping errors onto the daemon's taxonomy
///
/// Returns `Error::AcceptTransient` for squashed errors and `Error::Accept`
/// for everything else.
pub async fn filtered_accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    match listener.accept().await {
        Ok(accepted) => Ok(accepted),
        Err(e) => match classify(&e) {
            ErrorClass::Transient => {
                tracing::trace!("Squashed accept error: {}", e);
                Err(Error::AcceptTransient(e))
            }
            _ => Err(Error::Accept(e)),
        },
    }
}
