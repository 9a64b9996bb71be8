//! TCP listener construction
//!
//! Binds the wildcard IPv4 address on the configured port. When DNS lookups
//! are enabled the local host name must resolve, otherwise binding fails.

use std::io;
use tokio::net::TcpListener;

use crate::common::{Error, Result};

/// Get this machine's host name
pub fn hostname() -> io::Result<String> {
    let mut buf = [0u8; 256];
    let res = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if res != 0 {
        return Err(io::Error::last_os_error());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

/// Bind a listening socket on `port`
pub async fn bind(port: u16, dns_lookups: bool) -> Result<TcpListener> {
    let host = hostname().map_err(|source| Error::Bind { port, source })?;

    if dns_lookups {
        let mut addrs = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|source| Error::Bind { port, source })?;
        if addrs.next().is_none() {
            tracing::info!(host = %host, "gethostbyname: Unknown host");
            return Err(Error::Bind {
                port,
                source: io::Error::new(io::ErrorKind::NotFound, format!("unknown host {}", host)),
            });
        }
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|source| Error::Bind { port, source })?;

    let local_addr = listener
        .local_addr()
        .map_err(|source| Error::Bind { port, source })?;

    tracing::info!(
        host = %host,
        address = %local_addr,
        "{} listening on port {}",
        host,
        local_addr.port()
    );

    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_not_empty() {
        let name = hostname().unwrap();
        assert!(!name.is_empty());
    }

    #[tokio::test]
    async fn test_bind_port_conflict_is_bind_error() {
        let first = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let port = first.local_addr().unwrap().port();

        let err = bind(port, false).await.unwrap_err();
        assert!(matches!(err, Error::Bind { port: p, .. } if p == port));
    }
}
