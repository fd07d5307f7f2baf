//! TCP listener and connector.
//!
//! # Example
//!
//! ```ignore
//! use clipswire::transport::{connect, Listener};
//!
//! let listener = Listener::bind("127.0.0.1", 0).await?;
//! let client = connect("127.0.0.1", listener.local_addr()?.port()).await?;
//! let (stream, endpoint) = listener.accept().await?;
//! ```

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::error::Result;

/// Textual identity of a socket address, as used for session keys.
#[inline]
pub fn endpoint_of(addr: &SocketAddr) -> String {
    addr.to_string()
}

/// TCP listener handing out connected streams with their endpoint identity.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    /// Bind to `host:port`. Port 0 picks an ephemeral port.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        Ok(Self { listener })
    }

    /// Accept a single connection.
    ///
    /// Returns the stream with Nagle disabled and the remote endpoint string.
    pub async fn accept(&self) -> Result<(TcpStream, String)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        let endpoint = endpoint_of(&addr);
        debug!(%endpoint, "accepted connection");
        Ok((stream, endpoint))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Connect to a bridge server at `host:port`.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_accept_reports_peer_endpoint() {
        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut client = connect("127.0.0.1", port).await.unwrap();
        let (mut server, endpoint) = listener.accept().await.unwrap();

        assert_eq!(endpoint, endpoint_of(&client.local_addr().unwrap()));
        assert!(endpoint.starts_with("127.0.0.1:"));

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = Listener::bind("127.0.0.1", 0).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(connect("127.0.0.1", port).await.is_err());
    }
}
