//! CONNECT tunnel bridge
//!
//! Every CONNECT is bridged to the one configured upstream, whatever target
//! the client asked for. The bridge owns both sockets and drops them together
//! as soon as either direction finishes.

use bytes::Bytes;
use std::io;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::utils::{log_connect_failure, log_connect_success};

/// Success line written to the client before any upstream byte
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Pending,
    Established,
    /// Success line sent; bytes may flow
    Announced,
    Piping,
    Closed,
}

/// Which side ended the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEnd {
    /// Client stopped sending; bytes copied client → upstream
    Client(u64),
    /// Upstream stopped sending; bytes copied upstream → client
    Upstream(u64),
    Shutdown,
}

/// Open a TCP connection to the tunnel target
async fn connect_upstream(target: &str) -> io::Result<TcpStream> {
    let start = Instant::now();
    match TcpStream::connect(target).await {
        Ok(upstream) => {
            let _ = upstream.set_nodelay(true);
            log_connect_success(target, start.elapsed().as_millis());
            Ok(upstream)
        }
        Err(e) => {
            log_connect_failure(target, start.elapsed().as_millis(), &e.to_string());
            Err(e)
        }
    }
}

pub struct TunnelSession<C> {
    client: C,
    upstream: Option<TcpStream>,
    target: String,
    state: TunnelState,
}

impl<C> TunnelSession<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: C, target: impl Into<String>) -> Self {
        Self {
            client,
            upstream: None,
            target: target.into(),
            state: TunnelState::Pending,
        }
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Open the upstream socket. On failure the session is closed and the
    /// client socket is dropped without a response.
    pub async fn connect(&mut self) -> io::Result<()> {
        match connect_upstream(&self.target).await {
            Ok(upstream) => {
                self.upstream = Some(upstream);
                self.state = TunnelState::Established;
                Ok(())
            }
            Err(e) => {
                self.state = TunnelState::Closed;
                Err(e)
            }
        }
    }

    /// Write the success line to the client
    pub async fn announce(&mut self) -> io::Result<()> {
        if self.state != TunnelState::Established {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "tunnel is not established"));
        }
        self.client.write_all(CONNECTION_ESTABLISHED).await?;
        self.client.flush().await?;
        self.state = TunnelState::Announced;
        Ok(())
    }

    /// Flush `head` to the upstream, then copy bytes both ways until one
    /// side closes or errors, or `shutdown` fires.
    pub async fn pipe(mut self, head: Bytes, shutdown: CancellationToken) -> io::Result<TunnelEnd> {
        let mut upstream = match self.upstream.take() {
            Some(upstream) if self.state == TunnelState::Announced => upstream,
            _ => return Err(io::Error::new(io::ErrorKind::NotConnected, "tunnel was not announced")),
        };

        if !head.is_empty() {
            upstream.write_all(&head).await?;
        }
        self.state = TunnelState::Piping;
        debug!("🔁 Piping tunnel to {} ({} buffered bytes flushed)", self.target, head.len());

        let (mut client_read, mut client_write) = tokio::io::split(self.client);
        let (mut upstream_read, mut upstream_write) = upstream.split();

        let end = tokio::select! {
            res = tokio::io::copy(&mut client_read, &mut upstream_write) => TunnelEnd::Client(res?),
            res = tokio::io::copy(&mut upstream_read, &mut client_write) => TunnelEnd::Upstream(res?),
            _ = shutdown.cancelled() => TunnelEnd::Shutdown,
        };

        // Both halves drop here, closing the two sockets together
        let _ = client_write.shutdown().await;
        let _ = upstream_write.shutdown().await;
        debug!("🔌 Tunnel to {} closed: {:?}", self.target, end);

        Ok(end)
    }
}
