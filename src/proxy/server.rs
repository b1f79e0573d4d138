//! Primary listener
//!
//! Reads the first bytes of each request. A `CONNECT` is tunnelled directly on
//! the raw socket; anything else is replayed into hyper, served one request at
//! a time, and handed to the [`Dispatcher`].

use crate::config::settings::ProxyConfig;
use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::rewind::Rewind;
use crate::proxy::tunnel::TunnelSession;
use crate::utils::log_connect_request;
use crate::{log_debug, log_info};
use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Request};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONNECT_PREFIX: &[u8] = b"CONNECT ";

/// Largest CONNECT request head accepted before the connection is dropped
const MAX_CONNECT_HEAD: usize = 8192;

pub struct ProxyServer {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
}

impl ProxyServer {
    /// Bind the configured listen address and build the dispatcher
    pub async fn bind(config: Arc<ProxyConfig>) -> Result<Self> {
        let listen_addr = config.listen_addr;
        let dispatcher = Dispatcher::new(config).context("Failed to initialize request dispatcher")?;
        let listener = TcpListener::bind(listen_addr)
            .await
            .with_context(|| format!("Failed to bind proxy listener on {}", listen_addr))?;

        Ok(Self {
            listener,
            dispatcher: Arc::new(dispatcher),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!("🚀 Relay listening on {}", local_addr);
        log_info!("Relay starting on {}", local_addr);
        log_debug!(
            "Routes: admin prefix {} → {}, capture {}, default → {}, CONNECT → {}",
            self.dispatcher.config().admin.prefix,
            self.dispatcher.config().admin.endpoint,
            self.dispatcher.config().capture.route,
            self.dispatcher.config().simulation.base_url,
            self.dispatcher.config().tunnel.target
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("🛑 Relay on {} shutting down", local_addr);
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let _ = stream.set_nodelay(true);
                        log_debug!("New connection from: {}", remote_addr);
                        let dispatcher = Arc::clone(&self.dispatcher);
                        let shutdown = shutdown.child_token();
                        tokio::spawn(handle_connection(stream, remote_addr, dispatcher, shutdown));
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    remote_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(1024);

    // Each request is served on its own so a later CONNECT still reaches the raw socket
    loop {
        tokio::select! {
            res = read_prefix(&mut stream, &mut buf) => {
                if let Err(e) = res {
                    debug!("Connection from {} failed before a request: {}", remote_addr, e);
                    return;
                }
            }
            _ = shutdown.cancelled() => return,
        }
        if buf.is_empty() {
            return;
        }

        if buf.starts_with(CONNECT_PREFIX) {
            handle_connect(stream, buf, remote_addr, &dispatcher.config().tunnel.target, shutdown).await;
            return;
        }

        match serve_request(stream, buf.split().freeze(), remote_addr, &dispatcher, &shutdown).await {
            Some((next_stream, unread)) => {
                stream = next_stream;
                buf = unread;
            }
            None => return,
        }
    }
}

/// Serve a single request through hyper, then hand back the socket together
/// with whatever the client already sent after it
async fn serve_request(
    stream: TcpStream,
    prefix: Bytes,
    remote_addr: SocketAddr,
    dispatcher: &Arc<Dispatcher>,
    shutdown: &CancellationToken,
) -> Option<(TcpStream, BytesMut)> {
    let dispatcher = Arc::clone(dispatcher);
    let service = service_fn(move |req: Request<Body>| {
        let dispatcher = Arc::clone(&dispatcher);
        Box::pin(async move { dispatcher.dispatch(req, remote_addr).await })
    });

    let connection = Http::new()
        .http1_only(true)
        .http1_keep_alive(false)
        .serve_connection(Rewind::new(prefix, stream), service)
        .without_shutdown();

    let parts = tokio::select! {
        res = connection => match res {
            Ok(parts) => parts,
            Err(e) => {
                debug!("Connection from {} ended: {}", remote_addr, e);
                return None;
            }
        },
        _ = shutdown.cancelled() => {
            debug!("Closing connection from {} on shutdown", remote_addr);
            return None;
        }
    };

    let read_buf = parts.read_buf;
    let (unread, stream) = parts.io.into_parts();
    let mut buf = BytesMut::with_capacity(read_buf.len() + unread.len());
    buf.extend_from_slice(&read_buf);
    buf.extend_from_slice(&unread);
    Some((stream, buf))
}

/// Read until the prefix either is or cannot be `CONNECT `, or EOF
async fn read_prefix(stream: &mut TcpStream, buf: &mut BytesMut) -> io::Result<()> {
    while buf.len() < CONNECT_PREFIX.len() && CONNECT_PREFIX.starts_with(&buf[..]) {
        if stream.read_buf(buf).await? == 0 {
            break;
        }
    }
    Ok(())
}

/// Tunnel a connection whose next request is CONNECT
async fn handle_connect(
    mut stream: TcpStream,
    mut buf: BytesMut,
    remote_addr: SocketAddr,
    target: &str,
    shutdown: CancellationToken,
) {
    let (requested, head) = match read_connect_head(&mut stream, &mut buf).await {
        Ok(Some(parsed)) => parsed,
        Ok(None) => {
            warn!("Dropping malformed CONNECT from {}", remote_addr);
            return;
        }
        Err(e) => {
            debug!("CONNECT from {} failed while reading head: {}", remote_addr, e);
            return;
        }
    };
    log_connect_request(&requested, target, &remote_addr);

    let mut session = TunnelSession::new(stream, target);
    // Dropping the session on failure closes the client socket unanswered
    if session.connect().await.is_err() {
        return;
    }
    if let Err(e) = session.announce().await {
        debug!("Client {} went away before the tunnel opened: {}", remote_addr, e);
        return;
    }
    if let Err(e) = session.pipe(head, shutdown).await {
        debug!("Tunnel for {} ended with error: {}", remote_addr, e);
    }
}

enum ConnectHead {
    Partial,
    Complete { header_len: usize, requested: String },
    Invalid,
}

fn parse_connect_head(buf: &[u8]) -> ConnectHead {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Partial) => ConnectHead::Partial,
        Ok(httparse::Status::Complete(header_len)) => match (req.method, req.path) {
            (Some("CONNECT"), Some(path)) if !path.is_empty() => ConnectHead::Complete {
                header_len,
                requested: path.to_string(),
            },
            _ => ConnectHead::Invalid,
        },
        Err(_) => ConnectHead::Invalid,
    }
}

/// Read the CONNECT request head. Returns the requested authority and any
/// bytes the client sent past the head.
async fn read_connect_head(stream: &mut TcpStream, buf: &mut BytesMut) -> io::Result<Option<(String, Bytes)>> {
    loop {
        match parse_connect_head(&buf[..]) {
            ConnectHead::Complete { header_len, requested } => {
                let _ = buf.split_to(header_len);
                return Ok(Some((requested, buf.split().freeze())));
            }
            ConnectHead::Invalid => return Ok(None),
            ConnectHead::Partial => {}
        }
        if buf.len() >= MAX_CONNECT_HEAD {
            return Ok(None);
        }
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
    }
}
