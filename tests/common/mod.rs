//! Shared utilities for integration testing.

#![allow(dead_code)]

use hover_relay::{ProxyConfig, ProxyServer, SnifferServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A request as seen by a mock upstream
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Read one request head plus a content-length body
async fn read_request(socket: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(RecordedRequest { request_line, headers, body })
}

/// Start a mock upstream that answers every request with `status` and `body`
/// and reports each request it saw.
pub async fn start_mock_upstream(status: u16, body: &'static str) -> (SocketAddr, mpsc::UnboundedReceiver<RecordedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(request) = read_request(&mut socket).await {
                    let _ = tx.send(request);
                    let response = format!(
                        "HTTP/1.1 {} Mock\r\nContent-Type: text/plain\r\nX-Mock: yes\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
        }
    });

    (addr, rx)
}

/// Start a raw TCP upstream that echoes every byte back
pub async fn start_echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// An address nothing is listening on
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Relay config on an ephemeral port, pointed at local mocks
pub fn test_config(simulation: SocketAddr, admin: SocketAddr, tunnel: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.sniffer_listen_addr = "127.0.0.1:0".parse().unwrap();
    config.simulation.base_url = format!("http://{}", simulation);
    config.simulation.upstream_proxy = None;
    config.admin.endpoint = format!("http://{}", admin);
    config.tunnel.target = tunnel.to_string();
    config.sniffer.target_base_url = format!("http://{}", simulation);
    config.streaming.interval_ms = 1;
    config
}

pub async fn start_relay(config: ProxyConfig) -> (SocketAddr, CancellationToken) {
    let server = ProxyServer::bind(Arc::new(config)).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));
    (addr, shutdown)
}

pub async fn start_sniffer(config: ProxyConfig) -> (SocketAddr, CancellationToken) {
    let server = SnifferServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(shutdown.clone()));
    (addr, shutdown)
}

/// Test client that never picks up proxy settings from the environment
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Read from a raw socket until `needle` shows up, returning everything read
pub async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let read = async {
        while !String::from_utf8_lossy(&buf).contains(needle) {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "socket closed before {:?}: {:?}", needle, String::from_utf8_lossy(&buf));
            buf.extend_from_slice(&chunk[..n]);
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), read).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}
