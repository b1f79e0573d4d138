//! Sniffer relay
//!
//! A second listener that relays every request to a fixed target, unchanged
//! apart from the host, and logs the full request/response pair.

use crate::config::settings::ProxyConfig;
use crate::error::{Error, Result as RelayResult};
use crate::log_proxy_transaction;
use crate::models::{ProxyLog, RequestData, ResponseData};
use crate::proxy::http_client::HttpClient;
use crate::utils::{
    append_path, filter_headers, host_header_value, log_forwarding_request, log_http_failure, log_http_success,
    log_incoming_request, should_forward_buffered_request_header, should_forward_response_header,
};
use anyhow::{Context, Result};
use bytes::Bytes;
use hyper::http::request::Parts;
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::{make_service_fn, service_fn};
use hyper::header::{self, HeaderValue};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

struct SnifferState {
    client: HttpClient,
    target: Url,
}

pub struct SnifferServer {
    listener: TcpListener,
    state: Arc<SnifferState>,
}

impl SnifferServer {
    pub async fn bind(config: &ProxyConfig) -> Result<Self> {
        let target = Url::parse(&config.sniffer.target_base_url)
            .with_context(|| format!("Invalid sniffer target '{}'", config.sniffer.target_base_url))?;
        let listener = TcpListener::bind(config.sniffer_listen_addr)
            .await
            .with_context(|| format!("Failed to bind sniffer listener on {}", config.sniffer_listen_addr))?;

        Ok(Self {
            listener,
            state: Arc::new(SnifferState {
                client: HttpClient::from_config(&config.http_client),
                target,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `shutdown` fires, then finish in-flight requests
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let local_addr = self.local_addr()?;
        info!("🔍 Sniffer listening on {} → {}", local_addr, self.state.target);

        let state = self.state;
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            let state = Arc::clone(&state);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(relay(&state, req, remote_addr).await) }
                }))
            }
        });

        let incoming = AddrIncoming::from_listener(self.listener)?;
        let server = Server::builder(incoming)
            .serve(make_svc)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });

        if let Err(e) = server.await {
            error!("Sniffer server error: {}", e);
        }
        info!("🛑 Sniffer on {} stopped", local_addr);

        Ok(())
    }
}

/// Relay one request and log the exchange
async fn relay(state: &SnifferState, req: Request<Body>, remote_addr: SocketAddr) -> Response<Body> {
    let start_time = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().to_string();
    log_incoming_request(method.as_str(), &uri, &remote_addr);

    let (parts, body) = req.into_parts();
    let request_data = RequestData::new(&parts.method, &parts.uri, remote_addr).with_headers(&parts.headers);

    let (request_data, result) = match hyper::body::to_bytes(body).await {
        Ok(body) => (request_data.with_body(&body), forward(state, parts, body).await),
        Err(e) => (request_data, Err(Error::ClientStream(e.to_string()))),
    };
    let elapsed = start_time.elapsed().as_millis();

    match result {
        Ok((response, response_data)) => {
            log_http_success(method.as_str(), &uri, response.status(), elapsed);
            log_proxy_transaction!(&ProxyLog {
                request: request_data,
                response: Some(response_data),
                error: None,
            });
            response
        }
        Err(e) => {
            log_http_failure(method.as_str(), &uri, e.status_code(), elapsed, &e);
            log_proxy_transaction!(&ProxyLog {
                request: request_data,
                response: None,
                error: Some(e.to_string()),
            });
            e.into_response()
        }
    }
}

async fn forward(state: &SnifferState, parts: Parts, body: Bytes) -> RelayResult<(Response<Body>, ResponseData)> {
    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let target = append_path(&state.target, path_and_query);
    log_forwarding_request(parts.method.as_str(), &target, None, body.len());

    let mut headers = filter_headers(&parts.headers, should_forward_buffered_request_header);
    if let Some(host) = host_header_value(&state.target).and_then(|h| HeaderValue::from_str(&h).ok()) {
        headers.insert(header::HOST, host);
    }

    let mut builder = Request::builder().method(parts.method).uri(&target);
    if let Some(request_headers) = builder.headers_mut() {
        *request_headers = headers;
    }
    let request = builder
        .body(Body::from(body))
        .map_err(|e| Error::upstream("sniffer target", e))?;

    let upstream_start = Instant::now();
    let response = state
        .client
        .request(request)
        .await
        .map_err(|e| Error::upstream("sniffer target", e))?;

    let (mut parts, body) = response.into_parts();
    let body = hyper::body::to_bytes(body)
        .await
        .map_err(|e| Error::upstream("sniffer target", e))?;
    let response_data = ResponseData::new(
        parts.status,
        &parts.headers,
        &body,
        upstream_start.elapsed().as_millis() as u64,
    );

    parts.headers = filter_headers(&parts.headers, should_forward_response_header);
    Ok((Response::from_parts(parts, Body::from(body)), response_data))
}
