//! Request dispatcher
//!
//! Every inbound request is matched against an ordered list of routes, first
//! match wins:
//!
//! 1. `CONNECT` → tunnel to the fixed upstream
//! 2. admin prefix → strip the prefix, direct pipe to the admin endpoint
//! 3. capture route → forward to `x-target-url`, direct pipe
//! 4. valid endpoint path → forward to the simulation service, simulated stream
//! 5. anything else → 404
//!
//! Each branch ends in exactly one client response; errors are converted to
//! responses here and never escape. CONNECT is tunnelled by the listener before
//! a request reaches hyper, so a CONNECT here is a service error and hyper
//! drops the connection unanswered.

use crate::config::settings::ProxyConfig;
use crate::error::{Error, Result};
use crate::proxy::http_client::HttpClient;
use crate::proxy::selector::{UpstreamRequest, UpstreamSelector};
use crate::proxy::streaming::{BufferedResponse, RelayConfig};
use crate::proxy::target::{TargetDescriptor, TargetResolver, TARGET_URL_HEADER};
use crate::utils::{
    append_path, filter_headers, log_forwarding_request, log_headers_structured, log_http_failure,
    log_http_success, log_incoming_request, method_carries_body, should_forward_request_header,
    should_forward_response_header,
};
use bytes::Bytes;
use hyper::{Body, Method, Request, Response, Uri};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use url::Url;

/// Route chosen for one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Tunnel,
    Admin { forward_path: String },
    Capture,
    Forward(TargetDescriptor),
    NotFound(String),
}

pub struct Dispatcher {
    config: Arc<ProxyConfig>,
    resolver: TargetResolver,
    selector: UpstreamSelector,
    admin_client: HttpClient,
    admin_endpoint: Url,
    relay: RelayConfig,
}

impl Dispatcher {
    pub fn new(config: Arc<ProxyConfig>) -> Result<Self> {
        let resolver = TargetResolver::new(&config.simulation.base_url)?;
        let selector = UpstreamSelector::from_config(&config)?;
        let admin_client = HttpClient::from_config(&config.http_client);
        let admin_endpoint = Url::parse(&config.admin.endpoint)?;
        let relay = RelayConfig::from_config(&config.streaming);

        Ok(Self {
            config,
            resolver,
            selector,
            admin_client,
            admin_endpoint,
            relay,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Pick the route for a request. Pure; no I/O.
    pub fn classify(&self, method: &Method, uri: &Uri) -> Route {
        if method == Method::CONNECT {
            return Route::Tunnel;
        }

        let path = uri.path();
        if let Some(forward_path) = strip_admin_prefix(path, &self.config.admin.prefix) {
            let forward_path = match uri.query() {
                Some(query) => format!("{}?{}", forward_path, query),
                None => forward_path.to_string(),
            };
            return Route::Admin { forward_path };
        }

        if path == self.config.capture.route {
            return Route::Capture;
        }

        match self.resolver.resolve_path(&uri.to_string()) {
            Ok(target) => Route::Forward(target),
            Err(Error::NotFound(path)) => Route::NotFound(path),
            Err(_) => Route::NotFound(path.to_string()),
        }
    }

    /// Run one request to completion
    pub async fn dispatch(&self, req: Request<Body>, remote_addr: SocketAddr) -> Result<Response<Body>> {
        let start_time = Instant::now();
        let method = req.method().clone();
        let uri = req.uri().to_string();
        log_incoming_request(method.as_str(), &uri, &remote_addr);

        let result = match self.classify(req.method(), req.uri()) {
            Route::Tunnel => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "CONNECT must be tunnelled by the listener",
                )))
            }
            Route::Admin { forward_path } => self.handle_admin(req, &forward_path).await,
            Route::Capture => self.handle_capture(req).await,
            Route::Forward(target) => self.handle_forward(req, target).await,
            Route::NotFound(path) => Err(Error::NotFound(path)),
        };

        let elapsed = start_time.elapsed().as_millis();
        Ok(match result {
            Ok(response) => {
                log_http_success(method.as_str(), &uri, response.status(), elapsed);
                response
            }
            Err(e) => {
                log_http_failure(method.as_str(), &uri, e.status_code(), elapsed, &e);
                e.into_response()
            }
        })
    }

    /// Admin passthrough: method, headers and body stream go to the admin
    /// endpoint untouched, and its response comes back the same way.
    async fn handle_admin(&self, req: Request<Body>, forward_path: &str) -> Result<Response<Body>> {
        let target = append_path(&self.admin_endpoint, forward_path);
        log_forwarding_request(req.method().as_str(), &target, None, 0);

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&target);
        if let Some(headers) = builder.headers_mut() {
            *headers = filter_headers(&parts.headers, should_forward_request_header);
        }
        let request = builder
            .body(body)
            .map_err(|e| Error::upstream("admin endpoint", e))?;

        let response = self
            .admin_client
            .request(request)
            .await
            .map_err(|e| Error::upstream("admin endpoint", e))?;

        Ok(direct_pipe(response))
    }

    /// Capture: forward to the URL named by `x-target-url`, pipe the answer back
    async fn handle_capture(&self, req: Request<Body>) -> Result<Response<Body>> {
        let (parts, body) = req.into_parts();
        let body = read_body(body).await?;

        let header = parts
            .headers
            .get(TARGET_URL_HEADER)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .filter(|v| !v.trim().is_empty())
            .ok_or(Error::MissingTarget)?;
        let target = self.resolver.resolve(&parts.uri.to_string(), Some(header.as_str()))?;

        let body = if method_carries_body(&parts.method) { Some(body) } else { None };
        let mut request = UpstreamRequest::new(
            target,
            parts.method,
            &parts.headers,
            body,
            self.resolver.default_target(),
        );
        request.headers.remove(TARGET_URL_HEADER);

        let transport = self.selector.select(request.target.protocol);
        log_forwarding_request(
            request.method.as_str(),
            &request.target.to_url(),
            transport.agent.as_ref().map(|a| a.as_str()),
            request.body_len(),
        );

        let response = transport
            .send(request)
            .await
            .map_err(|e| Error::CaptureFailed(e.to_string()))?;

        info!("📤 Capture upstream response: {}", response.status());
        let mut builder = Response::builder().status(response.status());
        if let Some(headers) = builder.headers_mut() {
            *headers = filter_headers(response.headers(), should_forward_response_header);
        }
        builder
            .body(Body::wrap_stream(response.bytes_stream()))
            .map_err(|e| Error::CaptureFailed(e.to_string()))
    }

    /// Default forward: full request body, one upstream exchange, full
    /// response body, then the simulated stream.
    async fn handle_forward(&self, req: Request<Body>, target: TargetDescriptor) -> Result<Response<Body>> {
        let (parts, body) = req.into_parts();
        let body = read_body(body).await?;

        let request = UpstreamRequest::new(
            target,
            parts.method,
            &parts.headers,
            Some(body),
            self.resolver.default_target(),
        );
        let transport = self.selector.select(request.target.protocol);
        log_forwarding_request(
            request.method.as_str(),
            &request.target.to_url(),
            transport.agent.as_ref().map(|a| a.as_str()),
            request.body_len(),
        );

        let upstream_start = Instant::now();
        let response = transport
            .send(request)
            .await
            .map_err(|e| Error::upstream("simulation service", e))?;

        let buffered = BufferedResponse::collect(response)
            .await
            .map_err(|e| Error::upstream("simulation service", e))?;
        info!(
            "📤 Upstream response: {} ({} bytes, {:.2} ms)",
            buffered.status,
            buffered.body.len(),
            upstream_start.elapsed().as_secs_f64() * 1000.0
        );
        log_headers_structured(&buffered.headers, "Upstream Response Headers");

        Ok(buffered.into_simulated_stream(&self.relay))
    }
}

/// Remaining path after stripping exactly one `prefix` segment.
/// `/admin` maps to `/`; `/administrator` does not match.
pub fn strip_admin_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix.trim_end_matches('/'))?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// Read the complete inbound body
async fn read_body(body: Body) -> Result<Bytes> {
    hyper::body::to_bytes(body)
        .await
        .map_err(|e| Error::ClientStream(e.to_string()))
}

/// Status, headers and body of an upstream response, unbuffered
fn direct_pipe(response: Response<Body>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    parts.headers = filter_headers(&parts.headers, should_forward_response_header);
    Response::from_parts(parts, body)
}
