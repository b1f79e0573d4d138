//! Upstream client selection
//!
//! Picks the plain or secure transport for a target protocol. Both transports
//! share the optional forwarding agent (the simulation service acting as an
//! HTTP proxy), which is applied regardless of the target host.

use crate::config::settings::ProxyConfig;
use crate::error::{Error, Result};
use crate::proxy::target::{Protocol, TargetDescriptor};
use crate::utils::filter_headers;
use bytes::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{HeaderMap, Method};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    Secure,
}

/// A transport bound to one delivery kind
#[derive(Debug, Clone)]
pub struct Transport {
    pub kind: TransportKind,
    /// Forwarding proxy the request goes through, if any
    pub agent: Option<Url>,
    client: reqwest::Client,
}

/// One forwarding attempt, never reused
#[derive(Debug)]
pub struct UpstreamRequest {
    pub target: TargetDescriptor,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl UpstreamRequest {
    /// Copy method and headers from the inbound request. The host header is
    /// rewritten when `target` is not the configured default origin.
    pub fn new(
        target: TargetDescriptor,
        method: Method,
        inbound_headers: &HeaderMap,
        body: Option<Bytes>,
        default_target: &TargetDescriptor,
    ) -> Self {
        let mut headers = filter_headers(inbound_headers, crate::utils::should_forward_buffered_request_header);
        if !target.same_origin(default_target) {
            if let Ok(host) = HeaderValue::from_str(&target.authority()) {
                headers.insert(header::HOST, host);
            }
        }
        Self {
            target,
            method,
            headers,
            body: body.filter(|b| !b.is_empty()),
        }
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, |b| b.len())
    }
}

impl Transport {
    pub async fn send(&self, request: UpstreamRequest) -> std::result::Result<reqwest::Response, reqwest::Error> {
        let url = request.target.to_url();
        debug!("📡 {:?} transport sending {} {}", self.kind, request.method, url);

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder.send().await
    }
}

/// Protocol-driven transport selector
pub struct UpstreamSelector {
    plain: Transport,
    secure: Transport,
}

impl UpstreamSelector {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let agent = config
            .simulation
            .upstream_proxy
            .as_deref()
            .map(Url::parse)
            .transpose()?;

        let idle_timeout = Duration::from_secs(config.http_client.idle_timeout_secs);
        let max_idle = config.http_client.max_idle_per_host;

        let plain = build_client(TransportKind::Plain, agent.as_ref(), idle_timeout, max_idle)?;
        let secure = build_client(TransportKind::Secure, agent.as_ref(), idle_timeout, max_idle)?;

        match &agent {
            Some(agent) => info!("🚀 Upstream transports initialized (forwarding agent: {})", agent),
            None => info!("🚀 Upstream transports initialized (direct delivery)"),
        }

        Ok(Self {
            plain: Transport { kind: TransportKind::Plain, agent: agent.clone(), client: plain },
            secure: Transport { kind: TransportKind::Secure, agent, client: secure },
        })
    }

    pub fn select(&self, protocol: Protocol) -> &Transport {
        match protocol {
            Protocol::Http => &self.plain,
            Protocol::Https => &self.secure,
        }
    }
}

fn build_client(
    kind: TransportKind,
    agent: Option<&Url>,
    idle_timeout: Duration,
    max_idle_per_host: usize,
) -> Result<reqwest::Client> {
    // The upstream answer is relayed as-is, redirects included
    let mut builder = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_idle_timeout(idle_timeout)
        .pool_max_idle_per_host(max_idle_per_host)
        .no_proxy();

    builder = match kind {
        TransportKind::Plain => builder,
        TransportKind::Secure => builder.https_only(true),
    };

    if let Some(agent) = agent {
        let proxy = match kind {
            TransportKind::Plain => reqwest::Proxy::http(agent.as_str()),
            TransportKind::Secure => reqwest::Proxy::https(agent.as_str()),
        }
        .map_err(|e| Error::Config(format!("Invalid forwarding agent '{}': {}", agent, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to create upstream client: {}", e)))
}
