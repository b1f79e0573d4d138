//! Pooled HTTP client for direct pipes
//!
//! Admin passthrough and the sniffer talk to a fixed endpoint and stream
//! bodies straight through, so they use one shared hyper client with
//! connection pooling instead of the agent-aware upstream transports.

use hyper::client::HttpConnector;
use hyper::{Body, Client, Request, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::time::Duration;
use tracing::{debug, info};

pub type PooledClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Configuration for the pooled client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum idle connections per host (default: 50)
    pub max_idle_per_host: usize,
    /// How long to keep idle connections alive (default: 90 seconds)
    pub idle_timeout: Duration,
    /// Enable TCP keepalive (default: true)
    pub tcp_keepalive: bool,
    /// TCP keepalive interval (default: 30 seconds)
    pub tcp_keepalive_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 50,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: true,
            tcp_keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl ClientConfig {
    pub fn from_config(http_client_config: &crate::config::settings::HttpClientConfig) -> Self {
        Self {
            max_idle_per_host: http_client_config.max_idle_per_host,
            idle_timeout: Duration::from_secs(http_client_config.idle_timeout_secs),
            tcp_keepalive: http_client_config.tcp_keepalive,
            tcp_keepalive_interval: Some(Duration::from_secs(http_client_config.tcp_keepalive_interval_secs)),
        }
    }
}

/// Shared client handling both `http` and `https` endpoints
pub struct HttpClient {
    client: PooledClient,
}

impl HttpClient {
    pub fn with_config(config: ClientConfig) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_nodelay(true);
        if config.tcp_keepalive {
            http_connector.set_keepalive(config.tcp_keepalive_interval);
        }

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder()
            .pool_idle_timeout(config.idle_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(https_connector);

        info!(
            "🚀 Pooled HTTP client initialized (max idle per host: {}, idle timeout: {:?})",
            config.max_idle_per_host, config.idle_timeout
        );

        Self { client }
    }

    pub fn from_config(http_client_config: &crate::config::settings::HttpClientConfig) -> Self {
        Self::with_config(ClientConfig::from_config(http_client_config))
    }

    /// Send a request and return the response with its body still streaming
    pub async fn request(&self, request: Request<Body>) -> Result<Response<Body>, hyper::Error> {
        debug!("📡 Pooled client sending {} {}", request.method(), request.uri());
        self.client.request(request).await
    }
}
