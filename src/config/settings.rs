//! Relay configuration settings

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default configuration file, read when present
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Main configuration for the relay
///
/// Built once at startup and shared read-only by every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Primary proxy listening address
    pub listen_addr: SocketAddr,

    /// Sniffer listening address
    pub sniffer_listen_addr: SocketAddr,

    /// Log level configuration
    pub log_level: String,

    /// Upstream simulation service
    pub simulation: SimulationConfig,

    /// Admin passthrough route
    pub admin: AdminConfig,

    /// Explicit-target capture route
    pub capture: CaptureConfig,

    /// CONNECT tunnel target
    pub tunnel: TunnelConfig,

    /// Sniffer relay target
    pub sniffer: SnifferConfig,

    /// Simulated streaming cadence
    pub streaming: StreamingConfig,

    /// Pooled HTTP client configuration
    pub http_client: HttpClientConfig,

    /// Runtime configuration
    pub runtime: RuntimeConfig,
}

/// Upstream simulation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Base URL request paths are resolved against
    pub base_url: String,

    /// Forwarding proxy every default/capture request is sent through.
    /// `None` sends requests directly to their target.
    pub upstream_proxy: Option<String>,
}

/// Admin passthrough configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Path prefix stripped before forwarding
    pub prefix: String,

    /// Local admin endpoint base URL
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub route: String,
}

/// CONNECT tunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Fixed `host:port` every CONNECT is bridged to, whatever it asked for
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    pub target_base_url: String,
}

/// Simulated streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Bytes per emitted chunk
    pub chunk_size: usize,

    /// Delay between chunks in milliseconds
    pub interval_ms: u64,
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// Enable TCP keepalive
    pub tcp_keepalive: bool,

    /// TCP keepalive interval in seconds
    pub tcp_keepalive_interval_secs: u64,
}

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime mode: "single_threaded" or "multi_threaded"
    pub mode: String,

    /// Number of worker threads for multi-threaded mode (None = auto-detect CPU cores)
    pub worker_threads: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            sniffer_listen_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            log_level: "info".to_string(),
            simulation: SimulationConfig::default(),
            admin: AdminConfig::default(),
            capture: CaptureConfig::default(),
            tunnel: TunnelConfig::default(),
            sniffer: SnifferConfig::default(),
            streaming: StreamingConfig::default(),
            http_client: HttpClientConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://hoverfly:8500".to_string(),
            upstream_proxy: Some("http://hoverfly:8500".to_string()),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            prefix: "/admin".to_string(),
            endpoint: "http://localhost:8888".to_string(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            route: "/capture".to_string(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            target: "hoverfly:8500".to_string(),
        }
    }
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            target_base_url: "http://localhost:8500".to_string(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4,
            interval_ms: 100,
        }
    }
}

impl StreamingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 50,
            idle_timeout_secs: 90,
            tcp_keepalive: true,
            tcp_keepalive_interval_secs: 30,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: "single_threaded".to_string(),
            worker_threads: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))
    }

    /// Load configuration: YAML file (if present), then `.env` and process
    /// environment overrides, then validation.
    ///
    /// An explicitly requested file must exist; the default `config.yml` is optional.
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_yaml_file(DEFAULT_CONFIG_PATH)?,
            None => Self::default(),
        };

        // A missing .env is the normal case
        let _ = dotenvy::dotenv();

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment-style overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PROXY_LISTEN_ADDR") {
            self.listen_addr = addr
                .parse()
                .with_context(|| format!("Invalid PROXY_LISTEN_ADDR '{}'", addr))?;
        }

        if let Some(port) = lookup("PROXY_PORT") {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid PROXY_PORT '{}'", port))?;
            self.listen_addr.set_port(port);
        }

        if let Some(addr) = lookup("SNIFFER_LISTEN_ADDR") {
            self.sniffer_listen_addr = addr
                .parse()
                .with_context(|| format!("Invalid SNIFFER_LISTEN_ADDR '{}'", addr))?;
        }

        if let Some(port) = lookup("SNIFFER_PORT") {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid SNIFFER_PORT '{}'", port))?;
            self.sniffer_listen_addr.set_port(port);
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            self.log_level = log_level;
        }

        if let Some(base_url) = lookup("SIMULATION_BASE_URL") {
            self.simulation.base_url = base_url;
        }

        // An empty value disables the forwarding proxy
        if let Some(proxy) = lookup("UPSTREAM_PROXY_URL") {
            self.simulation.upstream_proxy = Some(proxy).filter(|p| !p.trim().is_empty());
        }

        if let Some(prefix) = lookup("ADMIN_PREFIX") {
            self.admin.prefix = prefix;
        }

        if let Some(endpoint) = lookup("ADMIN_ENDPOINT_URL") {
            self.admin.endpoint = endpoint;
        }

        if let Some(route) = lookup("CAPTURE_ROUTE") {
            self.capture.route = route;
        }

        if let Some(target) = lookup("TUNNEL_TARGET") {
            self.tunnel.target = target;
        }

        if let Some(target) = lookup("SNIFFER_TARGET_BASE_URL") {
            self.sniffer.target_base_url = target;
        }

        if let Some(size) = lookup("STREAM_CHUNK_SIZE") {
            self.streaming.chunk_size = size
                .parse()
                .with_context(|| format!("Invalid STREAM_CHUNK_SIZE '{}'", size))?;
        }

        if let Some(interval) = lookup("STREAM_INTERVAL_MS") {
            self.streaming.interval_ms = interval
                .parse()
                .with_context(|| format!("Invalid STREAM_INTERVAL_MS '{}'", interval))?;
        }

        if let Some(mode) = lookup("PROXY_RUNTIME_MODE") {
            self.runtime.mode = mode;
        }

        if let Some(threads) = lookup("PROXY_WORKER_THREADS") {
            let count = threads
                .parse::<usize>()
                .with_context(|| format!("Invalid PROXY_WORKER_THREADS '{}'", threads))?;
            self.runtime.worker_threads = Some(count);
        }

        Ok(())
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        validate_http_url("simulation.base_url", &self.simulation.base_url)?;
        if let Some(proxy) = &self.simulation.upstream_proxy {
            validate_http_url("simulation.upstream_proxy", proxy)?;
        }
        validate_http_url("admin.endpoint", &self.admin.endpoint)?;
        validate_http_url("sniffer.target_base_url", &self.sniffer.target_base_url)?;

        if !self.admin.prefix.starts_with('/') || self.admin.prefix.len() < 2 {
            bail!("admin.prefix must start with '/' and name a segment, got '{}'", self.admin.prefix);
        }
        if !self.capture.route.starts_with('/') {
            bail!("capture.route must start with '/', got '{}'", self.capture.route);
        }

        match self.tunnel.target.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => bail!("tunnel.target must be host:port, got '{}'", self.tunnel.target),
        }

        if self.streaming.chunk_size == 0 {
            bail!("streaming.chunk_size must be greater than zero");
        }

        match self.runtime.mode.as_str() {
            "single_threaded" | "multi_threaded" => {}
            other => bail!("runtime.mode must be single_threaded or multi_threaded, got '{}'", other),
        }

        Ok(())
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value).with_context(|| format!("{} is not a valid URL: '{}'", field, value))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        bail!("{} must be an absolute http(s) URL, got '{}'", field, value);
    }
    Ok(())
}
