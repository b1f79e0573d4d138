//! Server CLI commands

use crate::config::settings::ProxyConfig;
use crate::proxy::{ProxyServer, SnifferServer};
use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Default, Args)]
pub struct ProxyArgs {
    /// Relay listening address
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,

    /// Simulation service base URL
    #[arg(long)]
    pub simulation_url: Option<String>,

    /// Forwarding proxy for outbound requests ("" disables it)
    #[arg(long)]
    pub upstream_proxy: Option<String>,

    /// Admin endpoint base URL
    #[arg(long)]
    pub admin_endpoint: Option<String>,

    /// host:port every CONNECT is tunnelled to
    #[arg(long)]
    pub tunnel_target: Option<String>,

    /// Bytes per simulated stream chunk
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Milliseconds between simulated stream chunks
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

impl ProxyArgs {
    /// Apply CLI overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut ProxyConfig) -> Result<()> {
        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(url) = &self.simulation_url {
            config.simulation.base_url = url.clone();
        }
        if let Some(proxy) = &self.upstream_proxy {
            config.simulation.upstream_proxy = Some(proxy.clone()).filter(|p| !p.trim().is_empty());
        }
        if let Some(endpoint) = &self.admin_endpoint {
            config.admin.endpoint = endpoint.clone();
        }
        if let Some(target) = &self.tunnel_target {
            config.tunnel.target = target.clone();
        }
        if let Some(size) = self.chunk_size {
            config.streaming.chunk_size = size;
        }
        if let Some(interval) = self.interval_ms {
            config.streaming.interval_ms = interval;
        }

        debug!("ProxyConfig after CLI overrides: {:?}", config);
        config.validate()
    }

    /// Start the relay and serve until `shutdown` fires
    pub async fn start_server(&self, mut config: ProxyConfig, shutdown: CancellationToken) -> Result<()> {
        self.apply(&mut config)?;

        info!("📋 Relay Configuration:");
        info!("   Listen: {}", config.listen_addr);
        info!("   Simulation service: {}", config.simulation.base_url);
        match &config.simulation.upstream_proxy {
            Some(proxy) => info!("   Forwarding proxy: {}", proxy),
            None => info!("   Forwarding proxy: disabled"),
        }
        info!("   Admin: {} → {}", config.admin.prefix, config.admin.endpoint);
        info!("   Capture route: {}", config.capture.route);
        info!("   CONNECT target: {}", config.tunnel.target);
        info!(
            "   Streaming: {} bytes every {}ms",
            config.streaming.chunk_size, config.streaming.interval_ms
        );

        let server = ProxyServer::bind(Arc::new(config))
            .await
            .context("Failed to start relay")?;
        server.run(shutdown).await
    }
}

#[derive(Debug, Default, Args)]
pub struct SnifferArgs {
    /// Sniffer listening address
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,

    /// Base URL every request is relayed to
    #[arg(long)]
    pub target: Option<String>,
}

impl SnifferArgs {
    pub fn apply(&self, config: &mut ProxyConfig) -> Result<()> {
        if let Some(addr) = self.listen_addr {
            config.sniffer_listen_addr = addr;
        }
        if let Some(target) = &self.target {
            config.sniffer.target_base_url = target.clone();
        }
        config.validate()
    }

    pub async fn start_server(&self, mut config: ProxyConfig, shutdown: CancellationToken) -> Result<()> {
        self.apply(&mut config)?;

        info!("📋 Sniffer Configuration:");
        info!("   Listen: {}", config.sniffer_listen_addr);
        info!("   Target: {}", config.sniffer.target_base_url);

        let server = SnifferServer::bind(&config)
            .await
            .context("Failed to start sniffer")?;
        server.run(shutdown).await
    }
}
