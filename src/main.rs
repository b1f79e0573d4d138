//! Main entry point for Hover Relay

use clap::{Parser, Subcommand};
use hover_relay::{
    cli::{ProxyArgs, SnifferArgs},
    init_logger_with_config, log_error, log_info,
    runtime::run_with_runtime,
    ProxyConfig,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hover-relay")]
#[command(about = "HTTP relay in front of a traffic simulation service")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to ./config.yml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay (default)
    #[command(name = "proxy")]
    Proxy(ProxyArgs),

    /// Start the sniffer relay
    #[command(name = "sniffer")]
    Sniffer(SnifferArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ProxyConfig::load_config(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {:#}", e);
        std::process::exit(1);
    });

    if cli.verbose {
        config.log_level = "debug".to_string();
    } else if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    init_logger_with_config(&config.log_level);

    let runtime_config = config.runtime.clone();
    run_with_runtime(&runtime_config, async_main(cli, config))
}

async fn async_main(cli: Cli, config: ProxyConfig) -> anyhow::Result<()> {
    log_info!("📋 Version: {}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl-C received, shutting down");
            signal_token.cancel();
        }
    });

    let result = match cli.command {
        Some(Commands::Sniffer(args)) => {
            log_info!("🔍 Starting Hover Relay sniffer");
            args.start_server(config, shutdown).await
        }
        Some(Commands::Proxy(args)) => {
            log_info!("🚀 Starting Hover Relay");
            args.start_server(config, shutdown).await
        }
        None => {
            log_info!("🚀 Starting Hover Relay (default configuration)");
            log_info!("💡 Use --help to see available commands");
            ProxyArgs::default().start_server(config, shutdown).await
        }
    };

    if let Err(e) = &result {
        log_error!("Server error: {:#}", e);
        error!("Failed to start server: {:#}", e);
    }
    result
}
