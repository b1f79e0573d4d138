//! Hover Relay - an HTTP relay in front of a traffic simulation service
//!
//! This library provides the relay listener (admin passthrough, explicit-target
//! capture, simulated streaming of default traffic, CONNECT tunnelling), the
//! sniffer relay, and their logging and configuration.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod utils;

// Re-export commonly used items
pub use config::settings::ProxyConfig;
pub use error::{Error, Result};
pub use logging::{init_logger_with_config, log_debug, log_error, log_info, log_trace, log_warning};
pub use models::{ProxyLog, RequestData, ResponseData};
pub use proxy::{Dispatcher, ProxyServer, SnifferServer};

/// Runtime utilities for creating single-threaded vs multi-threaded Tokio runtimes
pub mod runtime {
    use crate::config::settings::RuntimeConfig;
    use anyhow::{bail, Context, Result};
    use tokio::runtime::{Builder, Runtime};

    /// Create a Tokio runtime based on the configuration
    pub fn create_runtime(config: &RuntimeConfig) -> Result<Runtime> {
        match config.mode.as_str() {
            "single_threaded" => {
                tracing::info!("🧵 Initializing single-threaded runtime");
                Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to create single-threaded runtime")
            }
            "multi_threaded" => {
                let mut builder = Builder::new_multi_thread();
                builder.enable_all();

                match config.worker_threads {
                    Some(threads) if threads > 0 => {
                        tracing::info!("🧵 Initializing multi-threaded runtime with {} worker threads", threads);
                        builder.worker_threads(threads);
                    }
                    _ => tracing::info!("🧵 Initializing multi-threaded runtime with auto-detected CPU cores"),
                }

                builder.build().context("Failed to create multi-threaded runtime")
            }
            other => bail!("Unknown runtime mode '{}'", other),
        }
    }

    /// Execute an async function with the configured runtime
    pub fn run_with_runtime<F, T>(config: &RuntimeConfig, future: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let runtime = create_runtime(config)?;
        runtime.block_on(future)
    }

}
