//! Logging utility functions for relay operations

use crate::log_debug;
use crate::logging::process_info;
use hyper::{HeaderMap, StatusCode};
use std::net::SocketAddr;
use tracing::info;

/// Log incoming request information
pub fn log_incoming_request(method: &str, uri: &str, remote_addr: &SocketAddr) {
    info!("{} 📥 {} {} from {}", process_info(), method, uri, remote_addr.ip());
    log_debug!("{} 🔍 REQUEST DETAILS:\n  Method: {}\n  URI: {}\n  Remote: {}",
               process_info(), method, uri, remote_addr);
}

/// Log CONNECT request details
pub fn log_connect_request(requested: &str, tunnel_target: &str, remote_addr: &SocketAddr) {
    info!("{} 🔐 CONNECT {} from {} (tunnelled to {})",
          process_info(), requested, remote_addr.ip(), tunnel_target);
}

/// Log successful CONNECT tunnel establishment
pub fn log_connect_success(target: &str, connect_time: u128) {
    log_debug!("✅ Tunnel established to {} ({}ms)", target, connect_time);
}

/// Log failed CONNECT attempt
pub fn log_connect_failure(target: &str, connect_time: u128, error: &str) {
    info!("❌ CONNECT failed to {} ({}ms): {}", target, connect_time, error);
}

/// Log request success
pub fn log_http_success(method: &str, path: &str, status: StatusCode, total_time: u128) {
    info!("✅ {} completed {} {} → {} ({}ms)", process_info(), method,
          path.chars().take(50).collect::<String>(),
          status, total_time);
}

/// Log request failure
pub fn log_http_failure(method: &str, path: &str, status: StatusCode, total_time: u128, error: &crate::Error) {
    info!("❌ {} failed {} {} → {} ({}ms): {}", process_info(), method,
          path.chars().take(50).collect::<String>(),
          status, total_time, error);
}

/// Log upstream forwarding details
pub fn log_forwarding_request(method: &str, url: &str, via: Option<&str>, body_len: usize) {
    match via {
        Some(agent) => info!("🔄 Forwarding {} {} via {}", method, url, agent),
        None => info!("🔄 Forwarding {} {}", method, url),
    }
    log_debug!("🔄 FORWARDING REQUEST:\n  Method: {}\n  URL: {}\n  Body Size: {} bytes", method, url, body_len);
}

/// Log headers one per line at DEBUG level
pub fn log_headers_structured(headers: &HeaderMap, title: &str) {
    log_debug!("📋 {} ({}):", title, headers.len());
    for (name, value) in headers {
        log_debug!("   {}: {}", name, String::from_utf8_lossy(value.as_bytes()));
    }
}
