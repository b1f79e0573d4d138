use chrono::{DateTime, Utc};
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

// Core data captured from an inbound request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestData {
    pub method: String,
    pub url: String,
    pub path: String,
    pub query_string: Option<String>,

    // Client information
    pub client_ip: String,
    pub client_port: u16,

    pub timestamp: DateTime<Utc>,

    // Ordered, duplicates kept
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    pub body: String,
}

// Response data captured from the upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseData {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub content_length: usize,
    pub response_time_ms: u64,
    pub body: String,
}

// Complete request-response pair for logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyLog {
    pub request: RequestData,
    pub response: Option<ResponseData>,
    pub error: Option<String>,
}

impl RequestData {
    pub fn new(method: &hyper::Method, uri: &hyper::Uri, remote_addr: SocketAddr) -> Self {
        Self {
            method: method.to_string(),
            url: uri.to_string(),
            path: uri.path().to_string(),
            query_string: uri.query().map(|q| q.to_string()),
            client_ip: remote_addr.ip().to_string(),
            client_port: remote_addr.port(),
            timestamp: Utc::now(),
            headers: Vec::new(),
            content_length: 0,
            body: String::new(),
        }
    }

    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        self.headers = header_pairs(headers);
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.content_length = body.len();
        self.body = String::from_utf8_lossy(body).into_owned();
        self
    }
}

impl ResponseData {
    pub fn new(status: hyper::StatusCode, headers: &HeaderMap, body: &[u8], response_time_ms: u64) -> Self {
        Self {
            status_code: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers: header_pairs(headers),
            content_length: body.len(),
            response_time_ms,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// Flatten a header map into ordered name/value pairs for logging
pub fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
