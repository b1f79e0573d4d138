//! Target resolution
//!
//! Turns an inbound request target (or an explicit `x-target-url` header) into
//! a fully qualified [`TargetDescriptor`].

use crate::error::{Error, Result};
use std::fmt;
use url::Url;

/// Header carrying an absolute target URL on the capture route
pub const TARGET_URL_HEADER: &str = "x-target-url";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified upstream target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub protocol: Protocol,
    pub hostname: String,
    /// Explicit port; `None` means the protocol default
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
}

impl TargetDescriptor {
    fn from_url(url: &Url) -> std::result::Result<Self, String> {
        let protocol = match url.scheme() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            other => return Err(format!("unsupported protocol '{}'", other)),
        };
        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| "missing host".to_string())?
            .to_string();

        Ok(Self {
            protocol,
            hostname,
            // `Url::port` already drops a port equal to the scheme default
            port: url.port(),
            path: url.path().to_string(),
            query: url.query().map(|q| q.to_string()),
        })
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }

    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// `hostname[:port]`, port omitted when it is the protocol default
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) if port != self.protocol.default_port() => format!("{}:{}", self.hostname, port),
            _ => self.hostname.clone(),
        }
    }

    pub fn to_url(&self) -> String {
        format!("{}://{}{}", self.protocol, self.authority(), self.path_and_query())
    }

    /// Same host and effective port as `other`
    pub fn same_origin(&self, other: &TargetDescriptor) -> bool {
        self.protocol == other.protocol
            && self.hostname.eq_ignore_ascii_case(&other.hostname)
            && self.effective_port() == other.effective_port()
    }
}

/// Whether `path` starts with at least one `/segment` of word, hyphen or dot
/// characters.
///
/// Only the leading segment is inspected, so `/api/%7E` still passes.
pub fn is_valid_endpoint_path(path: &str) -> bool {
    let mut chars = path.chars();
    chars.next() == Some('/')
        && chars
            .next()
            .map_or(false, |c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Resolves inbound requests against the configured simulation service
#[derive(Debug, Clone)]
pub struct TargetResolver {
    base: Url,
    default_target: TargetDescriptor,
}

impl TargetResolver {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)?;
        let default_target = TargetDescriptor::from_url(&base)
            .map_err(|reason| Error::Config(format!("simulation base URL '{}': {}", base_url, reason)))?;
        Ok(Self { base, default_target })
    }

    /// Target of the configured simulation service itself
    pub fn default_target(&self) -> &TargetDescriptor {
        &self.default_target
    }

    /// Parse an explicit absolute target URL
    pub fn resolve_header(&self, value: &str) -> Result<TargetDescriptor> {
        let invalid = |reason: String| Error::InvalidTarget {
            url: value.to_string(),
            reason,
        };
        let value = value.trim();
        if value.is_empty() {
            return Err(invalid("empty value".to_string()));
        }
        let url = Url::parse(value).map_err(|e| invalid(e.to_string()))?;
        TargetDescriptor::from_url(&url).map_err(invalid)
    }

    /// Resolve an inbound request target (origin-form path or absolute-form
    /// URL) against the base URL. Dot segments are normalized first, then the
    /// path is validated.
    pub fn resolve_path(&self, request_target: &str) -> Result<TargetDescriptor> {
        let not_found = || Error::NotFound(display_path(request_target));

        let url = self.base.join(request_target).map_err(|_| not_found())?;
        let target = TargetDescriptor::from_url(&url).map_err(|_| not_found())?;
        if !is_valid_endpoint_path(&target.path) {
            return Err(not_found());
        }
        Ok(target)
    }

    /// Header wins when present and non-empty, otherwise the path is resolved
    pub fn resolve(&self, request_target: &str, header: Option<&str>) -> Result<TargetDescriptor> {
        match header.filter(|h| !h.trim().is_empty()) {
            Some(value) => self.resolve_header(value),
            None => self.resolve_path(request_target),
        }
    }
}

/// Path shown in the 404 body: the request target as received, query dropped
fn display_path(request_target: &str) -> String {
    let without_query = request_target.split('?').next().unwrap_or("");
    match Url::parse(without_query) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => without_query.to_string(),
    }
}
