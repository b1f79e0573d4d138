//! Error handling module for the relay

use hyper::{Body, Response, StatusCode};
use thiserror::Error;

/// Custom error type for the relay
///
/// The `Display` text of the request-level variants is the exact body sent
/// back to the client, see [`Error::into_response`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid x-target-url header '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("Missing x-target-url header")]
    MissingTarget,

    #[error("The requested endpoint {0} does not exist or is not available.")]
    NotFound(String),

    #[error("Bad gateway. Request to {upstream} failed: {message}")]
    UpstreamConnection { upstream: &'static str, message: String },

    #[error("Capture request failed: {0}")]
    CaptureFailed(String),

    #[error("Fetch error: {0}")]
    ClientStream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for the relay
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Upstream failure on one of the 502 branches.
    pub fn upstream(upstream: &'static str, err: impl std::fmt::Display) -> Self {
        Error::UpstreamConnection {
            upstream,
            message: err.to_string(),
        }
    }

    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidTarget { .. } | Error::MissingTarget => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UpstreamConnection { .. } | Error::ClientStream(_) => StatusCode::BAD_GATEWAY,
            Error::CaptureFailed(_) | Error::Io(_) | Error::UrlParse(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Convert into the terminal client response for this error.
    pub fn into_response(self) -> Response<Body> {
        crate::utils::build_error_response(self.status_code(), &self.to_string())
    }
}
