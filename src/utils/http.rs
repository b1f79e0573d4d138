//! HTTP utility functions

use hyper::{header, Body, HeaderMap, Method, Response, StatusCode};

/// Check if a header is a hop-by-hop header
pub fn is_hop_by_hop_header(name: &str) -> bool {
    let hop_by_hop_headers = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];

    hop_by_hop_headers.contains(&name.to_lowercase().as_str())
}

/// Request headers copied to an upstream that streams the inbound body as-is
pub fn should_forward_request_header(name: &str) -> bool {
    !is_hop_by_hop_header(name)
}

/// Request headers copied to an upstream whose body the relay re-frames itself
pub fn should_forward_buffered_request_header(name: &str) -> bool {
    should_forward_request_header(name) && !name.eq_ignore_ascii_case("content-length")
}

pub fn should_forward_response_header(name: &str) -> bool {
    !is_hop_by_hop_header(name)
}

/// Copy every header accepted by `keep`, duplicates and order preserved
pub fn filter_headers(headers: &HeaderMap, keep: fn(&str) -> bool) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if keep(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Only these methods carry a forwarded body on the capture route
pub fn method_carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Build error response
pub fn build_error_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(message.to_string()))
        .unwrap()
}
