//! URL utility functions

use url::Url;

/// Append an origin-form `path_and_query` to a base URL, keeping any path
/// prefix the base carries.
pub fn append_path(base: &Url, path_and_query: &str) -> String {
    let origin = base.origin().ascii_serialization();
    let prefix = base.path().trim_end_matches('/');
    if path_and_query.starts_with('/') {
        format!("{}{}{}", origin, prefix, path_and_query)
    } else {
        format!("{}{}/{}", origin, prefix, path_and_query)
    }
}

/// `host[:port]` as it belongs in a Host header
pub fn host_header_value(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
