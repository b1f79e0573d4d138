//! Utility functions for the relay

pub mod http;
pub mod url;
pub mod logging;

pub use http::*;
pub use url::*;
pub use logging::*;
