//! Relay server module

pub mod dispatcher;
pub mod http_client;
pub mod rewind;
pub mod selector;
pub mod server;
pub mod sniffer;
pub mod streaming;
pub mod target;
pub mod tunnel;

// Re-exports
pub use dispatcher::{Dispatcher, Route};
pub use server::ProxyServer;
pub use sniffer::SnifferServer;
pub use target::{Protocol, TargetDescriptor, TargetResolver};
