//! Command-line interface for the relay and sniffer servers

pub mod server;

pub use server::*;
