//! Helper library for native RTMP publishers.
//!
//! Provides the pieces [rtmp_lite] leaves to the application:
//! - [TcpTransport] for plain `rtmp://` connections.
//! - [ClientConfig] for command line and file based configuration.
//! - [Log] to initialize `tracing` output.

mod client;
mod log;
mod tcp;

pub use client::*;
pub use log::*;
pub use tcp::*;

// Re-export the engine.
pub use rtmp_lite;
