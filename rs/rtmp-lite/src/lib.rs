//! # rtmp-lite: a publish-only RTMP client
//!
//! `rtmp-lite` pushes live audio and video to an RTMP ingest server over any reliable byte stream.
//! It implements the parts of the protocol a broadcaster needs and nothing more:
//! no playback, no AMF3 values, no shared objects.
//!
//! ## API
//!
//! - [Destination]: parsed from `rtmp://host[:port]/app/stream_key`.
//! - [Transport]: opens the byte stream; see `rtmp-native` for TCP.
//! - [Session]: runs the handshake, `connect`/`createStream`/`publish`, then sends whatever is submitted.
//!
//! To publish:
//! - [Session::connect] with a transport, destination, [Config] and a state callback.
//! - [Session::set_session_parameters] so `onMetaData` can describe the stream.
//! - [Session::submit] each encoded frame with its [PacketMetadata].
//! - [Session::close] to unpublish.
//!
//! ## Backpressure
//!
//! Submission never blocks. The outbound queue holds a byte budget derived from the measured
//! throughput; when it overflows the oldest non-keyframes are dropped first.
//! Producers that would rather wait can call [Session::wait_for_space],
//! and [Session::set_bandwidth_callback] reports estimates for encoder rate control.

mod config;
mod error;
mod model;
mod session;
mod stats;

pub mod amf0;
pub mod chunk;
pub mod coding;
pub mod command;
pub mod control;
pub mod handshake;
pub mod message;
pub mod queue;
pub mod throughput;
pub mod transport;

pub use config::*;
pub use error::*;
pub use message::{Message, MessageType};
pub use model::*;
pub use session::{Session, SessionState, StateCallback};
pub use stats::*;
pub use throughput::Throughput;
pub use transport::{Destination, Transport, TransportStatus};
