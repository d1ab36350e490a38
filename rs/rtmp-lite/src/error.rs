use std::sync::Arc;

use crate::coding;

/// A list of possible errors that can occur during the session.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
	#[error("transport error: {0}")]
	Transport(Arc<std::io::Error>),

	#[error("transport closed")]
	Disconnected,

	#[error("decode error: {0}")]
	Decode(#[from] coding::DecodeError),

	/// The peer sent a chunk or message that violates the chunk protocol.
	#[error("framing error: {0}")]
	Framing(String),

	#[error("unsupported handshake version: {0}")]
	HandshakeVersion(u8),

	/// S2 did not echo C1, reported at the first differing byte.
	#[error("handshake mismatch at offset {offset}: expected={expected:#04x} actual={actual:#04x}")]
	HandshakeMismatch { offset: usize, expected: u8, actual: u8 },

	/// The server replied with `_error` or an error-level status.
	#[error("{command} failed: {code}")]
	Command { command: String, code: String },

	#[error("invalid url: {0}")]
	Url(#[from] url::ParseError),

	#[error("invalid destination: {0}")]
	Destination(&'static str),

	/// The session was force-closed before finishing.
	#[error("cancelled")]
	Cancel,
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Error::Transport(Arc::new(err))
	}
}

/// A short-hand for the result type of this crate.
pub type Result<T> = std::result::Result<T, Error>;
