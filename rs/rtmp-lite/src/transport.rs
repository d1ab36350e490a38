use std::{fmt, future::Future, io, str::FromStr};

use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::{Error, Result};

pub const DEFAULT_PORT: u16 = 1935;

/// Connectivity changes observed on the transport, mapped onto the session state by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
	Connecting,
	Connected,
	Error,
	End,
}

/// A reliable, ordered byte stream to the server.
///
/// The session owns both halves; reads and writes happen on the network worker.
pub trait Transport: Send + 'static {
	type Reader: AsyncRead + Unpin + Send + 'static;
	type Writer: AsyncWrite + Unpin + Send + 'static;

	/// Open the connection.
	fn connect(
		self,
		destination: &Destination,
	) -> impl Future<Output = io::Result<(Self::Reader, Self::Writer)>> + Send;
}

/// Where to publish, parsed from `rtmp://host[:port]/app[/...]/stream_key[?query]`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Destination {
	pub host: String,
	pub port: u16,

	/// Every path segment but the last.
	pub app: String,

	/// The last path segment, with the query string appended.
	pub stream_key: String,
}

impl Destination {
	pub fn parse(url: &str) -> Result<Self> {
		let url = Url::parse(url)?;
		if url.scheme() != "rtmp" {
			return Err(Error::Destination("unsupported scheme"));
		}

		let host = url.host_str().ok_or(Error::Destination("missing host"))?.to_string();
		let port = url.port().unwrap_or(DEFAULT_PORT);

		let segments: Vec<&str> = url
			.path_segments()
			.map(|segments| segments.filter(|s| !s.is_empty()).collect())
			.unwrap_or_default();

		let (key, app) = segments.split_last().ok_or(Error::Destination("missing stream key"))?;
		if app.is_empty() {
			return Err(Error::Destination("missing application"));
		}

		let mut stream_key = key.to_string();
		if let Some(query) = url.query() {
			stream_key.push('?');
			stream_key.push_str(query);
		}

		Ok(Self {
			host,
			port,
			app: app.join("/"),
			stream_key,
		})
	}

	/// The `tcUrl` sent with `connect`.
	pub fn tc_url(&self) -> String {
		format!("rtmp://{}:{}/{}", self.host, self.port, self.app)
	}

	/// `host:port`, suitable for a socket connect.
	pub fn address(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

impl FromStr for Destination {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::parse(s)
	}
}

impl fmt::Display for Destination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// The stream key is a credential; keep it out of logs.
		write!(f, "{}", self.tc_url())
	}
}
