use std::{io, time::Duration};

use rtmp_lite::{Destination, Transport};
use tokio::net::{
	TcpStream,
	tcp::{OwnedReadHalf, OwnedWriteHalf},
};

/// Plain TCP, the transport behind `rtmp://` URLs.
#[derive(Debug, Clone)]
pub struct TcpTransport {
	/// Disable Nagle's algorithm; media is already batched into chunks.
	pub nodelay: bool,
	pub connect_timeout: Duration,
}

impl Default for TcpTransport {
	fn default() -> Self {
		Self {
			nodelay: true,
			connect_timeout: Duration::from_secs(10),
		}
	}
}

impl Transport for TcpTransport {
	type Reader = OwnedReadHalf;
	type Writer = OwnedWriteHalf;

	async fn connect(self, destination: &Destination) -> io::Result<(Self::Reader, Self::Writer)> {
		let address = destination.address();
		tracing::debug!(%address, "connecting");

		let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
			.await
			.map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

		stream.set_nodelay(self.nodelay)?;
		tracing::debug!(peer = ?stream.peer_addr().ok(), "connected");

		Ok(stream.into_split())
	}
}
