use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rtmp_lite::{Config, Destination, Session, SessionState};
use serde::{Deserialize, Serialize};

use crate::TcpTransport;

/// Publisher configuration, from the command line, the environment or a file.
#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
#[non_exhaustive]
pub struct ClientConfig {
	/// Outbound chunk size announced after the handshake.
	#[arg(long = "rtmp-chunk-size", env = "RTMP_CHUNK_SIZE", default_value_t = 4096)]
	pub chunk_size: u32,

	/// Acknowledgement window assumed until the server sets one.
	#[arg(long = "rtmp-window-ack-size", env = "RTMP_WINDOW_ACK_SIZE", default_value_t = 2_500_000)]
	pub window_ack_size: u32,

	/// How much media the outbound queue may hold at the measured bandwidth.
	#[arg(long = "rtmp-buffer-time", env = "RTMP_BUFFER_TIME", default_value = "2s", value_parser = humantime::parse_duration)]
	#[serde(with = "humantime_serde")]
	pub buffer_time: Duration,

	/// Lower bound on the adaptive queue budget.
	#[arg(long = "rtmp-min-buffer-bytes", env = "RTMP_MIN_BUFFER_BYTES", default_value_t = 64 * 1024)]
	pub min_buffer_bytes: usize,

	/// Use a fixed queue budget instead.
	#[arg(long = "rtmp-buffer-bytes", env = "RTMP_BUFFER_BYTES")]
	pub buffer_bytes: Option<usize>,

	/// How often throughput is estimated.
	#[arg(long = "rtmp-sample-interval", env = "RTMP_SAMPLE_INTERVAL", default_value = "500ms", value_parser = humantime::parse_duration)]
	#[serde(with = "humantime_serde")]
	pub sample_interval: Duration,

	#[arg(long = "rtmp-flash-version", env = "RTMP_FLASH_VERSION", default_value = "FMLE/3.0 (compatible; FMSc/1.0)")]
	pub flash_version: String,

	#[arg(long = "rtmp-connect-timeout", env = "RTMP_CONNECT_TIMEOUT", default_value = "10s", value_parser = humantime::parse_duration)]
	#[serde(with = "humantime_serde")]
	pub connect_timeout: Duration,

	/// Set TCP_NODELAY on the socket.
	#[arg(long = "rtmp-nodelay", env = "RTMP_NODELAY", default_value_t = true, action = clap::ArgAction::Set)]
	pub nodelay: bool,
}

impl Default for ClientConfig {
	fn default() -> Self {
		let lite = Config::default();
		let tcp = TcpTransport::default();

		Self {
			chunk_size: lite.chunk_size,
			window_ack_size: lite.window_ack_size,
			buffer_time: lite.buffer_time,
			min_buffer_bytes: lite.min_buffer_bytes,
			buffer_bytes: lite.buffer_bytes,
			sample_interval: lite.sample_interval,
			flash_version: lite.flash_version,
			connect_timeout: tcp.connect_timeout,
			nodelay: tcp.nodelay,
		}
	}
}

impl ClientConfig {
	/// The engine configuration.
	pub fn lite(&self) -> Config {
		Config {
			chunk_size: self.chunk_size,
			window_ack_size: self.window_ack_size,
			buffer_time: self.buffer_time,
			min_buffer_bytes: self.min_buffer_bytes,
			buffer_bytes: self.buffer_bytes,
			sample_interval: self.sample_interval,
			flash_version: self.flash_version.clone(),
			..Default::default()
		}
	}

	pub fn transport(&self) -> TcpTransport {
		TcpTransport {
			nodelay: self.nodelay,
			connect_timeout: self.connect_timeout,
		}
	}

	/// Start publishing to an `rtmp://` URL.
	///
	/// Must be called from within a tokio runtime. Returns once the URL is parsed;
	/// connection progress is reported through `on_state`.
	pub fn connect(&self, url: &str, on_state: impl FnMut(SessionState) + Send + 'static) -> anyhow::Result<Session> {
		let destination = Destination::parse(url).with_context(|| format!("invalid destination: {url}"))?;
		tracing::info!(%destination, "publishing");

		Ok(Session::connect(self.transport(), destination, self.lite(), on_state))
	}
}
