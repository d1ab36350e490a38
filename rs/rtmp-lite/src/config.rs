use std::time::Duration;

use crate::model::SessionParameters;

/// Session tuning knobs. The defaults suit a single 720p/1080p live stream.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Config {
	/// Outbound chunk size announced right after the handshake.
	pub chunk_size: u32,

	/// Acknowledgement window assumed until the server sets one.
	pub window_ack_size: u32,

	/// How much media the outbound queue may hold, measured in time at the current bandwidth.
	pub buffer_time: Duration,

	/// Lower bound on the adaptive byte budget.
	pub min_buffer_bytes: usize,

	/// A fixed byte budget, disabling adaptation.
	pub buffer_bytes: Option<usize>,

	/// How often throughput is estimated and reported.
	pub sample_interval: Duration,

	/// Sent as `flashVer` with `connect`.
	pub flash_version: String,

	/// Server-side buffer requested with Set Buffer Length before publishing.
	pub server_buffer: Duration,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			chunk_size: 4096,
			window_ack_size: 2_500_000,
			buffer_time: Duration::from_secs(2),
			min_buffer_bytes: 64 * 1024,
			buffer_bytes: None,
			sample_interval: Duration::from_millis(500),
			flash_version: "FMLE/3.0 (compatible; FMSc/1.0)".to_string(),
			server_buffer: Duration::from_millis(3000),
		}
	}
}

impl Config {
	/// The queue budget for the given bandwidth estimate in bytes per second.
	///
	/// Falls back to the configured video bitrate until something has been sent.
	pub fn budget(&self, bandwidth: Option<f64>, params: Option<&SessionParameters>) -> usize {
		if let Some(fixed) = self.buffer_bytes {
			return fixed;
		}

		let rate = bandwidth
			.filter(|bandwidth| *bandwidth > 0.0)
			.or_else(|| params.map(|p| p.video_bitrate as f64 / 8.0));

		match rate {
			Some(rate) => ((rate * self.buffer_time.as_secs_f64()) as usize).max(self.min_buffer_bytes),
			None => self.min_buffer_bytes,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn params() -> SessionParameters {
		SessionParameters {
			width: 1280,
			height: 720,
			frame_duration: 1.0 / 30.0,
			video_bitrate: 4_000_000,
			audio_sample_rate: 48000.0,
			stereo: true,
		}
	}

	#[test]
	fn test_budget() {
		let config = Config::default();
		assert_eq!(config.budget(None, None), 64 * 1024);

		// 4 Mbit/s for 2 seconds.
		assert_eq!(config.budget(None, Some(&params())), 1_000_000);
		assert_eq!(config.budget(Some(0.0), Some(&params())), 1_000_000);

		assert_eq!(config.budget(Some(250_000.0), Some(&params())), 500_000);
		assert_eq!(config.budget(Some(1000.0), None), 64 * 1024);
	}

	#[test]
	fn test_fixed_budget() {
		let config = Config {
			buffer_bytes: Some(5000),
			..Default::default()
		};
		assert_eq!(config.budget(Some(1_000_000.0), Some(&params())), 5000);
	}
}
