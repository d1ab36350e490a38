use crate::message::MessageType;

/// Stream properties advertised to the server in `onMetaData`.
///
/// Supplied once before publishing starts; a second call replaces the first.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionParameters {
	pub width: u32,
	pub height: u32,

	/// Seconds per video frame.
	pub frame_duration: f64,

	/// Target video bitrate in bits per second.
	pub video_bitrate: u32,

	/// Audio sample rate in Hz.
	pub audio_sample_rate: f64,
	pub stereo: bool,
}

impl SessionParameters {
	pub fn frame_rate(&self) -> f64 {
		match self.frame_duration > 0.0 {
			true => 1.0 / self.frame_duration,
			false => 0.0,
		}
	}
}

/// Describes how a submitted payload should be framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMetadata {
	/// Milliseconds on the session clock.
	pub timestamp: u32,
	pub kind: MessageType,

	/// Zero means the stream created for publishing.
	pub stream_id: u32,

	/// Independently decodable video frame; never dropped while newer data waits.
	pub keyframe: bool,
}

impl PacketMetadata {
	pub fn video(timestamp: u32, keyframe: bool) -> Self {
		Self {
			timestamp,
			kind: MessageType::Video,
			stream_id: 0,
			keyframe,
		}
	}

	pub fn audio(timestamp: u32) -> Self {
		Self {
			timestamp,
			kind: MessageType::Audio,
			stream_id: 0,
			keyframe: false,
		}
	}

	pub fn is_video_keyframe(&self) -> bool {
		self.keyframe && self.kind == MessageType::Video
	}
}
