use std::fmt;

use bytes::Bytes;
use num_enum::{FromPrimitive, IntoPrimitive};

/// The message type id carried in every full chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum MessageType {
	SetChunkSize = 1,
	Abort = 2,
	Acknowledgement = 3,
	UserControl = 4,
	WindowAckSize = 5,
	SetPeerBandwidth = 6,
	Audio = 8,
	Video = 9,
	DataAmf3 = 15,
	SharedObjectAmf3 = 16,
	CommandAmf3 = 17,
	DataAmf0 = 18,
	SharedObjectAmf0 = 19,
	CommandAmf0 = 20,
	Aggregate = 22,
	#[num_enum(catch_all)]
	Unknown(u8),
}

impl MessageType {
	/// Protocol control messages, handled by the chunk layer rather than the application.
	pub fn is_control(self) -> bool {
		matches!(
			self,
			Self::SetChunkSize
				| Self::Abort
				| Self::Acknowledgement
				| Self::UserControl
				| Self::WindowAckSize
				| Self::SetPeerBandwidth
		)
	}
}

/// Chunk stream ids used when sending.
pub mod csid {
	use super::MessageType;

	/// Reserved for protocol control messages.
	pub const CONTROL: u32 = 2;
	pub const COMMAND: u32 = 3;
	pub const AUDIO: u32 = 4;
	pub const DATA: u32 = 5;
	pub const VIDEO: u32 = 6;

	/// Pick the chunk stream a media or data message travels on.
	pub fn for_kind(kind: MessageType) -> u32 {
		match kind {
			MessageType::Audio => AUDIO,
			MessageType::Video => VIDEO,
			MessageType::DataAmf0 | MessageType::DataAmf3 => DATA,
			kind if kind.is_control() => CONTROL,
			_ => COMMAND,
		}
	}
}

/// A complete message, before chunking or after reassembly.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
	pub timestamp: u32,
	pub kind: MessageType,
	pub stream_id: u32,
	pub payload: Bytes,
}

impl Message {
	pub fn new(kind: MessageType, stream_id: u32, timestamp: u32, payload: Bytes) -> Self {
		Self {
			timestamp,
			kind,
			stream_id,
			payload,
		}
	}
}

impl fmt::Debug for Message {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Message")
			.field("timestamp", &self.timestamp)
			.field("kind", &self.kind)
			.field("stream_id", &self.stream_id)
			.field("size", &self.payload.len())
			.finish()
	}
}
