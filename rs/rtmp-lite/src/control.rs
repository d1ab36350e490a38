use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::{
	coding::*,
	message::{Message, MessageType},
};

/// How the peer wants the output bandwidth limit applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum BandwidthLimit {
	Hard = 0,
	Soft = 1,
	Dynamic = 2,
	#[num_enum(catch_all)]
	Unknown(u8),
}

/// User control events, message type 4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControl {
	StreamBegin(u32),
	StreamEof(u32),
	StreamDry(u32),
	SetBufferLength { stream_id: u32, millis: u32 },
	StreamIsRecorded(u32),
	PingRequest(u32),
	PingResponse(u32),
	Unknown { event: u16, data: Bytes },
}

impl UserControl {
	const STREAM_BEGIN: u16 = 0;
	const STREAM_EOF: u16 = 1;
	const STREAM_DRY: u16 = 2;
	const SET_BUFFER_LENGTH: u16 = 3;
	const STREAM_IS_RECORDED: u16 = 4;
	const PING_REQUEST: u16 = 6;
	const PING_RESPONSE: u16 = 7;
}

impl Encode for UserControl {
	fn encode<W: BufMut>(&self, w: &mut W) {
		match self {
			Self::StreamBegin(id) => {
				w.put_u16(Self::STREAM_BEGIN);
				w.put_u32(*id);
			}
			Self::StreamEof(id) => {
				w.put_u16(Self::STREAM_EOF);
				w.put_u32(*id);
			}
			Self::StreamDry(id) => {
				w.put_u16(Self::STREAM_DRY);
				w.put_u32(*id);
			}
			Self::SetBufferLength { stream_id, millis } => {
				w.put_u16(Self::SET_BUFFER_LENGTH);
				w.put_u32(*stream_id);
				w.put_u32(*millis);
			}
			Self::StreamIsRecorded(id) => {
				w.put_u16(Self::STREAM_IS_RECORDED);
				w.put_u32(*id);
			}
			Self::PingRequest(ts) => {
				w.put_u16(Self::PING_REQUEST);
				w.put_u32(*ts);
			}
			Self::PingResponse(ts) => {
				w.put_u16(Self::PING_RESPONSE);
				w.put_u32(*ts);
			}
			Self::Unknown { event, data } => {
				w.put_u16(*event);
				w.put_slice(data);
			}
		}
	}
}

impl Decode for UserControl {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Ok(match u16::decode(r)? {
			Self::STREAM_BEGIN => Self::StreamBegin(u32::decode(r)?),
			Self::STREAM_EOF => Self::StreamEof(u32::decode(r)?),
			Self::STREAM_DRY => Self::StreamDry(u32::decode(r)?),
			Self::SET_BUFFER_LENGTH => Self::SetBufferLength {
				stream_id: u32::decode(r)?,
				millis: u32::decode(r)?,
			},
			Self::STREAM_IS_RECORDED => Self::StreamIsRecorded(u32::decode(r)?),
			Self::PING_REQUEST => Self::PingRequest(u32::decode(r)?),
			Self::PING_RESPONSE => Self::PingResponse(u32::decode(r)?),
			event => Self::Unknown {
				event,
				data: r.copy_to_bytes(r.remaining()),
			},
		})
	}
}

/// A protocol control message, always sent on chunk stream 2 with message stream 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
	SetChunkSize(u32),
	/// Discard the partial message on the given chunk stream.
	Abort(u32),
	Acknowledgement(u32),
	UserControl(UserControl),
	WindowAckSize(u32),
	SetPeerBandwidth { size: u32, limit: BandwidthLimit },
}

impl Control {
	/// The largest chunk size the protocol can express.
	pub const MAX_CHUNK_SIZE: u32 = 0x7FFF_FFFF;

	pub fn kind(&self) -> MessageType {
		match self {
			Self::SetChunkSize(_) => MessageType::SetChunkSize,
			Self::Abort(_) => MessageType::Abort,
			Self::Acknowledgement(_) => MessageType::Acknowledgement,
			Self::UserControl(_) => MessageType::UserControl,
			Self::WindowAckSize(_) => MessageType::WindowAckSize,
			Self::SetPeerBandwidth { .. } => MessageType::SetPeerBandwidth,
		}
	}

	/// Decode the payload of a control message.
	///
	/// Returns [None] if the message type isn't a protocol control message.
	pub fn decode<R: Buf>(kind: MessageType, r: &mut R) -> Result<Option<Self>, DecodeError> {
		let control = match kind {
			MessageType::SetChunkSize => {
				// The high bit is reserved and must be ignored.
				let size = u32::decode(r)? & Self::MAX_CHUNK_SIZE;
				if size == 0 {
					return Err(DecodeError::InvalidValue);
				}
				Self::SetChunkSize(size)
			}
			MessageType::Abort => Self::Abort(u32::decode(r)?),
			MessageType::Acknowledgement => Self::Acknowledgement(u32::decode(r)?),
			MessageType::UserControl => Self::UserControl(UserControl::decode(r)?),
			MessageType::WindowAckSize => Self::WindowAckSize(u32::decode(r)?),
			MessageType::SetPeerBandwidth => Self::SetPeerBandwidth {
				size: u32::decode(r)?,
				limit: u8::decode(r)?.into(),
			},
			_ => return Ok(None),
		};

		Ok(Some(control))
	}

	pub fn into_message(self) -> Message {
		let mut payload = BytesMut::new();
		self.encode(&mut payload);
		Message::new(self.kind(), 0, 0, payload.freeze())
	}
}

impl Encode for Control {
	fn encode<W: BufMut>(&self, w: &mut W) {
		match self {
			Self::SetChunkSize(size) => w.put_u32(size & Self::MAX_CHUNK_SIZE),
			Self::Abort(csid) => w.put_u32(*csid),
			Self::Acknowledgement(seq) => w.put_u32(*seq),
			Self::UserControl(event) => event.encode(w),
			Self::WindowAckSize(size) => w.put_u32(*size),
			Self::SetPeerBandwidth { size, limit } => {
				w.put_u32(*size);
				w.put_u8((*limit).into());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roundtrip(control: Control) -> Control {
		let msg = control.into_message();
		assert_eq!(msg.stream_id, 0);

		let mut payload = msg.payload.clone();
		let decoded = Control::decode(msg.kind, &mut payload).unwrap().unwrap();
		assert!(!payload.has_remaining());
		decoded
	}

	#[test]
	fn test_set_chunk_size() {
		let msg = Control::SetChunkSize(4096).into_message();
		assert_eq!(msg.kind, MessageType::SetChunkSize);
		assert_eq!(msg.payload.as_ref(), &[0x00, 0x00, 0x10, 0x00]);

		// Reserved bit is masked off.
		let mut buf: &[u8] = &[0x80, 0x00, 0x10, 0x00];
		assert_eq!(
			Control::decode(MessageType::SetChunkSize, &mut buf).unwrap(),
			Some(Control::SetChunkSize(4096))
		);

		let mut buf: &[u8] = &[0, 0, 0, 0];
		assert_eq!(
			Control::decode(MessageType::SetChunkSize, &mut buf),
			Err(DecodeError::InvalidValue)
		);
	}

	#[test]
	fn test_ping() {
		let msg = Control::UserControl(UserControl::PingRequest(1234)).into_message();
		assert_eq!(msg.payload.as_ref(), &[0x00, 0x06, 0x00, 0x00, 0x04, 0xd2]);

		assert_eq!(
			roundtrip(Control::UserControl(UserControl::PingResponse(1234))),
			Control::UserControl(UserControl::PingResponse(1234))
		);
	}

	#[test]
	fn test_peer_bandwidth() {
		let control = Control::SetPeerBandwidth {
			size: 2_500_000,
			limit: BandwidthLimit::Dynamic,
		};
		assert_eq!(roundtrip(control.clone()), control);

		let mut buf: &[u8] = &[0x00, 0x26, 0x25, 0xa0, 0x07];
		assert_eq!(
			Control::decode(MessageType::SetPeerBandwidth, &mut buf).unwrap(),
			Some(Control::SetPeerBandwidth {
				size: 2_500_000,
				limit: BandwidthLimit::Unknown(7),
			})
		);
	}

	#[test]
	fn test_set_buffer_length() {
		let control = Control::UserControl(UserControl::SetBufferLength {
			stream_id: 1,
			millis: 3000,
		});
		assert_eq!(roundtrip(control.clone()), control);
	}

	#[test]
	fn test_not_control() {
		let mut buf: &[u8] = &[];
		assert_eq!(Control::decode(MessageType::Video, &mut buf), Ok(None));
	}
}
