use std::collections::HashMap;

use bytes::{Buf, Bytes};

use super::*;
use crate::{
	coding::*,
	message::{Message, MessageType},
};

/// The last header received on a chunk stream.
#[derive(Debug, Clone, Copy)]
struct Received {
	timestamp: u32,
	delta: u32,
	length: u32,
	kind: MessageType,
	stream_id: u32,
	extended: bool,
}

impl Default for Received {
	fn default() -> Self {
		Self {
			timestamp: 0,
			delta: 0,
			length: 0,
			kind: MessageType::Unknown(0),
			stream_id: 0,
			extended: false,
		}
	}
}

/// Parses chunks and reassembles them into messages.
#[derive(Debug)]
pub struct ChunkDecoder {
	chunk_size: usize,
	streams: HashMap<u32, Received>,
	partial: Reassembler,
}

impl Default for ChunkDecoder {
	fn default() -> Self {
		Self::new()
	}
}

impl ChunkDecoder {
	pub fn new() -> Self {
		Self {
			chunk_size: DEFAULT_CHUNK_SIZE,
			streams: HashMap::new(),
			partial: Reassembler::default(),
		}
	}

	pub fn chunk_size(&self) -> usize {
		self.chunk_size
	}

	/// Apply the peer's Set Chunk Size to subsequent chunks.
	pub fn set_chunk_size(&mut self, size: usize) {
		self.chunk_size = size.max(1);
	}

	/// Drop the partial message on a chunk stream.
	pub fn abort(&mut self, csid: u32) -> bool {
		self.partial.abort(csid)
	}

	/// Decode one chunk, returning the chunk stream id and message once its final chunk arrives.
	///
	/// On [DecodeError::Short] no state is modified; retry with more data from the same position.
	pub fn decode<R: Buf>(&mut self, r: &mut R) -> Result<Option<(u32, Message)>, DecodeError> {
		let (format, csid) = decode_basic_header(r)?;

		let mut state = match (format, self.streams.get(&csid)) {
			(ChunkFormat::Type0, _) => Received::default(),
			(_, Some(prev)) => *prev,
			(_, None) => return Err(DecodeError::UnknownStream(csid)),
		};

		let buffered = self.partial.buffered(csid);
		if buffered.is_some() && format != ChunkFormat::Type3 {
			return Err(DecodeError::UnexpectedHeader(csid));
		}

		let mut field = state.delta;
		match format {
			ChunkFormat::Type0 => {
				field = decode_u24(r)?;
				state.length = decode_u24(r)?;
				state.kind = u8::decode(r)?.into();
				state.stream_id = decode_u32_le(r)?;
			}
			ChunkFormat::Type1 => {
				field = decode_u24(r)?;
				state.length = decode_u24(r)?;
				state.kind = u8::decode(r)?.into();
			}
			ChunkFormat::Type2 => field = decode_u24(r)?,
			ChunkFormat::Type3 => {}
		}

		if format != ChunkFormat::Type3 {
			state.extended = field == EXTENDED_TIMESTAMP;
		}

		if state.extended {
			field = u32::decode(r)?;
		}

		if buffered.is_none() {
			match format {
				ChunkFormat::Type0 => state.timestamp = field,
				_ => state.timestamp = state.timestamp.wrapping_add(field),
			}

			// A Type0 timestamp doubles as the delta for a following Type3 message.
			state.delta = field;
		}

		let remaining = (state.length as usize).saturating_sub(buffered.unwrap_or(0));
		let size = remaining.min(self.chunk_size);
		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		let data: Bytes = r.copy_to_bytes(size);
		self.streams.insert(csid, state);

		let msg = match buffered {
			Some(_) => self.partial.append(csid, data),
			None => {
				let header = Message::new(state.kind, state.stream_id, state.timestamp, Bytes::new());
				match self.partial.begin(csid, &header, state.length as usize, self.chunk_size) {
					Some(empty) => Some(empty),
					None => self.partial.append(csid, data),
				}
			}
		};

		Ok(msg.map(|msg| (csid, msg)))
	}
}
