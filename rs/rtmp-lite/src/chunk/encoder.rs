use std::collections::HashMap;

use bytes::BufMut;

use super::*;
use crate::{
	coding::*,
	message::{Message, MessageType},
};

/// The last header sent on a chunk stream.
#[derive(Debug, Clone, Copy)]
struct Sent {
	timestamp: u32,
	// Unset after a Type0 header; receivers disagree on what a following Type3 means.
	delta: Option<u32>,
	length: u32,
	kind: MessageType,
	stream_id: u32,
}

/// Splits messages into chunks, compressing headers against the previous message per chunk stream.
#[derive(Debug)]
pub struct ChunkEncoder {
	chunk_size: usize,
	streams: HashMap<u32, Sent>,
}

impl Default for ChunkEncoder {
	fn default() -> Self {
		Self::new()
	}
}

impl ChunkEncoder {
	pub fn new() -> Self {
		Self {
			chunk_size: DEFAULT_CHUNK_SIZE,
			streams: HashMap::new(),
		}
	}

	pub fn chunk_size(&self) -> usize {
		self.chunk_size
	}

	/// Only call after the matching Set Chunk Size has been written.
	pub fn set_chunk_size(&mut self, size: usize) {
		self.chunk_size = size.max(1);
	}

	/// Append the chunked message to `w`, returning the header form of the first chunk.
	pub fn encode<W: BufMut>(&mut self, csid: u32, msg: &Message, w: &mut W) -> ChunkFormat {
		let length = msg.payload.len() as u32;

		let (format, field) = match self.streams.get(&csid) {
			Some(prev) if prev.stream_id == msg.stream_id && msg.timestamp >= prev.timestamp => {
				let delta = msg.timestamp - prev.timestamp;
				if prev.length != length || prev.kind != msg.kind {
					(ChunkFormat::Type1, delta)
				} else if prev.delta != Some(delta) {
					(ChunkFormat::Type2, delta)
				} else {
					(ChunkFormat::Type3, delta)
				}
			}
			_ => (ChunkFormat::Type0, msg.timestamp),
		};

		let extended = field >= EXTENDED_TIMESTAMP;
		let header_field = field.min(EXTENDED_TIMESTAMP);

		let mut offset = 0;
		let mut chunk_format = format;

		loop {
			encode_basic_header(w, chunk_format, csid);

			match chunk_format {
				ChunkFormat::Type0 => {
					encode_u24(w, header_field);
					encode_u24(w, length);
					w.put_u8(msg.kind.into());
					encode_u32_le(w, msg.stream_id);
				}
				ChunkFormat::Type1 => {
					encode_u24(w, header_field);
					encode_u24(w, length);
					w.put_u8(msg.kind.into());
				}
				ChunkFormat::Type2 => encode_u24(w, header_field),
				ChunkFormat::Type3 => {}
			}

			// Repeated on every chunk of the message, continuations included.
			if extended {
				w.put_u32(field);
			}

			let end = (offset + self.chunk_size).min(msg.payload.len());
			w.put_slice(&msg.payload[offset..end]);
			offset = end;

			if offset >= msg.payload.len() {
				break;
			}

			chunk_format = ChunkFormat::Type3;
		}

		self.streams.insert(
			csid,
			Sent {
				timestamp: msg.timestamp,
				delta: match format {
					ChunkFormat::Type0 => None,
					_ => Some(field),
				},
				length,
				kind: msg.kind,
				stream_id: msg.stream_id,
			},
		);

		format
	}
}
