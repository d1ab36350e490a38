use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::message::{Message, MessageType};

#[derive(Debug)]
struct Partial {
	timestamp: u32,
	kind: MessageType,
	stream_id: u32,
	length: usize,
	payload: BytesMut,
}

/// Accumulates chunk payloads per chunk stream until the declared length is reached.
#[derive(Debug, Default)]
pub struct Reassembler {
	partial: HashMap<u32, Partial>,
}

impl Reassembler {
	/// Bytes accumulated so far for the message in progress, if any.
	pub fn buffered(&self, csid: u32) -> Option<usize> {
		self.partial.get(&csid).map(|p| p.payload.len())
	}

	/// Start a message of the given length; it completes immediately if empty.
	///
	/// At most `reserve` bytes are allocated up front; the buffer grows as chunks arrive.
	pub fn begin(&mut self, csid: u32, header: &Message, length: usize, reserve: usize) -> Option<Message> {
		let partial = Partial {
			timestamp: header.timestamp,
			kind: header.kind,
			stream_id: header.stream_id,
			length,
			payload: BytesMut::with_capacity(length.min(reserve)),
		};

		self.partial.insert(csid, partial);
		self.append(csid, Bytes::new())
	}

	/// Append chunk data, returning the message once its declared length is reached.
	///
	/// Data for a chunk stream without a message in progress is ignored.
	pub fn append(&mut self, csid: u32, data: Bytes) -> Option<Message> {
		let partial = self.partial.get_mut(&csid)?;
		partial.payload.extend_from_slice(&data);

		if partial.payload.len() < partial.length {
			return None;
		}

		let partial = self.partial.remove(&csid)?;
		Some(Message {
			timestamp: partial.timestamp,
			kind: partial.kind,
			stream_id: partial.stream_id,
			payload: partial.payload.freeze(),
		})
	}

	/// Discard the message in progress, returning true if there was one.
	pub fn abort(&mut self, csid: u32) -> bool {
		self.partial.remove(&csid).is_some()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn header() -> Message {
		Message::new(MessageType::Audio, 1, 20, Bytes::new())
	}

	#[test]
	fn test_reassemble() {
		let mut reassembler = Reassembler::default();
		assert!(reassembler.begin(4, &header(), 6, 128).is_none());
		assert!(reassembler.append(4, Bytes::from_static(b"abc")).is_none());
		assert_eq!(reassembler.buffered(4), Some(3));

		let msg = reassembler.append(4, Bytes::from_static(b"def")).unwrap();
		assert_eq!(msg.payload.as_ref(), b"abcdef");
		assert_eq!(msg.timestamp, 20);
		assert_eq!(reassembler.buffered(4), None);
	}

	#[test]
	fn test_empty_message() {
		let mut reassembler = Reassembler::default();
		let msg = reassembler.begin(4, &header(), 0, 128).unwrap();
		assert!(msg.payload.is_empty());
	}

	#[test]
	fn test_large_message_grows() {
		let mut reassembler = Reassembler::default();
		assert!(reassembler.begin(4, &header(), 16 * 1024 * 1024, 1).is_none());
		assert!(reassembler.partial[&4].payload.capacity() < 1024);

		assert!(reassembler.append(4, Bytes::from(vec![7u8; 4096])).is_none());
		assert_eq!(reassembler.buffered(4), Some(4096));
	}

	#[test]
	fn test_abort() {
		let mut reassembler = Reassembler::default();
		reassembler.begin(4, &header(), 6, 128);
		reassembler.append(4, Bytes::from_static(b"abc"));

		assert!(reassembler.abort(4));
		assert!(!reassembler.abort(4));
		assert!(reassembler.append(4, Bytes::from_static(b"def")).is_none());
	}
}
