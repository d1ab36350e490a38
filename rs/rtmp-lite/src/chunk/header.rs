use bytes::{Buf, BufMut};

use crate::coding::*;

/// Timestamp field value signalling a trailing 32-bit extended timestamp.
pub const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// Chunk stream ids 0 and 1 select the longer basic header forms.
pub const MIN_CSID: u32 = 2;
pub const MAX_CSID: u32 = 65599;

/// The message header form, the top two bits of the basic header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
	/// Absolute timestamp, length, type and stream id.
	Type0 = 0,
	/// Timestamp delta, length and type; same stream id.
	Type1 = 1,
	/// Timestamp delta only.
	Type2 = 2,
	/// No header; every field repeats.
	Type3 = 3,
}

impl ChunkFormat {
	fn from_bits(bits: u8) -> Self {
		match bits & 0b11 {
			0 => Self::Type0,
			1 => Self::Type1,
			2 => Self::Type2,
			_ => Self::Type3,
		}
	}

	/// Size of the message header following the basic header, without extended timestamp.
	pub fn header_size(self) -> usize {
		match self {
			Self::Type0 => 11,
			Self::Type1 => 7,
			Self::Type2 => 3,
			Self::Type3 => 0,
		}
	}
}

/// Encode the 1, 2 or 3 byte basic header.
///
/// Panics if the chunk stream id is outside `2..=65599`.
pub fn encode_basic_header<W: BufMut>(w: &mut W, format: ChunkFormat, csid: u32) {
	assert!((MIN_CSID..=MAX_CSID).contains(&csid), "invalid chunk stream id: {csid}");

	let fmt = (format as u8) << 6;
	match csid {
		0..=63 => w.put_u8(fmt | csid as u8),
		64..=319 => {
			w.put_u8(fmt);
			w.put_u8((csid - 64) as u8);
		}
		_ => {
			w.put_u8(fmt | 1);
			w.put_u16_le((csid - 64) as u16);
		}
	}
}

pub fn decode_basic_header<R: Buf>(r: &mut R) -> Result<(ChunkFormat, u32), DecodeError> {
	let first = u8::decode(r)?;
	let format = ChunkFormat::from_bits(first >> 6);

	let csid = match first & 0x3F {
		0 => u8::decode(r)? as u32 + 64,
		1 => {
			if r.remaining() < 2 {
				return Err(DecodeError::Short);
			}
			r.get_u16_le() as u32 + 64
		}
		csid => csid as u32,
	};

	Ok((format, csid))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roundtrip(format: ChunkFormat, csid: u32) -> usize {
		let mut buf = Vec::new();
		encode_basic_header(&mut buf, format, csid);
		let size = buf.len();

		let mut r = buf.as_slice();
		assert_eq!(decode_basic_header(&mut r).unwrap(), (format, csid));
		assert!(r.is_empty());
		size
	}

	#[test]
	fn test_basic_header_forms() {
		assert_eq!(roundtrip(ChunkFormat::Type0, 2), 1);
		assert_eq!(roundtrip(ChunkFormat::Type3, 63), 1);
		assert_eq!(roundtrip(ChunkFormat::Type1, 64), 2);
		assert_eq!(roundtrip(ChunkFormat::Type2, 319), 2);
		assert_eq!(roundtrip(ChunkFormat::Type0, 320), 3);
		assert_eq!(roundtrip(ChunkFormat::Type3, MAX_CSID), 3);
	}

	#[test]
	fn test_basic_header_bytes() {
		let mut buf = Vec::new();
		encode_basic_header(&mut buf, ChunkFormat::Type3, 3);
		assert_eq!(buf, [0xC3]);

		let mut buf = Vec::new();
		encode_basic_header(&mut buf, ChunkFormat::Type0, 400);
		// 400 - 64 = 336 = 0x0150, little-endian
		assert_eq!(buf, [0x01, 0x50, 0x01]);
	}

	#[test]
	fn test_basic_header_short() {
		let mut r: &[u8] = &[0x01, 0x50];
		assert_eq!(decode_basic_header(&mut r), Err(DecodeError::Short));
	}
}
