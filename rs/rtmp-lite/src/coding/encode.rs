use bytes::{Bytes, BytesMut};

/// Write the value to the buffer.
pub trait Encode: Sized {
	/// Encode the value to the given writer.
	///
	/// This will panic if the [bytes::BufMut] does not have enough capacity.
	fn encode<W: bytes::BufMut>(&self, w: &mut W);

	/// Encode the value into a [Bytes] buffer.
	///
	/// NOTE: This will allocate.
	fn encode_bytes(&self) -> Bytes {
		let mut buf = BytesMut::new();
		self.encode(&mut buf);
		buf.freeze()
	}
}

impl Encode for u8 {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		w.put_u8(*self);
	}
}

impl Encode for u16 {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		w.put_u16(*self);
	}
}

impl Encode for u32 {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		w.put_u32(*self);
	}
}

impl Encode for f64 {
	fn encode<W: bytes::BufMut>(&self, w: &mut W) {
		w.put_f64(*self);
	}
}

/// Encode the low 24 bits as a big-endian integer.
pub fn encode_u24<W: bytes::BufMut>(w: &mut W, v: u32) {
	w.put_uint((v & 0xFF_FFFF) as u64, 3);
}

/// Encode a 32-bit little-endian integer.
pub fn encode_u32_le<W: bytes::BufMut>(w: &mut W, v: u32) {
	w.put_u32_le(v);
}
