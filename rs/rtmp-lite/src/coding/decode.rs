use std::string::FromUtf8Error;

use thiserror::Error;

/// Read the value from the buffer.
///
/// If [DecodeError::Short] is returned, the caller should try again with more data.
pub trait Decode: Sized {
	/// Decode the value from the given buffer.
	fn decode<B: bytes::Buf>(buf: &mut B) -> Result<Self, DecodeError>;
}

/// A decode error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
	#[error("short buffer")]
	Short,

	#[error("invalid string")]
	InvalidString(#[from] FromUtf8Error),

	#[error("invalid marker: {0:#04x}")]
	InvalidMarker(u8),

	#[error("invalid value")]
	InvalidValue,

	#[error("nesting too deep")]
	TooDeep,

	#[error("unknown chunk stream: {0}")]
	UnknownStream(u32),

	#[error("unexpected header on chunk stream {0}")]
	UnexpectedHeader(u32),

	#[error("missing")]
	Missing,
}

impl Decode for u8 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match r.has_remaining() {
			true => Ok(r.get_u8()),
			false => Err(DecodeError::Short),
		}
	}
}

impl Decode for u16 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match r.remaining() >= 2 {
			true => Ok(r.get_u16()),
			false => Err(DecodeError::Short),
		}
	}
}

impl Decode for i16 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match r.remaining() >= 2 {
			true => Ok(r.get_i16()),
			false => Err(DecodeError::Short),
		}
	}
}

impl Decode for u32 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match r.remaining() >= 4 {
			true => Ok(r.get_u32()),
			false => Err(DecodeError::Short),
		}
	}
}

impl Decode for f64 {
	fn decode<R: bytes::Buf>(r: &mut R) -> Result<Self, DecodeError> {
		match r.remaining() >= 8 {
			true => Ok(r.get_f64()),
			false => Err(DecodeError::Short),
		}
	}
}

/// Decode a 24-bit big-endian integer, used for chunk timestamps and lengths.
pub fn decode_u24<R: bytes::Buf>(r: &mut R) -> Result<u32, DecodeError> {
	match r.remaining() >= 3 {
		true => Ok(r.get_uint(3) as u32),
		false => Err(DecodeError::Short),
	}
}

/// Decode a 32-bit little-endian integer.
///
/// The message stream id is the only little-endian field in the protocol.
pub fn decode_u32_le<R: bytes::Buf>(r: &mut R) -> Result<u32, DecodeError> {
	match r.remaining() >= 4 {
		true => Ok(r.get_u32_le()),
		false => Err(DecodeError::Short),
	}
}

/// Decode a string with the given length prefix already read.
pub fn decode_utf8<R: bytes::Buf>(r: &mut R, size: usize) -> Result<String, DecodeError> {
	if r.remaining() < size {
		return Err(DecodeError::Short);
	}

	let bytes = r.copy_to_bytes(size);
	Ok(String::from_utf8(bytes.to_vec())?)
}
