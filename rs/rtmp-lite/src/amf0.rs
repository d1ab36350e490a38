//! Action Message Format version 0, the value encoding used by commands and metadata.
//!
//! Objects keep their properties in insertion order; some servers inspect the order of
//! the `connect` command object.

use bytes::{Buf, BufMut};

use crate::coding::*;

/// Type markers, one byte before every value.
pub mod marker {
	pub const NUMBER: u8 = 0x00;
	pub const BOOLEAN: u8 = 0x01;
	pub const STRING: u8 = 0x02;
	pub const OBJECT: u8 = 0x03;
	pub const NULL: u8 = 0x05;
	pub const UNDEFINED: u8 = 0x06;
	pub const ECMA_ARRAY: u8 = 0x08;
	pub const OBJECT_END: u8 = 0x09;
	pub const STRICT_ARRAY: u8 = 0x0A;
	pub const DATE: u8 = 0x0B;
	pub const LONG_STRING: u8 = 0x0C;
}

// Nested objects beyond this are treated as hostile.
const MAX_DEPTH: usize = 64;

/// Ordered object properties.
pub type Properties = Vec<(String, Amf0Value)>;

/// A single AMF0 value.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
	Number(f64),
	Boolean(bool),
	String(String),
	Object(Properties),
	Null,
	Undefined,
	EcmaArray(Properties),
	StrictArray(Vec<Amf0Value>),
	Date { millis: f64, timezone: i16 },
	LongString(String),
}

impl Amf0Value {
	/// Build an object from borrowed keys.
	pub fn object<'a>(props: impl IntoIterator<Item = (&'a str, Amf0Value)>) -> Self {
		Self::Object(props.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
	}

	pub fn string(s: impl Into<String>) -> Self {
		Self::String(s.into())
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(s) | Self::LongString(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_number(&self) -> Option<f64> {
		match self {
			Self::Number(n) => Some(*n),
			_ => None,
		}
	}

	pub fn properties(&self) -> Option<&Properties> {
		match self {
			Self::Object(props) | Self::EcmaArray(props) => Some(props),
			_ => None,
		}
	}

	/// Look up a property on an object or ECMA array.
	pub fn get(&self, key: &str) -> Option<&Amf0Value> {
		self.properties()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
	}

	fn decode_depth<R: Buf>(r: &mut R, depth: usize) -> Result<Self, DecodeError> {
		if depth > MAX_DEPTH {
			return Err(DecodeError::TooDeep);
		}

		Ok(match u8::decode(r)? {
			marker::NUMBER => Self::Number(f64::decode(r)?),
			marker::BOOLEAN => Self::Boolean(u8::decode(r)? != 0),
			marker::STRING => {
				let size = u16::decode(r)? as usize;
				Self::String(decode_utf8(r, size)?)
			}
			marker::LONG_STRING => {
				let size = u32::decode(r)? as usize;
				Self::LongString(decode_utf8(r, size)?)
			}
			marker::OBJECT => Self::Object(decode_properties(r, depth)?),
			marker::ECMA_ARRAY => {
				// The count is only a hint; the end marker terminates.
				let _count = u32::decode(r)?;
				Self::EcmaArray(decode_properties(r, depth)?)
			}
			marker::STRICT_ARRAY => {
				let count = u32::decode(r)? as usize;
				if count > r.remaining() {
					return Err(DecodeError::Short);
				}

				let mut values = Vec::with_capacity(count);
				for _ in 0..count {
					values.push(Self::decode_depth(r, depth + 1)?);
				}
				Self::StrictArray(values)
			}
			marker::DATE => Self::Date {
				millis: f64::decode(r)?,
				timezone: i16::decode(r)?,
			},
			marker::NULL => Self::Null,
			marker::UNDEFINED => Self::Undefined,
			other => return Err(DecodeError::InvalidMarker(other)),
		})
	}
}

fn decode_key<R: Buf>(r: &mut R) -> Result<String, DecodeError> {
	let size = u16::decode(r)? as usize;
	decode_utf8(r, size)
}

fn decode_properties<R: Buf>(r: &mut R, depth: usize) -> Result<Properties, DecodeError> {
	let mut props = Vec::new();

	loop {
		let key = decode_key(r)?;
		if key.is_empty() && r.chunk().first() == Some(&marker::OBJECT_END) {
			r.advance(1);
			return Ok(props);
		}

		let value = Amf0Value::decode_depth(r, depth + 1)?;
		props.push((key, value));
	}
}

fn encode_key<W: BufMut>(w: &mut W, key: &str) {
	let size = key.len().min(u16::MAX as usize);
	w.put_u16(size as u16);
	w.put_slice(&key.as_bytes()[..size]);
}

fn encode_properties<W: BufMut>(w: &mut W, props: &Properties) {
	for (key, value) in props {
		encode_key(w, key);
		value.encode(w);
	}

	w.put_u16(0);
	w.put_u8(marker::OBJECT_END);
}

impl Encode for Amf0Value {
	fn encode<W: BufMut>(&self, w: &mut W) {
		match self {
			Self::Number(n) => {
				w.put_u8(marker::NUMBER);
				w.put_f64(*n);
			}
			Self::Boolean(b) => {
				w.put_u8(marker::BOOLEAN);
				w.put_u8(*b as u8);
			}
			// Strings that don't fit a 16-bit length are promoted.
			Self::String(s) if s.len() <= u16::MAX as usize => {
				w.put_u8(marker::STRING);
				w.put_u16(s.len() as u16);
				w.put_slice(s.as_bytes());
			}
			Self::String(s) | Self::LongString(s) => {
				w.put_u8(marker::LONG_STRING);
				w.put_u32(s.len() as u32);
				w.put_slice(s.as_bytes());
			}
			Self::Object(props) => {
				w.put_u8(marker::OBJECT);
				encode_properties(w, props);
			}
			Self::Null => w.put_u8(marker::NULL),
			Self::Undefined => w.put_u8(marker::UNDEFINED),
			Self::EcmaArray(props) => {
				w.put_u8(marker::ECMA_ARRAY);
				w.put_u32(props.len() as u32);
				encode_properties(w, props);
			}
			Self::StrictArray(values) => {
				w.put_u8(marker::STRICT_ARRAY);
				w.put_u32(values.len() as u32);
				for value in values {
					value.encode(w);
				}
			}
			Self::Date { millis, timezone } => {
				w.put_u8(marker::DATE);
				w.put_f64(*millis);
				w.put_i16(*timezone);
			}
		}
	}
}

impl Decode for Amf0Value {
	fn decode<R: Buf>(r: &mut R) -> Result<Self, DecodeError> {
		Self::decode_depth(r, 0)
	}
}

/// Decode every value remaining in the buffer.
pub fn decode_all<R: Buf>(r: &mut R) -> Result<Vec<Amf0Value>, DecodeError> {
	let mut values = Vec::new();
	while r.has_remaining() {
		values.push(Amf0Value::decode(r)?);
	}
	Ok(values)
}

/// The number of bytes occupied by the value at the start of `data`, nested values included.
///
/// Walks the encoding without allocating.
pub fn value_size(data: &[u8]) -> Result<usize, DecodeError> {
	let mut cursor = data;
	skip_value(&mut cursor, 0)?;
	Ok(data.len() - cursor.len())
}

fn skip(r: &mut &[u8], size: usize) -> Result<(), DecodeError> {
	if r.len() < size {
		return Err(DecodeError::Short);
	}

	r.advance(size);
	Ok(())
}

fn skip_value(r: &mut &[u8], depth: usize) -> Result<(), DecodeError> {
	if depth > MAX_DEPTH {
		return Err(DecodeError::TooDeep);
	}

	match u8::decode(r)? {
		marker::NUMBER => skip(r, 8),
		marker::BOOLEAN => skip(r, 1),
		marker::STRING => {
			let size = u16::decode(r)? as usize;
			skip(r, size)
		}
		marker::LONG_STRING => {
			let size = u32::decode(r)? as usize;
			skip(r, size)
		}
		marker::OBJECT => skip_properties(r, depth),
		marker::ECMA_ARRAY => {
			skip(r, 4)?;
			skip_properties(r, depth)
		}
		marker::STRICT_ARRAY => {
			let count = u32::decode(r)?;
			for _ in 0..count {
				skip_value(r, depth + 1)?;
			}
			Ok(())
		}
		marker::DATE => skip(r, 10),
		marker::NULL | marker::UNDEFINED => Ok(()),
		other => Err(DecodeError::InvalidMarker(other)),
	}
}

fn skip_properties(r: &mut &[u8], depth: usize) -> Result<(), DecodeError> {
	loop {
		let size = u16::decode(r)? as usize;
		if size == 0 && r.first() == Some(&marker::OBJECT_END) {
			r.advance(1);
			return Ok(());
		}

		skip(r, size)?;
		skip_value(r, depth + 1)?;
	}
}
