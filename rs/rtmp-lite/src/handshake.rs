//! The simple (unsigned) version 3 handshake.
//!
//! ```text
//! client                      server
//!   C0 (version) + C1  ------>
//!                      <------  S0 (version) + S1
//!   C2 (echo of S1)    ------>
//!                      <------  S2 (echo of C1)
//! ```

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;

use crate::{Error, Result};

pub const VERSION: u8 = 3;

/// Size of C1, C2, S1 and S2.
pub const SIZE: usize = 1536;

// Timestamp and zero/time2 fields precede the random data.
const RANDOM_OFFSET: usize = 8;

/// Client side of the handshake: holds C1 until S2 is verified.
pub struct Handshake {
	c1: Bytes,
	epoch: Instant,
}

impl Default for Handshake {
	fn default() -> Self {
		Self::new()
	}
}

impl Handshake {
	pub fn new() -> Self {
		let mut c1 = BytesMut::zeroed(SIZE);
		rand::rng().fill_bytes(&mut c1[RANDOM_OFFSET..]);

		Self {
			c1: c1.freeze(),
			epoch: Instant::now(),
		}
	}

	/// C0 followed by C1.
	pub fn c0c1(&self) -> Bytes {
		let mut buf = BytesMut::with_capacity(1 + SIZE);
		buf.put_u8(VERSION);
		buf.put_slice(&self.c1);
		buf.freeze()
	}

	/// Build C2 from S0 and S1: S1's timestamp, the local read time, then S1's random data.
	pub fn c2(&self, s0s1: &[u8]) -> Result<Bytes> {
		let (&version, s1) = s0s1.split_first().ok_or(Error::HandshakeVersion(0))?;
		if version != VERSION {
			return Err(Error::HandshakeVersion(version));
		}

		if s1.len() != SIZE {
			return Err(Error::Framing(format!("S1 is {} bytes", s1.len())));
		}

		let elapsed = self.epoch.elapsed().as_millis() as u32;

		let mut c2 = BytesMut::with_capacity(SIZE);
		c2.put_slice(&s1[..4]);
		c2.put_u32(elapsed);
		c2.put_slice(&s1[RANDOM_OFFSET..]);
		Ok(c2.freeze())
	}

	/// S2 must echo the random portion of C1 byte for byte.
	pub fn verify(&self, s2: &[u8]) -> Result<()> {
		let expected = &self.c1[RANDOM_OFFSET..];
		let actual = s2.get(RANDOM_OFFSET..).unwrap_or_default();

		if let Some((offset, (&expected, &actual))) = expected
			.iter()
			.zip(actual.iter())
			.enumerate()
			.find(|(_, (e, a))| e != a)
		{
			return Err(Error::HandshakeMismatch {
				offset: RANDOM_OFFSET + offset,
				expected,
				actual,
			});
		}

		if actual.len() != expected.len() {
			return Err(Error::Framing(format!("S2 is {} bytes", s2.len())));
		}

		Ok(())
	}
}
