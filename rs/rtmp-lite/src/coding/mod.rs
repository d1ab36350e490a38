//! Big-endian primitives shared by the chunk, control and AMF0 layers.
//!
//! You should not need this module directly; see [crate] for the high-level API.

mod decode;
mod encode;

pub use decode::*;
pub use encode::*;
