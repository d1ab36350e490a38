//! Message framing: splitting outbound messages into chunks and reassembling inbound ones.
//!
//! Header state is kept per chunk stream and per direction, and only ever touched by the network worker.

mod decoder;
mod encoder;
mod header;
mod reassembler;

pub use decoder::*;
pub use encoder::*;
pub use header::*;
pub use reassembler::*;

/// The chunk size both sides assume until a Set Chunk Size says otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 128;
