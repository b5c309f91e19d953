//! The canonical binary encoding.
//!
//! Everything that feeds a hash or a signature, and everything that goes
//! out on the wire, goes through [`encode`]/[`decode`]. This is a thin
//! wrapper over `bincode`'s default configuration (fixed-width
//! little-endian integers, a `u64` little-endian length prefix ahead of
//! every `Vec<u8>`/`String`, and a `u32` discriminant ahead of every enum
//! variant's payload) so that two independent implementations agreeing on
//! "use bincode's standard layout" produce bitwise-identical bytes for the
//! same logical value.
//!
//! Nothing outside this module should call `bincode::serialize` directly;
//! keeping one call site means the encoding can't silently drift between
//! the hashing path and the wire path.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

pub fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    // The only inputs are in-process, well-formed values; a serialization
    // failure here means a logic bug (e.g. a non-serializable type slipped
    // through), not a recoverable runtime condition.
    bincode::serialize(value).expect("canonical encoding of a well-formed value cannot fail")
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}
