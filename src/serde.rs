//! Low-level wire (de)serialization, independent of `serde`/`rmp-serde`
//! (those are used for the higher-level msgpack framing in `transport`).
//! This trait pair is for the fixed binary packet layout in `packet.rs`.

use crate::buffer::OutputBuffer;
use crate::error::RnsError;

pub trait Serialize {
    /// Writes `self` into `buf`, returning the number of bytes written.
    fn serialize(&self, buf: &mut OutputBuffer) -> Result<usize, RnsError>;
}

pub trait Deserialize: Sized {
    /// Parses `self` from the front of `data`, returning the parsed value
    /// and the number of bytes consumed.
    fn deserialize(data: &[u8]) -> Result<(Self, usize), RnsError>;
}
