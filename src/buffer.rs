//! Byte buffers used while building and serializing packets.
//!
//! `PacketDataBuffer` is a growable scratch buffer used to assemble both a
//! packet's wire payload and the intermediate byte strings that get signed
//! (which may be larger than any single packet's payload, e.g. an announce's
//! signed preimage includes the destination hash once more than the final
//! wire payload does). `OutputBuffer` borrows a caller-supplied fixed slice
//! and is used by the low-level wire codec in `packet.rs`.

use alloc::vec::Vec;
use core::fmt;

use crate::error::RnsError;

/// Upper bound on how much a `PacketDataBuffer` will hold. Generous relative
/// to the 465-byte wire payload cap (`packet::MAX_PAYLOAD_LENGTH`) because
/// the buffer is also used to stage pre-signature byte strings.
const MAX_PACKET_DATA_LEN: usize = 4096;

#[derive(Default, Clone)]
pub struct PacketDataBuffer(Vec<u8>);

impl PacketDataBuffer {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn reset(&mut self) {
        self.0.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), RnsError> {
        if self.0.len().saturating_add(data.len()) > MAX_PACKET_DATA_LEN {
            return Err(RnsError::OutOfMemory);
        }
        self.0.extend_from_slice(data);
        Ok(())
    }

    /// Writes `data`, returning `self` so calls can be chained with `?`.
    pub fn chain_write(&mut self, data: &[u8]) -> Result<&mut Self, RnsError> {
        self.write(data)?;
        Ok(self)
    }

    /// Writes `data` known by the caller to fit, swallowing any error so
    /// calls can be chained without intermediate `?`. Prefer `chain_write`
    /// unless the caller has already bounded the total length.
    pub fn chain_safe_write(&mut self, data: &[u8]) -> &mut Self {
        let _ = self.write(data);
        self
    }
}

impl From<&[u8]> for PacketDataBuffer {
    fn from(data: &[u8]) -> Self {
        Self(data.to_vec())
    }
}

impl fmt::Display for PacketDataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for PacketDataBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketDataBuffer({} bytes)", self.0.len())
    }
}

/// A fixed-capacity, caller-owned output slice used by the wire codec.
pub struct OutputBuffer<'a> {
    data: &'a mut [u8],
    written: usize,
}

impl<'a> OutputBuffer<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, written: 0 }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, RnsError> {
        let end = self.written.checked_add(bytes.len()).ok_or(RnsError::OutOfMemory)?;
        if end > self.data.len() {
            return Err(RnsError::OutOfMemory);
        }
        self.data[self.written..end].copy_from_slice(bytes);
        self.written = end;
        Ok(bytes.len())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.written]
    }

    pub fn len(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }
}

impl<'a> fmt::Display for OutputBuffer<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_data_buffer_chains() {
        let mut buf = PacketDataBuffer::new();
        buf.chain_safe_write(&[1, 2]).chain_safe_write(&[3, 4]);
        assert_eq!(buf.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn packet_data_buffer_rejects_overflow() {
        let mut buf = PacketDataBuffer::new();
        let big = alloc::vec![0u8; MAX_PACKET_DATA_LEN + 1];
        assert!(matches!(buf.write(&big), Err(RnsError::OutOfMemory)));
    }

    #[test]
    fn output_buffer_rejects_overflow() {
        let mut backing = [0u8; 4];
        let mut out = OutputBuffer::new(&mut backing);
        assert!(out.write(&[1, 2, 3, 4]).is_ok());
        assert!(matches!(out.write(&[5]), Err(RnsError::OutOfMemory)));
    }
}
