//! Wire packet codec: header bit layout, address fields, context byte, and
//! payload, plus `packet_hash` duplicate-detection identity.

use core::fmt;

use sha2::{Digest, Sha256};

use crate::buffer::{OutputBuffer, PacketDataBuffer};
use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};
use crate::serde::{Deserialize, Serialize};

/// Maximum payload length in bytes (physical MTU minus header overhead).
pub const MAX_PAYLOAD_LENGTH: usize = 465;

/// Hop count at which an announce is accepted locally but never forwarded.
pub const MAX_FORWARD_HOPS: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfacFlag {
    Open = 0,
    Authenticated = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    /// Single 16-byte address field.
    Type1 = 0,
    /// Two 16-byte address fields (destination + next-hop/transport).
    Type2 = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationType {
    Broadcast = 0,
    Transport = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationType {
    Single = 0b00,
    Group = 0b01,
    Plain = 0b10,
    Link = 0b11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data = 0b00,
    Announce = 0b01,
    LinkRequest = 0b10,
    Proof = 0b11,
}

/// The packet-type-dependent context byte. Values chosen for this
/// implementation; interop with any other Reticulum-wire implementation
/// would need these to match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketContext {
    None = 0x00,
    Resource = 0x01,
    ResourceAdvertisement = 0x02,
    ResourceHashmap = 0x03,
    ResourceProof = 0x04,
    ResourceInitiatorCancel = 0x05,
    ResourceReceiverCancel = 0x06,
    CacheRequest = 0x07,
    Request = 0x08,
    Response = 0x09,
    PathResponse = 0x0a,
    Command = 0x0b,
    CommandStatus = 0x0c,
    Keepalive = 0x0d,
    LinkIdentify = 0x0e,
    LinkClose = 0x0f,
    LinkProof = 0x10,
    LinkRequestRtt = 0x11,
    PathRequest = 0x12,
}

impl PacketContext {
    fn from_byte(byte: u8) -> Result<Self, RnsError> {
        Ok(match byte {
            0x00 => Self::None,
            0x01 => Self::Resource,
            0x02 => Self::ResourceAdvertisement,
            0x03 => Self::ResourceHashmap,
            0x04 => Self::ResourceProof,
            0x05 => Self::ResourceInitiatorCancel,
            0x06 => Self::ResourceReceiverCancel,
            0x07 => Self::CacheRequest,
            0x08 => Self::Request,
            0x09 => Self::Response,
            0x0a => Self::PathResponse,
            0x0b => Self::Command,
            0x0c => Self::CommandStatus,
            0x0d => Self::Keepalive,
            0x0e => Self::LinkIdentify,
            0x0f => Self::LinkClose,
            0x10 => Self::LinkProof,
            0x11 => Self::LinkRequestRtt,
            0x12 => Self::PathRequest,
            _ => return Err(RnsError::PacketError),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub ifac_flag: IfacFlag,
    pub header_type: HeaderType,
    pub context_flag: bool,
    pub propagation_type: PropagationType,
    pub destination_type: DestinationType,
    pub packet_type: PacketType,
    pub hops: u8,
}

impl Header {
    /// The encoded header byte 1 (everything but hop count).
    pub fn to_meta(&self) -> u8 {
        self.byte1()
    }

    fn byte1(&self) -> u8 {
        let mut b = 0u8;
        b |= (self.ifac_flag as u8) << 7;
        b |= (self.header_type as u8) << 6;
        b |= (self.context_flag as u8) << 5;
        b |= (self.propagation_type as u8) << 4;
        b |= (self.destination_type as u8) << 2;
        b |= self.packet_type as u8;
        b
    }

    fn from_byte1(byte: u8, hops: u8) -> Result<Self, RnsError> {
        let ifac_flag = if byte & 0b1000_0000 != 0 { IfacFlag::Authenticated } else { IfacFlag::Open };
        let header_type = if byte & 0b0100_0000 != 0 { HeaderType::Type2 } else { HeaderType::Type1 };
        let context_flag = byte & 0b0010_0000 != 0;
        let propagation_type =
            if byte & 0b0001_0000 != 0 { PropagationType::Transport } else { PropagationType::Broadcast };
        let destination_type = match (byte >> 2) & 0b11 {
            0b00 => DestinationType::Single,
            0b01 => DestinationType::Group,
            0b10 => DestinationType::Plain,
            _ => DestinationType::Link,
        };
        let packet_type = match byte & 0b11 {
            0b00 => PacketType::Data,
            0b01 => PacketType::Announce,
            0b10 => PacketType::LinkRequest,
            _ => PacketType::Proof,
        };
        Ok(Self { ifac_flag, header_type, context_flag, propagation_type, destination_type, packet_type, hops })
    }
}

/// A decoded (or about-to-be-encoded) packet.
#[derive(Clone)]
pub struct Packet {
    pub header: Header,
    pub ifac: Option<PacketDataBuffer>,
    pub destination: AddressHash,
    pub transport: Option<AddressHash>,
    pub context: PacketContext,
    pub data: PacketDataBuffer,
}

impl Packet {
    /// Duplicate-detection identity: SHA-256 over the header's low nibble
    /// (hop count and IFAC excluded so hop count doesn't perturb identity),
    /// the address field(s), the context byte, and the payload.
    pub fn packet_hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update([self.header.byte1() & 0b0000_1111]);
        hasher.update(self.destination.as_slice());
        if let Some(transport) = &self.transport {
            hasher.update(transport.as_slice());
        }
        hasher.update([self.context as u8]);
        hasher.update(self.data.as_slice());
        Hash::new(hasher.finalize().into())
    }
}

impl Serialize for Packet {
    fn serialize(&self, buf: &mut OutputBuffer) -> Result<usize, RnsError> {
        if self.data.len() > MAX_PAYLOAD_LENGTH {
            return Err(RnsError::PacketError);
        }
        if self.header.header_type == HeaderType::Type2 && self.transport.is_none() {
            return Err(RnsError::PacketError);
        }

        let mut written = buf.write(&[self.header.byte1()])?;
        written += buf.write(&[self.header.hops])?;

        if self.header.ifac_flag == IfacFlag::Authenticated {
            let ifac = self.ifac.as_ref().ok_or(RnsError::PacketError)?;
            written += buf.write(ifac.as_slice())?;
        }

        written += buf.write(self.destination.as_slice())?;
        if let Some(transport) = &self.transport {
            written += buf.write(transport.as_slice())?;
        }

        written += buf.write(&[self.context as u8])?;
        written += buf.write(self.data.as_slice())?;

        Ok(written)
    }
}

impl Deserialize for Packet {
    fn deserialize(data: &[u8]) -> Result<(Self, usize), RnsError> {
        if data.len() < 2 {
            return Err(RnsError::PacketError);
        }
        let byte1 = data[0];
        let hops = data[1];
        let header = Header::from_byte1(byte1, hops)?;
        let mut offset = 2usize;

        // The IFAC field is variable-length (1-64 bytes); its length is a
        // property of the receiving interface, not the packet, so the
        // interface layer strips it before handing the remainder here. This
        // codec only round-trips an IFAC blob it is explicitly given on encode.
        let ifac = None;

        let address_len = crate::hash::ADDRESS_HASH_LENGTH;
        let needed = match header.header_type {
            HeaderType::Type1 => address_len,
            HeaderType::Type2 => address_len * 2,
        };
        if data.len() < offset + needed + 1 {
            return Err(RnsError::PacketError);
        }

        let mut dest_bytes = [0u8; 16];
        dest_bytes.copy_from_slice(&data[offset..offset + address_len]);
        let destination = AddressHash::new(dest_bytes);
        offset += address_len;

        let transport = match header.header_type {
            HeaderType::Type1 => None,
            HeaderType::Type2 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&data[offset..offset + address_len]);
                offset += address_len;
                Some(AddressHash::new(bytes))
            }
        };

        let context = PacketContext::from_byte(data[offset])?;
        offset += 1;

        let payload = &data[offset..];
        if payload.len() > MAX_PAYLOAD_LENGTH {
            return Err(RnsError::PacketError);
        }
        let packet_data = PacketDataBuffer::from(payload);
        offset += payload.len();

        Ok((Self { header, ifac, destination, transport, context, data: packet_data }, offset))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet{{type={:?}, dest={}, hops={}, payload={}B}}",
            self.header.packet_type,
            self.destination,
            self.header.hops,
            self.data.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(packet_type: PacketType, header_type: HeaderType) -> Header {
        Header {
            ifac_flag: IfacFlag::Open,
            header_type,
            context_flag: false,
            propagation_type: PropagationType::Broadcast,
            destination_type: DestinationType::Single,
            packet_type,
            hops: 3,
        }
    }

    #[test]
    fn encode_then_decode_round_trips_single_address() {
        let packet = Packet {
            header: sample_header(PacketType::Data, HeaderType::Type1),
            ifac: None,
            destination: AddressHash::new([7u8; 16]),
            transport: None,
            context: PacketContext::None,
            data: PacketDataBuffer::from(&b"hello"[..]),
        };

        let mut buf = [0u8; 512];
        let mut out = OutputBuffer::new(&mut buf);
        packet.serialize(&mut out).expect("serialize");

        let (decoded, consumed) = Packet::deserialize(out.as_slice()).expect("deserialize");
        assert_eq!(consumed, out.len());
        assert_eq!(decoded.destination, packet.destination);
        assert_eq!(decoded.data.as_slice(), packet.data.as_slice());
        assert_eq!(decoded.header.hops, 3);
    }

    #[test]
    fn encode_then_decode_round_trips_two_address_fields() {
        let mut header = sample_header(PacketType::Data, HeaderType::Type2);
        header.destination_type = DestinationType::Link;
        let packet = Packet {
            header,
            ifac: None,
            destination: AddressHash::new([1u8; 16]),
            transport: Some(AddressHash::new([2u8; 16])),
            context: PacketContext::LinkProof,
            data: PacketDataBuffer::from(&b"link payload"[..]),
        };

        let mut buf = [0u8; 512];
        let mut out = OutputBuffer::new(&mut buf);
        packet.serialize(&mut out).expect("serialize");

        let (decoded, _) = Packet::deserialize(out.as_slice()).expect("deserialize");
        assert_eq!(decoded.transport, packet.transport);
        assert_eq!(decoded.header.header_type, HeaderType::Type2);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let packet = Packet {
            header: sample_header(PacketType::Data, HeaderType::Type1),
            ifac: None,
            destination: AddressHash::new([0u8; 16]),
            transport: None,
            context: PacketContext::None,
            data: PacketDataBuffer::from(alloc::vec![0u8; MAX_PAYLOAD_LENGTH + 1].as_slice()),
        };

        let mut buf = [0u8; 1024];
        let mut out = OutputBuffer::new(&mut buf);
        assert!(matches!(packet.serialize(&mut out), Err(RnsError::PacketError)));
    }

    #[test]
    fn max_payload_boundary_is_accepted() {
        let packet = Packet {
            header: sample_header(PacketType::Data, HeaderType::Type1),
            ifac: None,
            destination: AddressHash::new([0u8; 16]),
            transport: None,
            context: PacketContext::None,
            data: PacketDataBuffer::from(alloc::vec![0u8; MAX_PAYLOAD_LENGTH].as_slice()),
        };

        let mut buf = [0u8; 1024];
        let mut out = OutputBuffer::new(&mut buf);
        assert!(packet.serialize(&mut out).is_ok());
    }

    #[test]
    fn hop_count_does_not_affect_packet_hash() {
        let mut packet = Packet {
            header: sample_header(PacketType::Announce, HeaderType::Type1),
            ifac: None,
            destination: AddressHash::new([9u8; 16]),
            transport: None,
            context: PacketContext::None,
            data: PacketDataBuffer::from(&b"announce"[..]),
        };
        let hash_at_hop_3 = packet.packet_hash();
        packet.header.hops = 4;
        let hash_at_hop_4 = packet.packet_hash();
        assert_eq!(hash_at_hop_3.as_slice(), hash_at_hop_4.as_slice());
    }
}
