use crate::hash::{AddressHash, Hash};
use crate::packet::Packet;

use super::LINK_REQUEST_TRAILER_LEN;

/// Identifies a link. Derived deterministically from the LINK_REQUEST
/// packet that established it, so both ends compute the same value without
/// exchanging it separately. A LINK_PROOF (and every subsequent packet that
/// belongs to the link) instead carries this id directly as its
/// `destination` field — `LinkId::from` is only ever computed from the
/// original request, never re-derived from a later packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub AddressHash);

impl From<&Packet> for LinkId {
    fn from(packet: &Packet) -> Self {
        let data = packet.data.as_slice();
        // A LINK_REQUEST payload may carry leading app data before its
        // trailing key-and-proof material; only the app data (if any) is
        // hashed, so retransmits that differ only in key material still
        // land on the same id.
        let trim = LINK_REQUEST_TRAILER_LEN.min(data.len());
        let hashable_data = &data[..data.len() - trim];
        LinkId(AddressHash::new_from_hash(&Hash::new(
            Hash::generator()
                .chain_update([packet.header.to_meta() & 0b0000_1111])
                .chain_update(packet.destination.as_slice())
                .chain_update([packet.context as u8])
                .chain_update(hashable_data)
                .finalize()
                .into(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PacketDataBuffer;
    use crate::packet::{DestinationType, Header, HeaderType, IfacFlag, PacketContext, PacketType, PropagationType};

    fn link_request_packet(payload: &[u8]) -> Packet {
        let mut data = PacketDataBuffer::new();
        data.write(payload).unwrap();
        Packet {
            header: Header {
                ifac_flag: IfacFlag::Open,
                header_type: HeaderType::Type1,
                context_flag: false,
                propagation_type: PropagationType::Broadcast,
                destination_type: DestinationType::Single,
                packet_type: PacketType::LinkRequest,
                hops: 0,
            },
            ifac: None,
            destination: AddressHash::new([3u8; 16]),
            transport: None,
            context: PacketContext::None,
            data,
        }
    }

    #[test]
    fn link_id_is_stable_across_hop_count() {
        let payload = [1u8; LINK_REQUEST_TRAILER_LEN];
        let mut a = link_request_packet(&payload);
        let b = {
            let mut p = link_request_packet(&payload);
            p.header.hops = 5;
            p
        };
        a.header.hops = 0;
        assert_eq!(LinkId::from(&a), LinkId::from(&b));
    }

    #[test]
    fn link_id_ignores_trailing_key_material() {
        let mut payload_a = vec![9u8; LINK_REQUEST_TRAILER_LEN];
        payload_a.extend_from_slice(&[1u8; LINK_REQUEST_TRAILER_LEN]);
        let mut payload_b = vec![9u8; LINK_REQUEST_TRAILER_LEN];
        payload_b.extend_from_slice(&[2u8; LINK_REQUEST_TRAILER_LEN]);

        let a = link_request_packet(&payload_a);
        let b = link_request_packet(&payload_b);
        assert_eq!(LinkId::from(&a), LinkId::from(&b));
    }

    #[test]
    fn differing_destinations_yield_differing_link_ids() {
        let payload = [1u8; LINK_REQUEST_TRAILER_LEN];
        let mut a = link_request_packet(&payload);
        let mut b = link_request_packet(&payload);
        a.destination = AddressHash::new([3u8; 16]);
        b.destination = AddressHash::new([4u8; 16]);
        assert_ne!(LinkId::from(&a), LinkId::from(&b));
    }
}
