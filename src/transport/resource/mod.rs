//! Resource transfer: reliable delivery of payloads larger than a single
//! packet, split into fixed-size parts, advertised up front, and
//! acknowledged with a per-window bitmap.

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use bzip2::read::{BzDecoder, BzEncoder};
use bzip2::Compression;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::buffer::PacketDataBuffer;
use crate::error::RnsError;
use crate::hash::{AddressHash, Hash};
use crate::packet::{
    DestinationType, Header, HeaderType, IfacFlag, Packet, PacketContext, PacketType, PropagationType,
};

pub const METADATA_MAX_SIZE: usize = 1024;
pub const RANDOM_HASH_SIZE: usize = 4;
pub const MAPHASH_LEN: usize = 4;
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
pub const FLAG_SPLIT: u8 = 0b0000_0010;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAdvertisement {
    pub transfer_size: usize,
    pub data_size: usize,
    pub parts: u16,
    pub hash: [u8; 32],
    pub random_hash: [u8; RANDOM_HASH_SIZE],
    pub original_hash: [u8; 32],
    pub segment_index: u16,
    pub total_segments: u16,
    pub request_id: Option<[u8; 16]>,
    pub flags: u8,
    /// Concatenated per-part hashes, each truncated to `MAPHASH_LEN` bytes.
    pub hashmap: Vec<u8>,
}

impl ResourceAdvertisement {
    pub fn pack(&self) -> Result<Vec<u8>, RnsError> {
        rmp_serde::to_vec_named(self).map_err(|_| RnsError::PacketError)
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, RnsError> {
        rmp_serde::from_slice(bytes).map_err(|_| RnsError::PacketError)
    }

    pub fn hash(&self) -> Hash {
        Hash::new(self.hash)
    }

    pub fn is_split(&self) -> bool {
        self.flags & FLAG_SPLIT != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }
}

fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = BzEncoder::new(data, Compression::best());
    let mut out = Vec::new();
    if encoder.read_to_end(&mut out).is_ok() && out.len() < data.len() {
        out
    } else {
        data.to_vec()
    }
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, RnsError> {
    let mut decoder = BzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|_| RnsError::PacketError)?;
    Ok(out)
}

fn part_hash(part: &[u8]) -> [u8; MAPHASH_LEN] {
    let full = Hash::new_from_slice(part);
    let mut truncated = [0u8; MAPHASH_LEN];
    truncated.copy_from_slice(&full.as_slice()[..MAPHASH_LEN]);
    truncated
}

pub fn build_packet(destination: AddressHash, context: PacketContext, payload: &[u8]) -> Result<Packet, RnsError> {
    let mut data = PacketDataBuffer::new();
    data.write(payload)?;
    Ok(Packet {
        header: Header {
            ifac_flag: IfacFlag::Open,
            header_type: HeaderType::Type1,
            context_flag: false,
            propagation_type: PropagationType::Broadcast,
            destination_type: DestinationType::Single,
            packet_type: PacketType::Data,
            hops: 0,
        },
        ifac: None,
        destination,
        transport: None,
        context,
        data,
    })
}

/// Sender-side state for one outbound resource transfer, including the
/// adaptive send window: it grows by one part on a fully-acknowledged
/// window and halves (bounded below by `min_window`) the moment a gap shows
/// up in an ACK bitmap, so a lossy link converges on a window size it can
/// actually sustain instead of flooding it.
pub struct ResourceSender {
    pub destination: AddressHash,
    pub advertisement: ResourceAdvertisement,
    pub metadata: Option<Vec<u8>>,
    payload: Vec<u8>,
    part_size: usize,
    window: usize,
    min_window: usize,
    max_window: usize,
    /// Index of the first part not yet acknowledged.
    base: u16,
}

impl ResourceSender {
    pub fn new(
        destination: AddressHash,
        data: Vec<u8>,
        metadata: Option<Vec<u8>>,
        part_size: usize,
        min_window: usize,
        max_window: usize,
    ) -> Result<Self, RnsError> {
        if let Some(meta) = &metadata {
            if meta.len() > METADATA_MAX_SIZE {
                return Err(RnsError::InvalidArgument);
            }
        }
        if part_size == 0 || min_window == 0 || max_window < min_window {
            return Err(RnsError::InvalidArgument);
        }

        let original_hash = Hash::new_from_slice(&data);
        let compressed = compress(&data);
        let flags = if compressed.len() < data.len() { FLAG_COMPRESSED } else { 0 };
        let payload = if flags & FLAG_COMPRESSED != 0 { compressed } else { data.clone() };

        let parts = payload.len().div_ceil(part_size).max(1) as u16;
        let hashmap: Vec<u8> =
            payload.chunks(part_size).flat_map(|chunk| part_hash(chunk)).collect();

        let mut random_hash = [0u8; RANDOM_HASH_SIZE];
        OsRng.fill_bytes(&mut random_hash);

        let advertisement = ResourceAdvertisement {
            transfer_size: payload.len(),
            data_size: data.len(),
            parts,
            hash: Hash::new_from_slice(&payload).to_bytes(),
            random_hash,
            original_hash: original_hash.to_bytes(),
            segment_index: 0,
            total_segments: 1,
            request_id: None,
            flags,
            hashmap,
        };

        Ok(Self { destination, advertisement, metadata, payload, part_size, window: min_window, min_window, max_window, base: 0 })
    }

    pub fn advertisement_packet(&self) -> Result<Packet, RnsError> {
        build_packet(self.destination, PacketContext::ResourceAdvertisement, &self.advertisement.pack()?)
    }

    pub fn part_payload(&self, index: u16) -> Option<&[u8]> {
        self.payload.chunks(self.part_size).nth(index as usize)
    }

    pub fn part_count(&self) -> u16 {
        self.advertisement.parts
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn is_complete(&self) -> bool {
        self.base >= self.part_count()
    }

    fn part_packet(&self, index: u16) -> Option<Packet> {
        let part = self.part_payload(index)?;
        let mut payload = Vec::with_capacity(34 + part.len());
        payload.extend_from_slice(&self.advertisement.hash);
        payload.extend_from_slice(&index.to_be_bytes());
        payload.extend_from_slice(part);
        build_packet(self.destination, PacketContext::Resource, &payload).ok()
    }

    /// Packets for every part in the current send window that hasn't been
    /// acknowledged yet: `base..base+window`, capped at the transfer's part
    /// count. Calling this again after `apply_window_ack` halves the window
    /// is what re-sends the still-missing parts.
    pub fn window_packets(&self) -> Vec<Packet> {
        let end = ((self.base as usize) + self.window).min(self.part_count() as usize) as u16;
        (self.base..end).filter_map(|index| self.part_packet(index)).collect()
    }

    /// Applies a window-ACK bitmap covering `base..base+window`: advances
    /// `base` past every part acknowledged contiguously from the start of
    /// the window, then grows the window by one on a fully-acknowledged
    /// window or halves it (bounded by `min_window`) the moment a gap is
    /// found, so the next `window_packets()` call retransmits a smaller,
    /// more reliable batch.
    pub fn apply_window_ack(&mut self, bitmap: &[u8]) {
        let window_len = self.window.min((self.part_count() as usize).saturating_sub(self.base as usize));
        if window_len == 0 {
            return;
        }
        let acked = unpack_bitmap(bitmap, window_len);
        let acked: std::collections::HashSet<u16> = acked.into_iter().collect();

        let mut advanced: u16 = 0;
        while (advanced as usize) < window_len && acked.contains(&advanced) {
            advanced += 1;
        }
        self.base += advanced;

        if advanced as usize == window_len {
            self.window = (self.window + 1).min(self.max_window);
        } else {
            self.window = (self.window / 2).max(self.min_window);
        }
    }
}

/// A part-received bitmap, packed little-endian-within-byte, part-index
/// ascending, one bit per part in the current transfer window.
pub fn pack_bitmap(window_len: usize, received: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; window_len.div_ceil(8)];
    for &index in received {
        let idx = index as usize;
        if idx < window_len {
            bytes[idx / 8] |= 1 << (idx % 8);
        }
    }
    bytes
}

pub fn unpack_bitmap(bitmap: &[u8], window_len: usize) -> Vec<u16> {
    (0..window_len)
        .filter(|&idx| bitmap.get(idx / 8).map(|byte| byte & (1 << (idx % 8)) != 0).unwrap_or(false))
        .map(|idx| idx as u16)
        .collect()
}

struct IncomingResource {
    advertisement: ResourceAdvertisement,
    received: HashMap<u16, Vec<u8>>,
    started_at: f64,
}

/// Receiver-side bookkeeping for in-flight inbound resources, keyed by the
/// advertisement hash.
pub struct ResourceManager {
    pub incoming: HashMap<[u8; 32], IncomingResource>,
    timeout: Duration,
    hashmap_page_size: usize,
}

impl ResourceManager {
    pub fn new_with_config(timeout: Duration, hashmap_page_size: usize) -> Self {
        Self { incoming: HashMap::new(), timeout, hashmap_page_size }
    }

    /// Dispatches an inbound resource-related packet. Returns any response
    /// packets (bitmap ACKs) that should be sent back to the sender.
    pub fn handle_packet(&mut self, packet: &Packet, now: f64) -> Vec<Packet> {
        match packet.context {
            PacketContext::ResourceAdvertisement => self.handle_advertisement(packet, now),
            PacketContext::Resource => self.handle_part(packet),
            _ => Vec::new(),
        }
    }

    fn handle_advertisement(&mut self, packet: &Packet, now: f64) -> Vec<Packet> {
        let Ok(advertisement) = ResourceAdvertisement::unpack(packet.data.as_slice()) else {
            return Vec::new();
        };

        // A segmented advertisement handshake (for hashmaps spanning more
        // than one packet) isn't implemented; reject rather than accept a
        // resource we can't fully validate.
        if advertisement.is_split() {
            return Vec::new();
        }

        let key = advertisement.hash;
        self.incoming.insert(key, IncomingResource { advertisement, received: HashMap::new(), started_at: now });
        Vec::new()
    }

    fn handle_part(&mut self, packet: &Packet) -> Vec<Packet> {
        // Part payloads are framed as `resource_hash(32) || part_index(2,BE)
        // || data`.
        let data = packet.data.as_slice();
        if data.len() < 34 {
            return Vec::new();
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&data[..32]);
        let index = u16::from_be_bytes([data[32], data[33]]);
        let part = &data[34..];

        let Some(incoming) = self.incoming.get_mut(&key) else {
            return Vec::new();
        };

        let start = index as usize * MAPHASH_LEN;
        let Some(expected) = incoming.advertisement.hashmap.get(start..start + MAPHASH_LEN) else {
            return Vec::new();
        };
        if part_hash(part).as_slice() != expected {
            // Bit-flip or truncated part: drop it. The sender will see the
            // gap in the next window-ACK bitmap and retransmit.
            return Vec::new();
        }

        incoming.received.insert(index, part.to_vec());
        Vec::new()
    }

    /// Reassembles and decompresses a resource once every part has arrived.
    pub fn take_complete(&mut self, hash: &[u8; 32]) -> Result<Option<Vec<u8>>, RnsError> {
        let Some(incoming) = self.incoming.get(hash) else {
            return Ok(None);
        };
        if incoming.received.len() < incoming.advertisement.parts as usize {
            return Ok(None);
        }

        let mut payload = Vec::with_capacity(incoming.advertisement.transfer_size);
        for index in 0..incoming.advertisement.parts {
            let part = incoming.received.get(&index).ok_or(RnsError::IncorrectHash)?;
            payload.extend_from_slice(part);
        }

        let actual_hash = Hash::new_from_slice(&payload);
        if actual_hash.to_bytes() != incoming.advertisement.hash {
            return Err(RnsError::IncorrectHash);
        }

        let data = if incoming.advertisement.is_compressed() { decompress(&payload)? } else { payload };
        self.incoming.remove(hash);
        Ok(Some(data))
    }

    pub fn bitmap_for(&self, hash: &[u8; 32]) -> Option<Vec<u8>> {
        let incoming = self.incoming.get(hash)?;
        let window_len = (incoming.advertisement.parts as usize).min(self.hashmap_page_size.max(1));
        let received: Vec<u16> = incoming.received.keys().copied().filter(|&i| (i as usize) < window_len).collect();
        Some(pack_bitmap(window_len, &received))
    }

    pub fn expire(&mut self, now: f64) {
        let timeout = self.timeout.as_secs_f64();
        self.incoming.retain(|_, incoming| now - incoming.started_at < timeout);
    }
}

#[cfg(test)]
mod manager_tests {
    use super::*;

    #[test]
    fn round_trip_small_transfer_through_sender_and_manager() {
        let destination = AddressHash::new([1u8; 16]);
        let data = b"a reticulum resource transfer payload".to_vec();
        let sender = ResourceSender::new(destination, data.clone(), None, 8, 1, 16).expect("sender");

        let mut manager = ResourceManager::new_with_config(Duration::from_secs(30), 64);
        let adv_packet = sender.advertisement_packet().expect("advertisement packet");
        manager.handle_packet(&adv_packet, 0.0);

        let hash = sender.advertisement.hash;
        for index in 0..sender.part_count() {
            let part = sender.part_payload(index).expect("part");
            let mut payload = Vec::with_capacity(34 + part.len());
            payload.extend_from_slice(&hash);
            payload.extend_from_slice(&index.to_be_bytes());
            payload.extend_from_slice(part);
            let packet = build_packet(destination, PacketContext::Resource, &payload).expect("part packet");
            manager.handle_packet(&packet, 1.0);
        }

        let reassembled = manager.take_complete(&hash).expect("take").expect("complete");
        assert_eq!(reassembled, data);
    }

    #[test]
    fn bitmap_round_trips_received_part_indices() {
        let received = [0u16, 2, 5];
        let bitmap = pack_bitmap(8, &received);
        let mut decoded = unpack_bitmap(&bitmap, 8);
        decoded.sort_unstable();
        assert_eq!(decoded, vec![0, 2, 5]);
    }

    #[test]
    fn expired_incoming_resources_are_swept() {
        let destination = AddressHash::new([1u8; 16]);
        let sender = ResourceSender::new(destination, vec![1, 2, 3], None, 8, 1, 16).expect("sender");
        let mut manager = ResourceManager::new_with_config(Duration::from_secs(5), 64);
        manager.handle_packet(&sender.advertisement_packet().expect("adv"), 0.0);
        assert_eq!(manager.incoming.len(), 1);
        manager.expire(10.0);
        assert!(manager.incoming.is_empty());
    }

    #[test]
    fn a_bit_flipped_part_is_rejected_and_a_correct_retransmit_is_accepted() {
        let destination = AddressHash::new([1u8; 16]);
        let data = b"a reticulum resource transfer payload".to_vec();
        let sender = ResourceSender::new(destination, data.clone(), None, 8, 1, 16).expect("sender");

        let mut manager = ResourceManager::new_with_config(Duration::from_secs(30), 64);
        manager.handle_packet(&sender.advertisement_packet().expect("advertisement packet"), 0.0);
        let hash = sender.advertisement.hash;

        let part = sender.part_payload(0).expect("part").to_vec();
        let mut corrupted = part.clone();
        corrupted[0] ^= 0xFF;

        let mut bad_payload = Vec::with_capacity(34 + corrupted.len());
        bad_payload.extend_from_slice(&hash);
        bad_payload.extend_from_slice(&0u16.to_be_bytes());
        bad_payload.extend_from_slice(&corrupted);
        let bad_packet = build_packet(destination, PacketContext::Resource, &bad_payload).expect("part packet");
        manager.handle_packet(&bad_packet, 1.0);

        assert!(!manager.incoming.get(&hash).unwrap().received.contains_key(&0));

        let mut good_payload = Vec::with_capacity(34 + part.len());
        good_payload.extend_from_slice(&hash);
        good_payload.extend_from_slice(&0u16.to_be_bytes());
        good_payload.extend_from_slice(&part);
        let good_packet = build_packet(destination, PacketContext::Resource, &good_payload).expect("part packet");
        manager.handle_packet(&good_packet, 2.0);

        assert!(manager.incoming.get(&hash).unwrap().received.contains_key(&0));
    }

    #[test]
    fn send_window_grows_on_full_ack_and_halves_on_a_gap() {
        let destination = AddressHash::new([1u8; 16]);
        let data = vec![0u8; 64];
        let mut sender = ResourceSender::new(destination, data, None, 4, 2, 8).expect("sender");
        assert_eq!(sender.window(), 2);

        let full_ack = pack_bitmap(2, &[0, 1]);
        sender.apply_window_ack(&full_ack);
        assert_eq!(sender.window(), 3);

        let gappy_ack = pack_bitmap(3, &[0, 2]);
        sender.apply_window_ack(&gappy_ack);
        assert_eq!(sender.window(), 2, "halves from 3 towards 1 but clamps at min_window (2)");
    }

    #[test]
    fn window_never_drops_below_the_configured_minimum() {
        let destination = AddressHash::new([1u8; 16]);
        let data = vec![0u8; 64];
        let mut sender = ResourceSender::new(destination, data, None, 4, 2, 8).expect("sender");

        // An immediate gap at the very start of the window halves 2 -> 1,
        // which must clamp back up to min_window (2).
        let empty_ack = pack_bitmap(2, &[]);
        sender.apply_window_ack(&empty_ack);
        assert_eq!(sender.window(), 2);
    }

    #[test]
    fn window_packets_resend_only_the_unacknowledged_tail() {
        let destination = AddressHash::new([1u8; 16]);
        let data = vec![0u8; 64];
        let sender = ResourceSender::new(destination, data, None, 4, 2, 8).expect("sender");
        assert_eq!(sender.window_packets().len(), 2);
    }
}
