pub mod driver;

use alloc::collections::BinaryHeap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::Ordering;

use crate::hash::AddressHash;
use crate::packet::Packet;

pub use driver::{InterfaceDriver, InterfaceDriverFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceMode {
    Full,
    Gateway,
    AccessPoint,
    Roaming,
    Boundary,
}

impl InterfaceMode {
    /// Announce propagation matrix: whether an announce received on `from`
    /// should be re-emitted on an interface in mode `self`.
    pub fn propagates_from(self, from: InterfaceMode) -> bool {
        use InterfaceMode::*;
        matches!(
            (from, self),
            (Full, Full)
                | (Full, Boundary)
                | (Full, Roaming)
                | (Roaming, Full)
                | (Boundary, Full)
                | (Boundary, Boundary)
                | (AccessPoint, Roaming)
        )
    }

    /// Interfaces in roaming/AP mode keep much shorter path lifetimes.
    pub fn path_expiry(self) -> core::time::Duration {
        match self {
            InterfaceMode::Roaming | InterfaceMode::AccessPoint => core::time::Duration::from_secs(300),
            _ => core::time::Duration::from_secs(60 * 60 * 24),
        }
    }
}

/// A queued outbound announce, ordered by priority (higher first) within a
/// single interface's queue.
#[derive(Debug, Clone)]
pub struct AnnounceQueueEntry {
    pub packet: Packet,
    pub destination_hash: AddressHash,
    pub hops: u8,
    pub enqueued_at: f64,
    pub retry_count: u8,
    pub priority: f64,
    /// Earliest time this entry may be sent. Set to `enqueued_at` for an
    /// announce originated locally; set to `enqueued_at + base_delay^hops`
    /// for one being re-broadcast, so distant nodes don't all retransmit in
    /// the same instant.
    pub ready_at: f64,
}

impl PartialEq for AnnounceQueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}
impl Eq for AnnounceQueueEntry {}
impl PartialOrd for AnnounceQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for AnnounceQueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.partial_cmp(&other.priority).unwrap_or(Ordering::Equal)
    }
}

/// Per-interface announce queue, ordered by priority (closer hops first),
/// subject to a registered bandwidth cap.
#[derive(Default)]
pub struct AnnounceQueue {
    heap: BinaryHeap<AnnounceQueueEntry>,
}

impl AnnounceQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: AnnounceQueueEntry) {
        self.heap.push(entry);
    }

    pub fn pop(&mut self) -> Option<AnnounceQueueEntry> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Replaces app-data on an already-queued announce for the same
    /// destination while retaining its queue position (priority), per the
    /// "newer announce while one is queued" propagation rule.
    pub fn replace_app_data(&mut self, destination_hash: &AddressHash, packet: Packet) -> bool {
        let mut entries: Vec<_> = self.heap.drain().collect();
        let mut replaced = false;
        for entry in entries.iter_mut() {
            if entry.destination_hash == *destination_hash {
                entry.packet = packet.clone();
                replaced = true;
                break;
            }
        }
        self.heap = entries.into_iter().collect();
        replaced
    }
}

/// A registered interface: its driver, mode, IFAC config, and outbound
/// announce queue.
pub struct InterfaceHandle {
    pub id: InterfaceId,
    pub name: String,
    pub mode: InterfaceMode,
    pub driver: Arc<dyn InterfaceDriver>,
    pub ifac: Option<crate::crypt::ifac::IfacKey>,
    pub announce_queue: AnnounceQueue,
}

impl InterfaceHandle {
    pub fn announce_cap_bytes_per_sec(&self, fraction: f64) -> f64 {
        (self.driver.bitrate() as f64 / 8.0) * fraction
    }
}

/// An in-process interface test double: packets written to it are captured
/// in a buffer instead of going over any real medium, for use by the
/// engine's own tests and integration tests wiring multiple simulated nodes
/// together.
pub struct InMemoryInterface {
    pub mtu: usize,
    pub bitrate: u64,
    pub mode: InterfaceMode,
    pub sent: core::cell::RefCell<Vec<Vec<u8>>>,
}

impl InMemoryInterface {
    pub fn new(mode: InterfaceMode) -> Self {
        Self { mtu: 500, bitrate: 10_000, mode, sent: core::cell::RefCell::new(Vec::new()) }
    }

    pub fn drain_sent(&self) -> Vec<Vec<u8>> {
        self.sent.borrow_mut().drain(..).collect()
    }
}

impl InterfaceDriver for InMemoryInterface {
    fn driver_id(&self) -> &'static str {
        "in-memory"
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn bitrate(&self) -> u64 {
        self.bitrate
    }

    fn mode(&self) -> InterfaceMode {
        self.mode
    }

    fn send(&self, frame: &[u8]) {
        self.sent.borrow_mut().push(frame.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagation_matrix_matches_mode_table() {
        use InterfaceMode::*;
        assert!(Full.propagates_from(Full));
        assert!(!AccessPoint.propagates_from(Full));
        assert!(Boundary.propagates_from(Full));
        assert!(Roaming.propagates_from(Full));

        assert!(!Full.propagates_from(AccessPoint));
        assert!(!AccessPoint.propagates_from(AccessPoint));
        assert!(!Boundary.propagates_from(AccessPoint));
        assert!(Roaming.propagates_from(AccessPoint));

        assert!(Full.propagates_from(Roaming));
        assert!(!AccessPoint.propagates_from(Roaming));
        assert!(!Boundary.propagates_from(Roaming));
        assert!(!Roaming.propagates_from(Roaming));

        assert!(Full.propagates_from(Boundary));
        assert!(!AccessPoint.propagates_from(Boundary));
        assert!(Boundary.propagates_from(Boundary));
        assert!(!Roaming.propagates_from(Boundary));
    }

    #[test]
    fn announce_queue_orders_by_priority() {
        use crate::hash::AddressHash;
        let mut queue = AnnounceQueue::new();
        let low = AnnounceQueueEntry {
            packet: sample_packet(),
            destination_hash: AddressHash::new([1u8; 16]),
            hops: 4,
            enqueued_at: 0.0,
            retry_count: 0,
            priority: 0.1,
            ready_at: 0.0,
        };
        let high = AnnounceQueueEntry {
            packet: sample_packet(),
            destination_hash: AddressHash::new([2u8; 16]),
            hops: 1,
            enqueued_at: 0.0,
            retry_count: 0,
            priority: 0.9,
            ready_at: 0.0,
        };
        queue.push(low);
        queue.push(high);
        assert_eq!(queue.pop().unwrap().priority, 0.9);
        assert_eq!(queue.pop().unwrap().priority, 0.1);
    }

    fn sample_packet() -> Packet {
        use crate::packet::{DestinationType, Header, HeaderType, IfacFlag, PacketContext, PacketType, PropagationType};
        Packet {
            header: Header {
                ifac_flag: IfacFlag::Open,
                header_type: HeaderType::Type1,
                context_flag: false,
                propagation_type: PropagationType::Broadcast,
                destination_type: DestinationType::Single,
                packet_type: PacketType::Announce,
                hops: 0,
            },
            ifac: None,
            destination: AddressHash::new([0u8; 16]),
            transport: None,
            context: PacketContext::None,
            data: crate::buffer::PacketDataBuffer::new(),
        }
    }
}
