//! Tracks active and pending links, keyed by link ID, for both sides of the
//! transport path (the hop towards the link's initiator and the hop towards
//! its destination).

use std::collections::HashMap;

use crate::hash::AddressHash;

use super::destination_ext::link::{LinkId, LinkState};
use super::iface::InterfaceId;

pub struct LinkTableEntry {
    pub state: LinkState,
    pub next_hop_interface: Option<InterfaceId>,
    pub prev_hop_interface: Option<InterfaceId>,
    pub validated_at: Option<f64>,
    pub expires_at: f64,
    /// Ephemeral public key material exchanged during the handshake, kept
    /// only until the link proof completes or the link is torn down.
    pub proof_material: Option<[u8; 32]>,
    /// The destination this link was requested against, used to look up its
    /// known signing key when a LINK_PROOF arrives.
    pub destination: AddressHash,
}

#[derive(Default)]
pub struct LinkTable {
    links: HashMap<AddressHash, LinkTableEntry>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, link_id: LinkId, entry: LinkTableEntry) {
        self.links.insert(link_id.0, entry);
    }

    pub fn get(&self, link_id: &LinkId) -> Option<&LinkTableEntry> {
        self.links.get(&link_id.0)
    }

    pub fn get_mut(&mut self, link_id: &LinkId) -> Option<&mut LinkTableEntry> {
        self.links.get_mut(&link_id.0)
    }

    pub fn remove(&mut self, link_id: &LinkId) -> Option<LinkTableEntry> {
        self.links.remove(&link_id.0)
    }

    pub fn expire(&mut self, now: f64) {
        self.links.retain(|_, entry| entry.expires_at > now || entry.state == LinkState::Active);
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(state: LinkState, expires_at: f64) -> LinkTableEntry {
        LinkTableEntry {
            state,
            next_hop_interface: Some(InterfaceId(0)),
            prev_hop_interface: None,
            validated_at: None,
            expires_at,
            proof_material: None,
            destination: AddressHash::new([0u8; 16]),
        }
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut table = LinkTable::new();
        let id = LinkId(AddressHash::new([7u8; 16]));
        table.insert(id, entry(LinkState::Pending, 100.0));
        assert_eq!(table.get(&id).unwrap().state, LinkState::Pending);
    }

    #[test]
    fn expired_pending_links_are_swept_but_active_links_survive() {
        let mut table = LinkTable::new();
        let pending = LinkId(AddressHash::new([1u8; 16]));
        let active = LinkId(AddressHash::new([2u8; 16]));
        table.insert(pending, entry(LinkState::Pending, 5.0));
        table.insert(active, entry(LinkState::Active, 5.0));
        table.expire(10.0);
        assert!(table.get(&pending).is_none());
        assert!(table.get(&active).is_some());
    }
}
