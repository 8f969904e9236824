//! Map from destination hash to the locally-known best next hop.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::hash::AddressHash;

use super::iface::InterfaceId;

#[derive(Debug, Clone, Copy)]
pub struct PathEntry {
    pub next_hop_identity_hash: AddressHash,
    pub via_interface: InterfaceId,
    pub hops: u8,
    pub last_updated: f64,
    pub expires_at: f64,
}

#[derive(Default)]
pub struct PathTable {
    entries: HashMap<AddressHash, PathEntry>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the best known next hop for `destination_hash`.
    pub fn resolve(&self, destination_hash: &AddressHash) -> Option<(AddressHash, InterfaceId, u8)> {
        self.entries
            .get(destination_hash)
            .map(|entry| (entry.next_hop_identity_hash, entry.via_interface, entry.hops))
    }

    /// Records or updates a path entry. Only overwrites an existing entry
    /// if the new one has fewer or equal hops, preferring the most recently
    /// refreshed entry on ties (the tie-break rule from path discovery).
    pub fn update(&mut self, destination_hash: AddressHash, candidate: PathEntry) {
        match self.entries.get(&destination_hash) {
            Some(existing) if !Self::candidate_wins(existing, &candidate) => {}
            _ => {
                self.entries.insert(destination_hash, candidate);
            }
        }
    }

    fn candidate_wins(existing: &PathEntry, candidate: &PathEntry) -> bool {
        (candidate.hops, Reverse(candidate.last_updated.to_bits()))
            < (existing.hops, Reverse(existing.last_updated.to_bits()))
    }

    pub fn remove(&mut self, destination_hash: &AddressHash) {
        self.entries.remove(destination_hash);
    }

    pub fn expire(&mut self, now: f64) {
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn contains(&self, destination_hash: &AddressHash) -> bool {
        self.entries.contains_key(destination_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
