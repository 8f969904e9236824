//! De-duplication of in-flight announces by packet hash, so a rebroadcast
//! storm across multiple interfaces doesn't cause the same announce to be
//! re-propagated more than once.

use std::collections::HashMap;

use crate::hash::Hash;

pub struct AnnounceCacheEntry {
    pub first_seen: f64,
    pub rebroadcasts: u8,
}

#[derive(Default)]
pub struct AnnounceCache {
    seen: HashMap<[u8; 32], AnnounceCacheEntry>,
}

impl AnnounceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this is the first time `hash` has been seen, and
    /// records it. A caller should only re-propagate on a `true` result.
    pub fn record(&mut self, hash: &Hash, now: f64) -> bool {
        let key = hash.to_bytes();
        if self.seen.contains_key(&key) {
            false
        } else {
            self.seen.insert(key, AnnounceCacheEntry { first_seen: now, rebroadcasts: 0 });
            true
        }
    }

    pub fn note_rebroadcast(&mut self, hash: &Hash) {
        if let Some(entry) = self.seen.get_mut(&hash.to_bytes()) {
            entry.rebroadcasts = entry.rebroadcasts.saturating_add(1);
        }
    }

    /// Whether a rebroadcast of `hash` has been heard since it was first
    /// seen, used to decide whether a scheduled retry is still needed.
    pub fn was_rebroadcast(&self, hash: &Hash) -> bool {
        self.seen.get(&hash.to_bytes()).map(|entry| entry.rebroadcasts > 0).unwrap_or(false)
    }

    pub fn expire(&mut self, now: f64, max_age: f64) {
        self.seen.retain(|_, entry| now - entry.first_seen < max_age);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
