//! On-disk cache of peers' most recently announced ratchet public keys, so a
//! node can keep decrypting packets encrypted against an old ratchet for a
//! grace period after a newer one is announced.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::RnsError;
use crate::hash::AddressHash;

/// Ratchet records older than this are dropped on the next `clean_expired`
/// sweep, regardless of whether a newer announce has been seen.
pub const RATCHET_EXPIRY_SECS: f64 = 30.0 * 24.0 * 60.0 * 60.0;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RatchetRecord {
    pub ratchet: ByteBuf,
    pub received: f64,
}

/// In-memory ratchet cache backed by an optional on-disk directory: entries
/// are written through to disk as they're learned, and can be reloaded (or
/// removed) individually without touching the whole cache.
pub struct RatchetStore {
    ratchet_dir: Option<PathBuf>,
    cache: HashMap<AddressHash, RatchetRecord>,
}

impl RatchetStore {
    pub fn new(ratchet_dir: Option<PathBuf>) -> Result<Self, RnsError> {
        if let Some(dir) = &ratchet_dir {
            std::fs::create_dir_all(dir).map_err(|_| RnsError::ConnectionError)?;
        }
        Ok(Self { ratchet_dir, cache: HashMap::new() })
    }

    /// Records a newly-seen ratchet for `destination_hash`, persisting it to
    /// disk if a ratchet directory is configured.
    pub fn remember(&mut self, destination_hash: AddressHash, ratchet: Vec<u8>, received: f64) -> Result<(), RnsError> {
        let record = RatchetRecord { ratchet: ByteBuf::from(ratchet), received };
        if self.ratchet_dir.is_some() {
            self.persist_record(&destination_hash, &record)?;
        }
        self.cache.insert(destination_hash, record);
        Ok(())
    }

    pub fn get(&self, destination_hash: &AddressHash) -> Option<&RatchetRecord> {
        self.cache.get(destination_hash)
    }

    pub fn clean_expired(&mut self, now: f64) {
        let dir = self.ratchet_dir.clone();
        let expired: Vec<AddressHash> = self
            .cache
            .iter()
            .filter(|(_, record)| now - record.received > RATCHET_EXPIRY_SECS)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in expired {
            self.cache.remove(&hash);
            if dir.is_some() {
                let _ = self.remove_record(&hash);
            }
        }
    }

    fn path_for(&self, destination_hash: &AddressHash) -> Option<PathBuf> {
        self.ratchet_dir.as_ref().map(|dir| dir.join(format!("{}.ratchet", destination_hash.to_hex_string())))
    }

    fn persist_record(&self, destination_hash: &AddressHash, record: &RatchetRecord) -> Result<(), RnsError> {
        let Some(path) = self.path_for(destination_hash) else { return Ok(()) };
        let tmp_path = path.with_extension("tmp");
        let bytes = rmp_serde::to_vec_named(record).map_err(|_| RnsError::PacketError)?;
        std::fs::write(&tmp_path, bytes).map_err(|_| RnsError::ConnectionError)?;
        std::fs::rename(&tmp_path, &path).map_err(|_| RnsError::ConnectionError)?;
        Ok(())
    }

    pub fn load_record(&mut self, destination_hash: AddressHash) -> Result<Option<&RatchetRecord>, RnsError> {
        if let Some(path) = self.path_for(&destination_hash) {
            if !self.cache.contains_key(&destination_hash) && Path::new(&path).exists() {
                let bytes = std::fs::read(&path).map_err(|_| RnsError::ConnectionError)?;
                let record = rmp_serde::from_slice::<RatchetRecord>(&bytes).map_err(|_| RnsError::PacketError)?;
                self.cache.insert(destination_hash, record);
            }
        }
        Ok(self.cache.get(&destination_hash))
    }

    pub fn remove_record(&mut self, destination_hash: &AddressHash) -> Result<(), RnsError> {
        self.cache.remove(destination_hash);
        if let Some(path) = self.path_for(destination_hash) {
            match std::fs::remove_file(path) {
                Ok(_) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(_) => Err(RnsError::ConnectionError),
            }
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
