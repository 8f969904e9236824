//! Persistent snapshot storage for the path table, announce cache, and
//! link table, so a node doesn't have to rediscover its neighborhood after
//! a restart. Pluggable behind `PersistenceBackend` so the on-disk format
//! isn't load-bearing for the rest of the engine.

use rusqlite::{params, Connection};

use crate::error::RnsError;
use crate::hash::AddressHash;

use super::path_table::PathEntry;

pub trait PersistenceBackend {
    fn save_path_entry(&self, destination_hash: &AddressHash, entry: &PathEntry) -> Result<(), RnsError>;
    fn load_path_entries(&self) -> Result<Vec<(AddressHash, PathEntry)>, RnsError>;
    fn delete_path_entry(&self, destination_hash: &AddressHash) -> Result<(), RnsError>;
}

/// `rusqlite`-backed persistence, one row per destination in a single
/// `path_table` table.
pub struct SqlitePersistence {
    conn: Connection,
}

impl SqlitePersistence {
    pub fn open(path: &std::path::Path) -> Result<Self, RnsError> {
        let conn = Connection::open(path).map_err(|_| RnsError::ConnectionError)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS path_table (
                destination_hash BLOB PRIMARY KEY,
                next_hop_identity_hash BLOB NOT NULL,
                via_interface INTEGER NOT NULL,
                hops INTEGER NOT NULL,
                last_updated REAL NOT NULL,
                expires_at REAL NOT NULL
            )",
            [],
        )
        .map_err(|_| RnsError::ConnectionError)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, RnsError> {
        let conn = Connection::open_in_memory().map_err(|_| RnsError::ConnectionError)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS path_table (
                destination_hash BLOB PRIMARY KEY,
                next_hop_identity_hash BLOB NOT NULL,
                via_interface INTEGER NOT NULL,
                hops INTEGER NOT NULL,
                last_updated REAL NOT NULL,
                expires_at REAL NOT NULL
            )",
            [],
        )
        .map_err(|_| RnsError::ConnectionError)?;
        Ok(Self { conn })
    }
}

impl PersistenceBackend for SqlitePersistence {
    fn save_path_entry(&self, destination_hash: &AddressHash, entry: &PathEntry) -> Result<(), RnsError> {
        self.conn
            .execute(
                "INSERT INTO path_table
                    (destination_hash, next_hop_identity_hash, via_interface, hops, last_updated, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(destination_hash) DO UPDATE SET
                    next_hop_identity_hash = excluded.next_hop_identity_hash,
                    via_interface = excluded.via_interface,
                    hops = excluded.hops,
                    last_updated = excluded.last_updated,
                    expires_at = excluded.expires_at",
                params![
                    destination_hash.as_slice(),
                    entry.next_hop_identity_hash.as_slice(),
                    entry.via_interface.0,
                    entry.hops,
                    entry.last_updated,
                    entry.expires_at,
                ],
            )
            .map_err(|_| RnsError::ConnectionError)?;
        Ok(())
    }

    fn load_path_entries(&self) -> Result<Vec<(AddressHash, PathEntry)>, RnsError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT destination_hash, next_hop_identity_hash, via_interface, hops, last_updated, expires_at
                 FROM path_table",
            )
            .map_err(|_| RnsError::ConnectionError)?;

        let rows = stmt
            .query_map([], |row| {
                let destination_hash: Vec<u8> = row.get(0)?;
                let next_hop: Vec<u8> = row.get(1)?;
                let via_interface: u32 = row.get(2)?;
                let hops: u8 = row.get(3)?;
                let last_updated: f64 = row.get(4)?;
                let expires_at: f64 = row.get(5)?;
                Ok((destination_hash, next_hop, via_interface, hops, last_updated, expires_at))
            })
            .map_err(|_| RnsError::ConnectionError)?;

        let mut out = Vec::new();
        for row in rows {
            let (destination_hash, next_hop, via_interface, hops, last_updated, expires_at) =
                row.map_err(|_| RnsError::ConnectionError)?;
            let destination_hash = to_address_hash(&destination_hash)?;
            let next_hop_identity_hash = to_address_hash(&next_hop)?;
            out.push((
                destination_hash,
                PathEntry {
                    next_hop_identity_hash,
                    via_interface: super::iface::InterfaceId(via_interface),
                    hops,
                    last_updated,
                    expires_at,
                },
            ));
        }
        Ok(out)
    }

    fn delete_path_entry(&self, destination_hash: &AddressHash) -> Result<(), RnsError> {
        self.conn
            .execute("DELETE FROM path_table WHERE destination_hash = ?1", params![destination_hash.as_slice()])
            .map_err(|_| RnsError::ConnectionError)?;
        Ok(())
    }
}

fn to_address_hash(bytes: &[u8]) -> Result<AddressHash, RnsError> {
    let array: [u8; 16] = bytes.try_into().map_err(|_| RnsError::PacketError)?;
    Ok(AddressHash::new(array))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let storage = SqlitePersistence::open_in_memory().expect("open");
        let destination_hash = AddressHash::new([4u8; 16]);
        let entry = PathEntry {
            next_hop_identity_hash: AddressHash::new([5u8; 16]),
            via_interface: super::super::iface::InterfaceId(2),
            hops: 3,
            last_updated: 10.0,
            expires_at: 20.0,
        };
        storage.save_path_entry(&destination_hash, &entry).expect("save");

        let loaded = storage.load_path_entries().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, destination_hash);
        assert_eq!(loaded[0].1.hops, 3);
    }

    #[test]
    fn delete_removes_row() {
        let storage = SqlitePersistence::open_in_memory().expect("open");
        let destination_hash = AddressHash::new([4u8; 16]);
        let entry = PathEntry {
            next_hop_identity_hash: AddressHash::new([5u8; 16]),
            via_interface: super::super::iface::InterfaceId(2),
            hops: 1,
            last_updated: 0.0,
            expires_at: 0.0,
        };
        storage.save_path_entry(&destination_hash, &entry).expect("save");
        storage.delete_path_entry(&destination_hash).expect("delete");
        assert!(storage.load_path_entries().expect("load").is_empty());
    }
}
