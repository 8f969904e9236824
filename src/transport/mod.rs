//! The `std`-only engine layer: interfaces, path/link/announce tables, link
//! establishment, resource transfer, and the `tokio`-driven dispatch loop.
//! Everything here is additive on top of the `no_std` codec/crypto core in
//! the crate root.

pub mod announce_cache;
pub mod config;
pub mod core_transport;
pub mod destination_ext;
pub mod error;
pub mod iface;
pub mod link_table;
pub mod path_table;
pub mod ratchet_store;
pub mod resource;
pub mod storage;
pub mod time;

pub use config::{AnnounceConfig, LinkConfig, TransportConfig};
pub use core_transport::{EngineCommand, InboundFrame, TransportEngine};
pub use error::TransportError;
