//! Engine-wide and per-link tunables. Defaults are the values frozen for
//! this implementation (a default-bitrate interface); interfaces with
//! slower/faster links are expected to override via `LinkConfig`.

use core::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub keepalive_interval: Duration,
    pub stale_time: Duration,
    pub establishment_timeout: Duration,
    pub part_size: usize,
    pub min_window: usize,
    pub max_window: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(360),
            stale_time: Duration::from_secs(720),
            establishment_timeout: Duration::from_secs(15),
            part_size: 128,
            min_window: 1,
            max_window: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AnnounceConfig {
    /// Base of the exponential retransmit delay, `d = base_delay^hops`.
    pub base_delay: f64,
    /// Grace period added to the re-broadcast deadline, `t` in `c^(h+1)+t`.
    pub rebroadcast_grace: f64,
    pub max_retries: u8,
    /// Fraction of an interface's measured bitrate reserved for announces.
    pub announce_cap_fraction: f64,
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self { base_delay: 2.0, rebroadcast_grace: 10.0, max_retries: 1, announce_cap_fraction: 0.02 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransportConfig {
    pub link: LinkConfig,
    pub announce: AnnounceConfig,
}
