//! Scalar progress snapshots.
//!
//! These are the only session data that ever leaves the engine loop:
//! result payloads copy them by value, never the session itself.

use std::fmt;

use crate::counter::ChannelCounters;

/// The `written/total` pair a streaming gateway client polls.
///
/// For live swarms both fields are zero, the "unbounded" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Bytes verified in sequence from the start of the content.
    pub written: u64,
    /// Total content size; zero when unknown or unbounded.
    pub total: u64,
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.written, self.total)
    }
}

/// The six figures of the stats query, all derived from counters the
/// engine maintains each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Raw datagram traffic, KiB per second.
    pub down_kbps: u64,
    pub up_kbps: u64,
    /// Verified content throughput, KiB per second.
    pub content_down_kbps: u64,
    pub content_up_kbps: u64,
    /// Peer counts from the last tracker announce.
    pub leechers: u32,
    pub seeders: u32,
}

impl StatsSnapshot {
    pub fn from_counters(counters: &ChannelCounters, leechers: u32, seeders: u32) -> Self {
        StatsSnapshot {
            down_kbps: counters.raw_down.rate_kbps(),
            up_kbps: counters.raw_up.rate_kbps(),
            content_down_kbps: counters.content_down.rate_kbps(),
            content_up_kbps: counters.content_up.rate_kbps(),
            leechers,
            seeders,
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.down_kbps,
            self.up_kbps,
            self.content_down_kbps,
            self.content_up_kbps,
            self.leechers,
            self.seeders
        )
    }
}
