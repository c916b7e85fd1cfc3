use std::net::IpAddr;

use crate::{PeerId, Sha1Hash};

/// Parameters for announcing to a tracker.
pub struct Announce {
    /// The swarm's root hash, the key the tracker groups peers under.
    pub swarm_id: Sha1Hash,
    /// Self identifier.
    pub peer_id: PeerId,

    /// The port the engine is listening on.
    pub port: u16,
    /// The true ip address in dotted quad format. Only necessary when the
    /// HTTP request does not originate from the client's host address
    /// (a proxy, or a tracker on the same NAT'd subnet as the peer).
    pub ip: Option<IpAddr>,

    /// Number of bytes downloaded so far.
    pub downloaded: u64,
    /// Number of bytes uploaded so far.
    pub uploaded: u64,
    /// Number of bytes left to download.
    pub left: u64,

    /// The number of peers the client wishes to receive from the tracker.
    /// If omitted the tracker picks its default.
    pub peer_count: Option<usize>,

    /// Only set during the special events defined in [`Event`]. Otherwise,
    /// when just refreshing peers, no event needs to be set.
    pub event: Option<Event>,
}

/// The optional announce event.
///
/// If not present, this is one of the announcements done at regular
/// intervals.
pub enum Event {
    /// The first request to the tracker must include this value.
    Started,
    /// Must be sent when the client becomes a seeder. Must not be present
    /// if the client started as a seeder.
    Completed,
    /// Must be sent if the client is shutting the swarm down gracefully.
    Stopped,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Started => "started",
            Event::Completed => "completed",
            Event::Stopped => "stopped",
        }
    }
}
