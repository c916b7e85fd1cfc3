use std::net::{Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::time::Duration;

use crate::PeerId;

/// The global engine configuration, with defaults for swarms whose config
/// is not overridden.
#[derive(Debug, Clone)]
pub struct Conf {
    pub engine: EngineConf,
    pub swarm: SwarmConf,
}

impl Conf {
    pub fn new(listen_addr: SocketAddr, gateway_addr: SocketAddr) -> Self {
        Conf {
            engine: EngineConf {
                listen_addr,
                gateway_addr,
                client_id: gen_client_id(),
                tick_interval: Duration::from_millis(25),
                result_retention: Retention::default(),
            },
            swarm: SwarmConf::default(),
        }
    }
}

impl Default for Conf {
    fn default() -> Self {
        let any = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0);
        Conf::new(any, any)
    }
}

/// Engine level configuration.
#[derive(Debug, Clone)]
pub struct EngineConf {
    /// The UDP address the engine listens on for peer traffic.
    pub listen_addr: SocketAddr,
    /// Where the HTTP gateway collaborator binds. The engine only records
    /// it; serving requests is the gateway's business.
    pub gateway_addr: SocketAddr,
    /// The arbitrary client id advertised to trackers.
    pub client_id: PeerId,
    /// How often the loop wakes up to drain commands and advance swarms.
    pub tick_interval: Duration,
    /// What happens to results after their first successful fetch.
    pub result_retention: Retention,
}

/// Per swarm configuration. May be overridden per open in the future,
/// for now every swarm shares the engine defaults.
#[derive(Debug, Clone)]
pub struct SwarmConf {
    /// Content chunk size in bytes. Both hashing and live appends work at
    /// this granularity.
    pub chunk_len: u32,
    /// How many chunks a verifying swarm hashes per tick. Bounds the time
    /// one swarm can hold the loop while others wait for service.
    pub hash_slice: u32,
    /// How long to wait between tracker announces when the tracker does
    /// not dictate an interval.
    pub announce_interval: Duration,
}

impl Default for SwarmConf {
    fn default() -> Self {
        SwarmConf {
            chunk_len: crate::CHUNK_LEN,
            hash_slice: 1024,
            announce_interval: Duration::from_secs(30),
        }
    }
}

/// Retention policy for fetched results.
///
/// A result is only ever reclaimed after at least one fetch has observed
/// its value; this policy decides how long it stays around afterwards.
#[derive(Debug, Clone)]
pub enum Retention {
    /// Fetched results are never reclaimed.
    KeepAll,
    /// Keep the given number of most recently fetched results, evicting
    /// the oldest beyond that.
    Recent(NonZeroUsize),
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Recent(NonZeroUsize::new(64).unwrap())
    }
}

/// Generates a random client id in the style of azureus-style peer ids:
/// a readable prefix followed by random bytes.
fn gen_client_id() -> PeerId {
    use rand::Rng;

    let mut id = [0u8; 20];
    id[..8].copy_from_slice(b"-SR0100-");
    rand::thread_rng().fill(&mut id[8..]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_prefix() {
        let id = gen_client_id();
        assert_eq!(&id[..8], b"-SR0100-");
    }
}
