use std::time::Duration;

/// Smoothing factor for the speed average. One quarter new sample, three
/// quarters history, folded in once per tick.
const ALPHA: f64 = 0.25;

/// Counts bytes in one direction and keeps a smoothed transfer rate.
///
/// The engine loop calls [`record`](Self::record) as bytes move and
/// [`tick`](Self::tick) once per iteration to fold the round into the
/// rate, so the stats query can read speeds without touching the network.
#[derive(Debug, Default, Clone)]
pub struct ThruputCounter {
    /// All bytes ever recorded.
    total: u64,
    /// Bytes recorded since the last tick.
    round: u64,
    /// Smoothed rate in bytes per second.
    rate: f64,
}

impl ThruputCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the transfer of `bytes`.
    pub fn record(&mut self, bytes: u64) {
        self.total += bytes;
        self.round += bytes;
    }

    /// Folds the bytes recorded since the last tick into the rate.
    pub fn tick(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let sample = self.round as f64 / secs;
        self.rate = ALPHA * sample + (1.0 - ALPHA) * self.rate;
        self.round = 0;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// The smoothed rate in whole KiB per second, the unit the stats
    /// string reports.
    pub fn rate_kbps(&self) -> u64 {
        (self.rate / 1024.0) as u64
    }
}

/// The four counters every stats snapshot is computed from: raw datagram
/// traffic and verified content bytes, each in both directions.
#[derive(Debug, Default, Clone)]
pub struct ChannelCounters {
    pub raw_down: ThruputCounter,
    pub raw_up: ThruputCounter,
    pub content_down: ThruputCounter,
    pub content_up: ThruputCounter,
}

impl ChannelCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self, elapsed: Duration) {
        self.raw_down.tick(elapsed);
        self.raw_up.tick(elapsed);
        self.content_down.tick(elapsed);
        self.content_up.tick(elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_accumulate() {
        let mut c = ThruputCounter::new();
        c.record(1000);
        c.record(24);
        assert_eq!(c.total(), 1024);
    }

    #[test]
    fn test_rate_converges_on_steady_traffic() {
        let mut c = ThruputCounter::new();
        // steady 100 KiB/s for enough ticks to wash out the zero start
        for _ in 0..64 {
            c.record(100 * 1024);
            c.tick(Duration::from_secs(1));
        }
        let kbps = c.rate_kbps();
        assert!((99..=100).contains(&kbps), "rate was {kbps} KiB/s");
    }

    #[test]
    fn test_zero_elapsed_is_ignored() {
        let mut c = ThruputCounter::new();
        c.record(4096);
        c.tick(Duration::from_secs(0));
        // round not folded, rate untouched
        assert_eq!(c.rate_kbps(), 0);
        c.tick(Duration::from_secs(1));
        assert!(c.rate_kbps() > 0);
    }
}
