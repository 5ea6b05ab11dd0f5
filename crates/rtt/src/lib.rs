//! Rolling round-trip-time window feeding an adaptive look-ahead budget:
//! how long the controller should wait for extending partials before
//! committing a final.

use std::collections::VecDeque;

/// Tunables mirrored from the `rtt` section of the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RttConfig {
    /// Number of samples kept in the rolling window.
    pub samples: u8,
    pub lookahead_min_ms: u32,
    pub lookahead_max_ms: u32,
    pub lookahead_default_ms: u32,
}

impl Default for RttConfig {
    fn default() -> Self {
        Self {
            samples: 20,
            lookahead_min_ms: 200,
            lookahead_max_ms: 700,
            lookahead_default_ms: 500,
        }
    }
}

/// Rolling window over the last `K` accepted RTT samples.
#[derive(Debug)]
pub struct RttTracker {
    cfg: RttConfig,
    window: VecDeque<u32>,
}

impl RttTracker {
    pub fn new(cfg: RttConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(cfg.samples as usize),
            cfg,
        }
    }

    /// Record one round-trip sample, in milliseconds. Samples outside
    /// `0..=30_000` are rejected outright (clock skew, stalled request).
    pub fn record(&mut self, rtt_ms: i64) -> bool {
        if !(0..=30_000).contains(&rtt_ms) {
            return false;
        }
        if self.window.len() == self.cfg.samples as usize {
            self.window.pop_front();
        }
        self.window.push_back(rtt_ms as u32);
        true
    }

    /// Average of the current window, or `None` if no samples have landed.
    pub fn average_ms(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        let sum: u64 = self.window.iter().map(|&v| v as u64).sum();
        Some(sum as f64 / self.window.len() as f64)
    }

    /// `clamp(avg_rtt / 2, lookahead_min_ms, lookahead_max_ms)`, or the
    /// configured default while the window is empty.
    pub fn adaptive_lookahead_ms(&self) -> u32 {
        match self.average_ms() {
            None => self.cfg.lookahead_default_ms,
            Some(avg) => {
                let half = (avg / 2.0).round() as i64;
                half.clamp(self.cfg.lookahead_min_ms as i64, self.cfg.lookahead_max_ms as i64) as u32
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lookahead_while_empty() {
        let tracker = RttTracker::new(RttConfig::default());
        assert_eq!(tracker.adaptive_lookahead_ms(), 500);
    }

    #[test]
    fn rejects_out_of_range_samples() {
        let mut tracker = RttTracker::new(RttConfig::default());
        assert!(!tracker.record(-1));
        assert!(!tracker.record(30_001));
        assert!(tracker.record(0));
        assert!(tracker.record(30_000));
    }

    #[test]
    fn window_evicts_oldest_sample_past_capacity() {
        let cfg = RttConfig { samples: 2, ..RttConfig::default() };
        let mut tracker = RttTracker::new(cfg);
        tracker.record(100);
        tracker.record(200);
        tracker.record(300);
        // window now holds [200, 300]
        assert_eq!(tracker.average_ms(), Some(250.0));
    }

    #[test]
    fn lookahead_clamps_to_configured_bounds() {
        let mut tracker = RttTracker::new(RttConfig::default());
        tracker.record(20); // avg/2 = 10, clamped up to min 200
        assert_eq!(tracker.adaptive_lookahead_ms(), 200);

        let mut tracker = RttTracker::new(RttConfig::default());
        tracker.record(2000); // avg/2 = 1000, clamped down to max 700
        assert_eq!(tracker.adaptive_lookahead_ms(), 700);

        let mut tracker = RttTracker::new(RttConfig::default());
        tracker.record(800); // avg/2 = 400, within bounds
        assert_eq!(tracker.adaptive_lookahead_ms(), 400);
    }
}
