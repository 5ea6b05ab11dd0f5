use serde::{Deserialize, Serialize};

use verbatim_dedup::DedupConfig;
use verbatim_overlap::OverlapConfig;
use verbatim_queue::QueueConfig;
use verbatim_ratelimit::RateLimitConfig;
use verbatim_recovery::RecoveryConfig;
use verbatim_rtt::RttConfig;

/// Tunables for throttling how often a growing partial is forwarded to
/// grammar correction/translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum time between two downstream dispatches for the same segment.
    pub partial_ms: u32,
    /// Dispatch early if the forwarded text grew by at least this many
    /// characters since the last dispatch.
    pub growth_chars: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            partial_ms: 2000,
            growth_chars: 20,
        }
    }
}

/// Root configuration, one sub-struct per component, each independently
/// overridable and `Default`. Deserializable from any `serde`-compatible
/// source; this crate does not mandate a file format or environment layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Configuration {
    pub rate_limit: RateLimitConfig,
    pub queue: QueueConfig,
    pub throttle: ThrottleConfig,
    pub dedup: DedupConfig,
    pub forced_commit: RecoveryConfig,
    pub rtt: RttConfig,
    pub overlap: OverlapConfig,
}
