/// Tunables mirrored from the `rate_limit` section of the engine
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitConfig {
    pub rpm: u32,
    pub tpm: u64,
    pub max_retries: u8,
    pub base_delay_ms: u32,
    pub max_delay_ms: u32,
    pub daily_enabled: bool,
    /// Requests/tokens projected to wait longer than this are `Skip`ped
    /// instead of waited on.
    pub skip_threshold_ms: u32,
    /// Sessions with no activity in this many ms are evicted from the
    /// per-session table.
    pub session_idle_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rpm: 4500,
            tpm: 1_800_000,
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            daily_enabled: false,
            skip_threshold_ms: 2000,
            session_idle_ms: 5 * 60 * 1000,
        }
    }
}

/// Sliding-window width for both the global and per-session buckets.
pub const WINDOW_MS: i64 = 60_000;

/// Window over which a session counts as "active" for fair-share division.
pub const ACTIVE_SESSION_MS: i64 = 300_000;
