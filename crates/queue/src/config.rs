/// Tunables mirrored from the `queue` section of the engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    /// Bounded parallelism: at most this many jobs run at once.
    pub max_concurrent: u8,
    /// Minimum spacing enforced between two job starts, to smooth bursts.
    pub min_interval_ms: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            min_interval_ms: 50,
        }
    }
}
