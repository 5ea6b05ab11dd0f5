/// Tunables mirrored from the `forced_commit` section of the engine
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RecoveryConfig {
    /// How much trailing PCM (by wall-clock duration) is fed to the
    /// transient recognizer to cover the decoder gap.
    pub capture_window_ms: u32,
    /// Hard ceiling on the whole recovery attempt; past this the buffered
    /// text is committed as-is and the recovery recognizer is abandoned.
    pub recovery_timeout_ms: u32,
    /// Poll interval while waiting for the transient stream to report ready.
    pub stream_ready_poll_ms: u32,
    /// Ceiling on stream-readiness polling before giving up on the stream.
    pub stream_ready_max_ms: u32,
    /// Extra settle time once the stream reports ready, before reading.
    pub stream_ready_settle_ms: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            capture_window_ms: 2200,
            recovery_timeout_ms: 5000,
            stream_ready_poll_ms: 25,
            stream_ready_max_ms: 2000,
            stream_ready_settle_ms: 50,
        }
    }
}
