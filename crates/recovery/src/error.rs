use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecoveryError>;

#[derive(Debug, Error)]
pub enum RecoveryError {
    /// `open_buffer` called while the state machine was not IDLE.
    #[error("cannot open a forced-final buffer: state machine is not idle")]
    NotIdle,

    /// `begin_recovery` called while the state machine was not BUFFERED.
    #[error("cannot begin recovery: no buffered forced-final is pending")]
    NotBuffered,

    /// The transient recognizer factory failed to produce a recognizer.
    #[error("failed to acquire a transient recognizer: {0}")]
    RecognizerUnavailable(String),

    /// The recognizer stream never reported ready within the configured cap.
    #[error("recovery stream never became ready")]
    StreamNotReady,
}
