//! Error types for the narration pipeline.

use std::time::Duration;

/// Top-level error type for the narration core.
#[derive(Debug, thiserror::Error)]
pub enum NarrateError {
    /// Configuration error: bad engine choice, missing model, invalid value.
    #[error("config error: {0}")]
    Config(String),

    /// Engine binary missing or the startup self-check failed.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Engine configuration rejected (bad model path, unreadable model).
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// A synthesis subprocess exceeded its deadline.
    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    /// A synthesis subprocess exited non-zero or produced unusable output.
    #[error("synthesis failed: {0}")]
    ProcessFailed(String),

    /// The online engine could not reach its service.
    #[error("network error: {0}")]
    Network(String),

    /// Input rejected before synthesis started (empty or oversize).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Audio device failed to open or hard-faulted. Fatal for the session.
    #[error("audio device error: {0}")]
    Device(String),

    /// Blob not playable: wrong sample rate or odd byte length.
    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    /// Disk-cache I/O failure. The cache degrades to memory-only.
    #[error("cache I/O error: {0}")]
    CacheIo(String),

    /// Command not valid in the current controller or player state.
    /// The state is left untouched.
    #[error("invalid command: {0}")]
    State(String),

    /// Queue refused the item without waiting (byte budget exhausted).
    #[error("queue full")]
    QueueFull,

    /// The named component has been closed; no further operations accepted.
    #[error("{0} closed")]
    Closed(&'static str),

    /// Operation cancelled during shutdown. Normal; not shown to the user.
    #[error("cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

impl NarrateError {
    /// Whether the session can continue after this error.
    ///
    /// Per-sentence synthesis failures and state misuse are recoverable;
    /// configuration, engine-availability, and device errors are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_)
            | Self::EngineUnavailable(_)
            | Self::InvalidConfig(_)
            | Self::Device(_)
            | Self::Closed(_) => false,
            Self::Timeout(_)
            | Self::ProcessFailed(_)
            | Self::Network(_)
            | Self::Rejected(_)
            | Self::InvalidFormat(_)
            | Self::CacheIo(_)
            | Self::State(_)
            | Self::QueueFull
            | Self::Cancelled
            | Self::Io(_)
            | Self::Channel(_) => true,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, NarrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_is_fatal() {
        assert!(!NarrateError::Device("no output device".into()).is_recoverable());
    }

    #[test]
    fn synthesis_errors_are_recoverable() {
        assert!(NarrateError::Timeout(Duration::from_secs(10)).is_recoverable());
        assert!(NarrateError::ProcessFailed("exit 1".into()).is_recoverable());
        assert!(NarrateError::Rejected("empty text".into()).is_recoverable());
    }

    #[test]
    fn state_misuse_is_recoverable() {
        assert!(NarrateError::State("Play without a document".into()).is_recoverable());
    }
}
