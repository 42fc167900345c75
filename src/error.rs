// Error types for direction estimation
//
// Silence and impossible delays are not errors: they come back as a
// degraded `Validity` on the estimate so the pipeline keeps running.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectionError {
    /// Capture ended before the in-progress window was full. The partial
    /// window is discarded.
    #[error("insufficient samples: {buffered} buffered, {required} required to complete the window")]
    InsufficientSamples { buffered: usize, required: usize },

    /// Microphone spacing must be a finite, positive distance in meters.
    #[error("invalid microphone spacing: {0} m")]
    InvalidSpacing(f32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single-channel frame arrived while simulated stereo is disabled.
    #[error("mono input received with simulated stereo disabled")]
    MonoInput,

    #[error("channel length mismatch: left={left}, right={right}")]
    ChannelMismatch { left: usize, right: usize },

    #[error(transparent)]
    Device(#[from] anyhow::Error),
}

impl DirectionError {
    /// Whether the pipeline can skip the current window and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DirectionError::InsufficientSamples { .. }
                | DirectionError::MonoInput
                | DirectionError::ChannelMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DirectionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        let partial = DirectionError::InsufficientSamples { buffered: 10, required: 20 };
        assert!(partial.is_recoverable());
        assert!(!DirectionError::InvalidSpacing(0.0).is_recoverable());
        assert!(!DirectionError::InvalidConfig("overlap".into()).is_recoverable());
    }

    #[test]
    fn test_display_mentions_counts() {
        let err = DirectionError::InsufficientSamples { buffered: 4000, required: 12000 };
        let text = err.to_string();
        assert!(text.contains("4000"));
        assert!(text.contains("12000"));
    }
}
