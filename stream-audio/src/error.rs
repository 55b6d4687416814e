//! # Stream Audio Error Types
//!
//! Error types for the streaming playback pipeline.

use crate::lifecycle::PlaybackState;
use thiserror::Error;

/// Errors that can occur while streaming, parsing, or playing audio.
///
/// All variants are cheap to clone so that a terminal pipeline result can be
/// fanned out to every waiter over a watch channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamAudioError {
    // ========================================================================
    // Write-Path Errors
    // ========================================================================
    /// Data was appended to a stream buffer that has already been finished.
    #[error("stream buffer is closed for writing")]
    StreamClosed,

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// A playback control call was made from a state that does not permit it.
    #[error("invalid state transition: {operation} while {from}")]
    InvalidStateTransition {
        /// State the lifecycle was in when the call arrived.
        from: PlaybackState,
        /// The operation that was attempted.
        operation: &'static str,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// The format parser rejected the input bytes.
    #[error("parser error: {0}")]
    Parser(String),

    /// The output device failed to open, start, pause, or stop.
    #[error("output device error: {0}")]
    Device(String),

    /// The byte source failed before delivering the complete stream.
    #[error("byte source error: {0}")]
    Source(String),

    // ========================================================================
    // Control-Flow Errors
    // ========================================================================
    /// The background task was cancelled cooperatively. Not a user-facing
    /// failure; `wait_for_stop` maps it to success.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StreamAudioError {
    /// Returns `true` if this error is cooperative cancellation rather than a
    /// genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamAudioError::Cancelled)
    }

    /// Returns `true` if this error terminates the write path. Everything else
    /// is local to the background loop and surfaced asynchronously.
    pub fn is_fatal_to_write_path(&self) -> bool {
        matches!(self, StreamAudioError::StreamClosed)
    }

    /// Returns `true` if the error originated in an external collaborator
    /// (parser, device, or byte source) rather than in the core itself.
    pub fn is_collaborator_error(&self) -> bool {
        matches!(
            self,
            StreamAudioError::Parser(_)
                | StreamAudioError::Device(_)
                | StreamAudioError::Source(_)
        )
    }
}

/// Result type for streaming playback operations.
pub type Result<T> = std::result::Result<T, StreamAudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(StreamAudioError::Cancelled.is_cancelled());
        assert!(!StreamAudioError::StreamClosed.is_cancelled());

        assert!(StreamAudioError::StreamClosed.is_fatal_to_write_path());
        assert!(!StreamAudioError::Parser("bad header".into()).is_fatal_to_write_path());

        assert!(StreamAudioError::Parser("bad header".into()).is_collaborator_error());
        assert!(StreamAudioError::Device("no output".into()).is_collaborator_error());
        assert!(!StreamAudioError::Cancelled.is_collaborator_error());
    }

    #[test]
    fn error_display() {
        let err = StreamAudioError::InvalidStateTransition {
            from: PlaybackState::Playing,
            operation: "play",
        };
        assert_eq!(err.to_string(), "invalid state transition: play while playing");
    }
}
