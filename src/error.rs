//! Error types for the composition engine

use crate::channel::ChannelError;
use crate::overlay::StepId;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// Malformed or length-mismatched delta
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    #[error("compose length mismatch: left output {left_output}, right input {right_input}")]
    ComposeLengthMismatch {
        left_output: usize,
        right_input: usize,
    },

    #[error("transform length mismatch: left input {left_input}, right input {right_input}")]
    TransformLengthMismatch {
        left_input: usize,
        right_input: usize,
    },

    #[error("base length mismatch: expected {expected}, got {actual}")]
    BaseLengthMismatch { expected: usize, actual: usize },

    #[error("expected a document (insert-only delta)")]
    NotADocument,

    #[error("delta lengths changed from {before:?} to {after:?}")]
    LengthsChanged {
        before: (usize, usize),
        after: (usize, usize),
    },
}

/// Engine error taxonomy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// Fatal to the current flush; queues are kept for inspection
    #[error("invalid operation: {0}")]
    InvalidOperation(#[from] DeltaError),

    /// Removal of an overlay step that no longer exists
    #[error("unknown overlay step: {0}")]
    UnknownOverlayStep(StepId),

    /// Submission or acknowledgement failure reported by the channel
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The remote document was deleted
    #[error("session terminated")]
    SessionTerminated,

    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether editing can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::UnknownOverlayStep(_) | SyncError::Channel(_))
    }
}
