//! Synchronization channel seam
//!
//! The transport and remote document store are external. The engine only
//! submits deltas through [`Channel`]; inbound remote operations and
//! lifecycle events are delivered by the host calling the engine's
//! `handle_*` methods.

use crate::delta::Delta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the synchronization collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct ChannelError {
    pub message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outbound half of the synchronization channel
///
/// Submission is fire-and-forget: acknowledgement and retry policy belong to
/// the implementation.
pub trait Channel {
    fn submit(&mut self, delta: &Delta) -> Result<(), ChannelError>;
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn submit(&mut self, delta: &Delta) -> Result<(), ChannelError> {
        (**self).submit(delta)
    }
}

/// Channel that records every submitted delta in order
#[derive(Debug, Default)]
pub struct MemoryChannel {
    submitted: Vec<Delta>,
    fail_next: Option<ChannelError>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> &[Delta] {
        &self.submitted
    }

    /// Drain everything submitted so far
    pub fn take_submitted(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.submitted)
    }

    /// Make the next submission fail with `err`
    pub fn fail_next(&mut self, err: ChannelError) {
        self.fail_next = Some(err);
    }
}

impl Channel for MemoryChannel {
    fn submit(&mut self, delta: &Delta) -> Result<(), ChannelError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        self.submitted.push(delta.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_channel_records() {
        let mut channel = MemoryChannel::new();
        channel.submit(&Delta::new().insert("a")).unwrap();
        channel.fail_next(ChannelError::new("offline"));
        assert_eq!(
            channel.submit(&Delta::new().insert("b")),
            Err(ChannelError::new("offline"))
        );
        channel.submit(&Delta::new().insert("c")).unwrap();

        let submitted = channel.take_submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[1].to_text(), "c");
        assert!(channel.submitted().is_empty());
    }
}
