//! State Management Traits
//!
//! Snapshot/restore for components whose state is persisted by an external
//! store, and sequence tracking for the append-only trade log.

use thiserror::Error;

/// Error types for state management operations
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateError {
    #[error("Sequence gap detected: expected {expected}, actual {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    #[error("State validation failed: {reason}")]
    ValidationFailed { reason: String },
}

/// Core trait for components that can be snapshotted and restored
pub trait Stateful {
    /// Error type for failed operations
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a snapshot of the current state
    fn snapshot(&self) -> Result<Vec<u8>, Self::Error>;

    /// Replace the current state with a snapshot
    fn restore(&self, snapshot: &[u8]) -> Result<(), Self::Error>;
}

/// Sequence tracking for gap detection
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    next_expected: u64,
    last_processed: u64,
}

impl SequenceTracker {
    /// Create a new sequence tracker starting from sequence 1
    pub fn new() -> Self {
        Self {
            next_expected: 1,
            last_processed: 0,
        }
    }

    /// Get the next expected sequence number
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Get the last successfully processed sequence number
    pub fn last_sequence(&self) -> u64 {
        self.last_processed
    }

    /// Claim the next sequence number
    pub fn advance(&mut self) -> u64 {
        self.last_processed = self.next_expected;
        self.next_expected += 1;
        self.last_processed
    }

    /// Track a sequence number and detect gaps
    pub fn track(&mut self, sequence: u64) -> Result<(), StateError> {
        if sequence == self.next_expected {
            self.advance();
            Ok(())
        } else {
            Err(StateError::SequenceGap {
                expected: self.next_expected,
                actual: sequence,
            })
        }
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_hands_out_consecutive_ids() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.advance(), 1);
        assert_eq!(tracker.advance(), 2);
        assert_eq!(tracker.last_sequence(), 2);
        assert_eq!(tracker.next_expected(), 3);
    }

    #[test]
    fn test_track_detects_gap() {
        let mut tracker = SequenceTracker::new();
        tracker.track(1).unwrap();

        let err = tracker.track(3).unwrap_err();
        assert_eq!(
            err,
            StateError::SequenceGap {
                expected: 2,
                actual: 3
            }
        );
        assert_eq!(tracker.last_sequence(), 1);
    }
}
