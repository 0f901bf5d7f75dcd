//! Sync cursor — the last block whose events have been durably applied.

use serde::{Deserialize, Serialize};

/// Monotonic position of the event applier in the chain.
///
/// The cursor never moves backwards: replayed or out-of-order events with a
/// lower block number leave it untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncCursor {
    block_number: u64,
}

impl SyncCursor {
    pub fn new(block_number: u64) -> Self {
        Self { block_number }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Move the cursor to `block_number` if that is ahead of it.
    ///
    /// Returns `true` if the cursor moved.
    pub fn advance(&mut self, block_number: u64) -> bool {
        if block_number > self.block_number {
            self.block_number = block_number;
            true
        } else {
            false
        }
    }

    /// First block to request when resuming a subscription.
    ///
    /// The cursor block itself is replayed: a crash between two logs of the
    /// same block would otherwise lose the second one.
    pub fn resume_from(&self, floor: u64) -> u64 {
        self.block_number.max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_in_order() {
        let mut cursor = SyncCursor::default();
        for block in [5, 6, 7] {
            assert!(cursor.advance(block));
        }
        assert_eq!(cursor.block_number(), 7);
    }

    #[test]
    fn cursor_never_regresses() {
        let mut cursor = SyncCursor::new(7);
        assert!(!cursor.advance(6));
        assert!(!cursor.advance(7));
        assert_eq!(cursor.block_number(), 7);
    }

    #[test]
    fn resume_respects_deployment_floor() {
        assert_eq!(SyncCursor::new(0).resume_from(1_000), 1_000);
        assert_eq!(SyncCursor::new(2_000).resume_from(1_000), 2_000);
    }
}
