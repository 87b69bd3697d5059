//! Message identity.
//!
//! Ids minted locally combine the creation time in milliseconds with a
//! per-source sequence number and the sender, e.g. `1714564800000-3_bot`.
//! The sequence keeps ids unique when several messages are created within
//! the same millisecond.

use time::OffsetDateTime;

use crate::types::Sender;
use crate::utils::time::epoch_millis;

/// Mints message ids for one conversation.
#[derive(Debug, Default)]
pub struct IdSource {
    next: u64,
}

impl IdSource {
    /// Creates a source starting at sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the next id for a message from `sender` created at `at`.
    pub fn mint(&mut self, sender: Sender, at: OffsetDateTime) -> String {
        let seq = self.next;
        self.next += 1;
        format!("{}-{}_{}", epoch_millis(at), seq, sender.as_str())
    }
}
