use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

/// A single block as decoded from the node's console stream.
///
/// Immutable once produced. `num` increases monotonically but not strictly:
/// a fork yields two blocks with the same `num` and distinct `id`s, and a
/// chain may skip numbers entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub num: u64,
    /// Lowercase hex block id.
    pub id: String,
    /// Lowercase hex id of the parent block.
    pub previous_id: String,
    pub timestamp: DateTime<Utc>,
    /// Highest block number known irreversible when this block was produced.
    pub lib_num: u64,
    pub payload: Bytes,
}

impl Block {
    /// Age of the block relative to `now`. Negative when the node's clock
    /// runs ahead of ours.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.num, self.id)
    }
}
