//! A single versioned value inside a key's [`crate::chain::VersionChain`].

/// One entry in a key's version chain.
///
/// Visibility follows the snapshot-isolation rule from the data model:
/// committed, `create_ts ≤ R`, and either never deleted or deleted strictly
/// after `R`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedValue {
    pub value: Vec<u8>,
    pub version: u64,
    pub create_ts: u64,
    pub delete_ts: u64,
    pub txn_id: u64,
    pub committed: bool,
}

impl VersionedValue {
    /// `committed ∧ create_ts ≤ R ∧ (delete_ts=0 ∨ delete_ts>R)`.
    #[must_use]
    pub fn is_visible_at(&self, read_ts: u64) -> bool {
        self.committed
            && self.create_ts <= read_ts
            && (self.delete_ts == 0 || self.delete_ts > read_ts)
    }
}
