//! Hierarchical lock modes and their compatibility matrix.

/// A lock strength. `None` is only ever used as a query result, never
/// granted — `acquire` always requests one of the other five.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    None,
    /// Shared — read access.
    Shared,
    /// Exclusive — write access.
    Exclusive,
    /// Intention-shared — intent to take a `Shared` lock further down the
    /// resource hierarchy.
    IntentionShared,
    /// Intention-exclusive — intent to take an `Exclusive` lock further
    /// down the hierarchy.
    IntentionExclusive,
    /// Shared + intention-exclusive: read this resource, intend to write
    /// something below it.
    SharedIntentionExclusive,
}

impl LockMode {
    /// Whether a lock already held in `self` permits a concurrent request
    /// for `requested` by a different transaction.
    #[must_use]
    pub fn compatible(self, requested: LockMode) -> bool {
        use LockMode::{
            Exclusive, IntentionExclusive, IntentionShared, None, Shared,
            SharedIntentionExclusive,
        };
        matches!(
            (self, requested),
            (None, _)
                | (_, None)
                | (Shared, Shared)
                | (Shared, IntentionShared)
                | (IntentionShared, Shared)
                | (IntentionShared, IntentionShared)
                | (IntentionShared, IntentionExclusive)
                | (IntentionShared, SharedIntentionExclusive)
                | (IntentionExclusive, IntentionShared)
                | (IntentionExclusive, IntentionExclusive)
                | (SharedIntentionExclusive, IntentionShared)
        )
    }
}
