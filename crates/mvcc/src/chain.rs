//! Per-key version chain: an append-only list of [`VersionedValue`]s guarded
//! by its own lock, so readers and writers on different keys never contend.

use crate::version::VersionedValue;
use parking_lot::RwLock;

pub(crate) struct VersionChain {
    versions: RwLock<Vec<VersionedValue>>,
}

impl VersionChain {
    pub(crate) fn new() -> Self {
        Self {
            versions: RwLock::new(Vec::new()),
        }
    }

    /// Appends a new uncommitted version at the back of the chain.
    pub(crate) fn append(&self, value: Vec<u8>, create_ts: u64, txn_id: u64, version: u64) {
        self.versions.write().push(VersionedValue {
            value,
            version,
            create_ts,
            delete_ts: 0,
            txn_id,
            committed: false,
        });
    }

    /// Stamps `delete_ts` onto the chain's last entry (the most recently
    /// written version). Returns that version's id and its prior `delete_ts`
    /// so an abort can restore it. `None` if the chain is empty.
    pub(crate) fn mark_latest_deleted(&self, delete_ts: u64) -> Option<(u64, u64)> {
        let mut versions = self.versions.write();
        let v = versions.last_mut()?;
        let prior = v.delete_ts;
        v.delete_ts = delete_ts;
        Some((v.version, prior))
    }

    /// Restores a version's `delete_ts` to `prior` (undoing an aborted
    /// delete).
    pub(crate) fn restore_delete(&self, version: u64, prior_delete_ts: u64) {
        let mut versions = self.versions.write();
        if let Some(v) = versions.iter_mut().find(|v| v.version == version) {
            v.delete_ts = prior_delete_ts;
        }
    }

    /// Commits a version: marks it `committed` and re-stamps its `create_ts`
    /// to `commit_ts`, so visibility ordering follows commit order rather
    /// than the txn's (possibly much earlier) start timestamp.
    pub(crate) fn commit_version(&self, version: u64, commit_ts: u64) {
        let mut versions = self.versions.write();
        if let Some(v) = versions.iter_mut().find(|v| v.version == version) {
            v.committed = true;
            v.create_ts = commit_ts;
        }
    }

    /// Removes a version outright (undoing an aborted write).
    pub(crate) fn remove_version(&self, version: u64) {
        self.versions.write().retain(|v| v.version != version);
    }

    /// The newest version visible at `read_ts`, scanning newest-first.
    pub(crate) fn visible_at(&self, read_ts: u64) -> Option<Vec<u8>> {
        self.versions
            .read()
            .iter()
            .rev()
            .find(|v| v.is_visible_at(read_ts))
            .map(|v| v.value.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.versions.read().len()
    }

    pub(crate) fn all(&self) -> Vec<VersionedValue> {
        self.versions.read().clone()
    }

    /// Drops versions that can no longer be observed by any reader pinned at
    /// `min_active_ts` or later: the newest committed version is always
    /// kept; among the rest, a version is discarded if its deletion already
    /// predates `min_active_ts`, or if it was created before `min_active_ts`
    /// and a newer committed version shadows it.
    ///
    /// Returns the number of versions dropped.
    pub(crate) fn gc(&self, min_active_ts: u64) -> usize {
        let mut versions = self.versions.write();
        if versions.len() <= 1 {
            return 0;
        }
        let Some(newest_committed_idx) = versions.iter().rposition(|v| v.committed) else {
            return 0;
        };
        let before = versions.len();
        let mut kept = Vec::with_capacity(versions.len());
        for (i, v) in versions.drain(..).enumerate() {
            let is_newest_committed = i == newest_committed_idx;
            let shadowed = i < newest_committed_idx;
            let dead_tombstone = v.delete_ts > 0 && v.delete_ts < min_active_ts;
            let shadowed_by_newer = shadowed && v.create_ts < min_active_ts;
            let discard = !is_newest_committed && (dead_tombstone || shadowed_by_newer);
            if !discard {
                kept.push(v);
            }
        }
        let removed = before - kept.len();
        *versions = kept;
        removed
    }
}
