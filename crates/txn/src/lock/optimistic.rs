//! Optimistic concurrency control: reads record the version they observed,
//! writes buffer locally, and a commit-time validation pass rejects the
//! transaction if any read key's version has since moved.

use crate::error::TxnError;
use mvcc::MvccManager;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

struct TransactionSets {
    read_set: HashMap<Vec<u8>, u64>,
    write_set: HashMap<Vec<u8>, Option<Vec<u8>>>,
}

impl TransactionSets {
    fn new() -> Self {
        Self {
            read_set: HashMap::new(),
            write_set: HashMap::new(),
        }
    }
}

/// Version-stamped keys plus per-transaction read/write sets. Unlike
/// [`super::pessimistic::PessimisticLockManager`], `acquire`/`release` are
/// no-ops here — conflicts are caught once, at commit time, rather than
/// blocked on up front.
pub struct OptimisticLockManager {
    key_versions: RwLock<HashMap<Vec<u8>, u64>>,
    transaction_sets: Mutex<HashMap<u64, TransactionSets>>,
    global_version_counter: AtomicU64,
}

impl OptimisticLockManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            key_versions: RwLock::new(HashMap::new()),
            transaction_sets: Mutex::new(HashMap::new()),
            global_version_counter: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn current_version(&self, key: &[u8]) -> u64 {
        self.key_versions.read().get(key).copied().unwrap_or(0)
    }

    fn next_version(&self) -> u64 {
        self.global_version_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reads `key` from the underlying MVCC store at `read_ts` and records
    /// the key's current version in `txn_id`'s read set for later
    /// validation.
    pub fn read_with_version(
        &self,
        mvcc: &MvccManager,
        txn_id: u64,
        key: &[u8],
        read_ts: u64,
    ) -> Option<Vec<u8>> {
        let version = self.current_version(key);
        self.transaction_sets
            .lock()
            .entry(txn_id)
            .or_insert_with(TransactionSets::new)
            .read_set
            .insert(key.to_vec(), version);
        mvcc.read(key, read_ts)
    }

    /// Buffers a write locally; nothing is visible to other transactions
    /// until [`OptimisticLockManager::apply_write_set`] runs at commit.
    pub fn stage_write(&self, txn_id: u64, key: &[u8], value: Option<Vec<u8>>) {
        self.transaction_sets
            .lock()
            .entry(txn_id)
            .or_insert_with(TransactionSets::new)
            .write_set
            .insert(key.to_vec(), value);
    }

    /// Whether every key `txn_id` read still has the version it read it at.
    #[must_use]
    pub fn validate(&self, txn_id: u64) -> bool {
        let sets = self.transaction_sets.lock();
        let Some(sets) = sets.get(&txn_id) else {
            return true;
        };
        let versions = self.key_versions.read();
        sets.read_set
            .iter()
            .all(|(key, seen)| versions.get(key).copied().unwrap_or(0) == *seen)
    }

    /// Applies the buffered write set through `mvcc` and bumps every
    /// written key's version. Callers must have already validated.
    pub fn apply_write_set(
        &self,
        mvcc: &MvccManager,
        txn_id: u64,
        commit_ts: u64,
    ) -> Result<(), TxnError> {
        let write_set = self
            .transaction_sets
            .lock()
            .get(&txn_id)
            .map(|s| s.write_set.clone())
            .unwrap_or_default();
        let mut versions = self.key_versions.write();
        for (key, value) in write_set {
            match value {
                Some(v) => mvcc.write(&key, v, txn_id, commit_ts),
                None => {
                    mvcc.remove(&key, txn_id, commit_ts)
                        .map_err(|e| TxnError::Conflict(e.to_string()))?;
                }
            }
            let version = self.next_version();
            versions.insert(key, version);
        }
        mvcc.commit(txn_id, commit_ts);
        Ok(())
    }

    pub fn cleanup(&self, txn_id: u64) {
        self.transaction_sets.lock().remove(&txn_id);
    }

    #[must_use]
    pub fn has_write(&self, txn_id: u64, key: &[u8]) -> bool {
        self.transaction_sets
            .lock()
            .get(&txn_id)
            .is_some_and(|s| s.write_set.contains_key(key))
    }
}

impl Default for OptimisticLockManager {
    fn default() -> Self {
        Self::new()
    }
}
