//! The MVCC manager: owns every key's version chain plus the bookkeeping
//! needed to commit or abort a transaction's writes and deletes atomically.

use crate::chain::VersionChain;
use crate::error::MvccError;
use crate::version::VersionedValue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

enum PendingOp {
    Write { key: Vec<u8>, version: u64 },
    Delete {
        key: Vec<u8>,
        version: u64,
        prior_delete_ts: u64,
    },
}

/// Tracks per-key version chains and in-flight transaction writes.
///
/// Independent of the LSM storage engine: it shares the `seq`/timestamp
/// space logically (both are caller-supplied `u64`s ordering events) but
/// owns no WAL, MemTable, or SSTables of its own, so it can be driven and
/// tested without an `engine::Engine` behind it.
pub struct MvccManager {
    chains: RwLock<HashMap<Vec<u8>, Arc<VersionChain>>>,
    pending: RwLock<HashMap<u64, Vec<PendingOp>>>,
    next_version: AtomicU64,
    gc_runs: AtomicU64,
    versions_cleaned: AtomicU64,
}

impl MvccManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(0),
            gc_runs: AtomicU64::new(0),
            versions_cleaned: AtomicU64::new(0),
        }
    }

    fn get_chain(&self, key: &[u8]) -> Option<Arc<VersionChain>> {
        self.chains.read().get(key).cloned()
    }

    fn get_or_create_chain(&self, key: &[u8]) -> Arc<VersionChain> {
        if let Some(chain) = self.get_chain(key) {
            return chain;
        }
        let mut chains = self.chains.write();
        chains
            .entry(key.to_vec())
            .or_insert_with(|| Arc::new(VersionChain::new()))
            .clone()
    }

    fn record(&self, txn_id: u64, op: PendingOp) {
        self.pending.write().entry(txn_id).or_default().push(op);
    }

    /// Newest committed version of `key` visible at `read_ts`.
    #[must_use]
    pub fn read(&self, key: &[u8], read_ts: u64) -> Option<Vec<u8>> {
        self.get_chain(key).and_then(|chain| chain.visible_at(read_ts))
    }

    /// Appends a new, as-yet-uncommitted version. Becomes visible once
    /// [`MvccManager::commit`] is called for `txn_id`.
    pub fn write(&self, key: &[u8], value: Vec<u8>, txn_id: u64, ts: u64) {
        let chain = self.get_or_create_chain(key);
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        chain.append(value, ts, txn_id, version);
        self.record(
            txn_id,
            PendingOp::Write {
                key: key.to_vec(),
                version,
            },
        );
    }

    /// Stamps a delete timestamp on `key`'s most recent version. The delete
    /// takes effect immediately but is rolled back if `txn_id` later aborts.
    pub fn remove(&self, key: &[u8], txn_id: u64, ts: u64) -> Result<(), MvccError> {
        let chain = self.get_chain(key).ok_or(MvccError::NotFound)?;
        let (version, prior_delete_ts) = chain
            .mark_latest_deleted(ts)
            .ok_or(MvccError::NotFound)?;
        self.record(
            txn_id,
            PendingOp::Delete {
                key: key.to_vec(),
                version,
                prior_delete_ts,
            },
        );
        Ok(())
    }

    /// Flips every version written by `txn_id` to committed, re-stamped with
    /// `commit_ts`. Deletes made by `txn_id` were already applied at
    /// [`MvccManager::remove`] time and need no further action.
    pub fn commit(&self, txn_id: u64, commit_ts: u64) {
        let ops = self.pending.write().remove(&txn_id).unwrap_or_default();
        for op in ops {
            if let PendingOp::Write { key, version } = op {
                if let Some(chain) = self.get_chain(&key) {
                    chain.commit_version(version, commit_ts);
                }
            }
        }
        debug!(txn_id, commit_ts, "mvcc: transaction committed");
    }

    /// Undoes every write and delete recorded for `txn_id`: written versions
    /// are dropped outright, deletes have their prior `delete_ts` restored.
    pub fn abort(&self, txn_id: u64) {
        let ops = self.pending.write().remove(&txn_id).unwrap_or_default();
        for op in ops {
            match op {
                PendingOp::Write { key, version } => {
                    if let Some(chain) = self.get_chain(&key) {
                        chain.remove_version(version);
                    }
                }
                PendingOp::Delete {
                    key,
                    version,
                    prior_delete_ts,
                } => {
                    if let Some(chain) = self.get_chain(&key) {
                        chain.restore_delete(version, prior_delete_ts);
                    }
                }
            }
        }
        debug!(txn_id, "mvcc: transaction aborted");
    }

    /// Every key's value visible at `ts`, materialized as a plain map.
    #[must_use]
    pub fn create_snapshot(&self, ts: u64) -> HashMap<Vec<u8>, Vec<u8>> {
        self.chains
            .read()
            .iter()
            .filter_map(|(k, chain)| chain.visible_at(ts).map(|v| (k.clone(), v)))
            .collect()
    }

    /// Runs garbage collection across every chain, dropping versions no
    /// reader pinned at `min_active_ts` or later could still observe.
    /// `min_active_ts` is supplied by the caller (typically the transaction
    /// manager's oldest active start timestamp) so the MVCC manager needs no
    /// active-transaction bookkeeping of its own.
    pub fn run_gc(&self, min_active_ts: u64) -> usize {
        let removed: usize = self
            .chains
            .read()
            .values()
            .map(|chain| chain.gc(min_active_ts))
            .sum();
        self.gc_runs.fetch_add(1, Ordering::Relaxed);
        self.versions_cleaned
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            debug!(removed, min_active_ts, "mvcc: gc pass complete");
        }
        removed
    }

    #[must_use]
    pub fn total_versions(&self) -> usize {
        self.chains.read().values().map(|c| c.len()).sum()
    }

    #[must_use]
    pub fn version_count(&self, key: &[u8]) -> usize {
        self.get_chain(key).map_or(0, |c| c.len())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.chains.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn all_versions(&self, key: &[u8]) -> Vec<VersionedValue> {
        self.get_chain(key).map_or_else(Vec::new, |c| c.all())
    }

    #[must_use]
    pub fn gc_runs(&self) -> u64 {
        self.gc_runs.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn versions_cleaned(&self) -> u64 {
        self.versions_cleaned.load(Ordering::Relaxed)
    }
}

impl Default for MvccManager {
    fn default() -> Self {
        Self::new()
    }
}
