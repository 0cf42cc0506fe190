//! The transaction manager: begins transactions at a chosen isolation
//! level, buffers their writes, and runs the commit protocol (validate,
//! assign a commit timestamp, apply through MVCC, release locks).

use crate::context::{IsolationLevel, TransactionContext, TxnState};
use crate::error::TxnError;
use crate::lock::{LockMode, PessimisticLockManager};
use mvcc::MvccManager;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Drives transactions against a shared [`MvccManager`], using a
/// [`PessimisticLockManager`] for `Serializable`'s strict two-phase
/// locking. `ReadCommitted` and `RepeatableRead` rely on MVCC snapshots
/// alone and never touch the lock table.
pub struct TransactionManager {
    mvcc: Arc<MvccManager>,
    locks: Arc<PessimisticLockManager>,
    clock: AtomicU64,
    next_txn_id: AtomicU64,
    txns: RwLock<HashMap<u64, TransactionContext>>,
    lock_timeout: Duration,
}

impl TransactionManager {
    #[must_use]
    pub fn new(mvcc: Arc<MvccManager>, locks: Arc<PessimisticLockManager>, lock_timeout: Duration) -> Self {
        Self {
            mvcc,
            locks,
            clock: AtomicU64::new(0),
            next_txn_id: AtomicU64::new(0),
            txns: RwLock::new(HashMap::new()),
            lock_timeout,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    #[must_use]
    pub fn begin(&self, isolation: IsolationLevel) -> TransactionContext {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst) + 1;
        let start_ts = self.tick();
        let ctx = TransactionContext::new(txn_id, isolation, start_ts);
        self.txns.write().insert(txn_id, ctx.clone());
        info!(txn_id, start_ts, ?isolation, "transaction started");
        ctx
    }

    fn with_txn<T>(
        &self,
        txn_id: u64,
        f: impl FnOnce(&mut TransactionContext) -> Result<T, TxnError>,
    ) -> Result<T, TxnError> {
        let mut txns = self.txns.write();
        let ctx = txns
            .get_mut(&txn_id)
            .ok_or(TxnError::UnknownTransaction(txn_id))?;
        f(ctx)
    }

    /// Reads `key` as of the transaction's visibility rule: a fresh
    /// snapshot for `ReadCommitted`, the pinned start timestamp otherwise.
    /// `Serializable` additionally takes a shared lock held until commit.
    pub fn get(&self, txn_id: u64, key: &[u8]) -> Result<Option<Vec<u8>>, TxnError> {
        let (isolation, start_ts, buffered) = self.with_txn(txn_id, |ctx| {
            if !ctx.is_active() {
                return Err(TxnError::InvalidState("transaction is not active".into()));
            }
            Ok((ctx.isolation, ctx.start_ts, ctx.write_set.get(key).cloned()))
        })?;

        // A transaction always sees its own uncommitted writes first.
        if let Some(value) = buffered {
            return Ok(value);
        }

        if isolation == IsolationLevel::Serializable {
            self.locks
                .acquire(txn_id, &resource_name(key), LockMode::Shared, Some(self.lock_timeout))?;
        }

        let read_ts = match isolation {
            IsolationLevel::ReadCommitted => self.clock.load(Ordering::SeqCst),
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable => start_ts,
        };
        Ok(self.mvcc.read(key, read_ts))
    }

    /// Buffers a write; nothing is visible to other transactions until
    /// [`TransactionManager::commit`] succeeds.
    pub fn put(&self, txn_id: u64, key: Vec<u8>, value: Vec<u8>) -> Result<(), TxnError> {
        self.stage(txn_id, key, Some(value))
    }

    /// Buffers a delete.
    pub fn delete(&self, txn_id: u64, key: Vec<u8>) -> Result<(), TxnError> {
        self.stage(txn_id, key, None)
    }

    fn stage(&self, txn_id: u64, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<(), TxnError> {
        let isolation = self.with_txn(txn_id, |ctx| {
            if !ctx.is_active() {
                return Err(TxnError::InvalidState("transaction is not active".into()));
            }
            Ok(ctx.isolation)
        })?;

        if isolation == IsolationLevel::Serializable {
            self.locks.acquire(
                txn_id,
                &resource_name(&key),
                LockMode::Exclusive,
                Some(self.lock_timeout),
            )?;
        }

        self.with_txn(txn_id, |ctx| {
            ctx.write_set.insert(key, value);
            Ok(())
        })
    }

    /// Runs the commit protocol: validate against concurrently committed
    /// versions (snapshot-isolation write-write check), assign a commit
    /// timestamp, apply the buffered write set through MVCC, then release
    /// any locks held. Returns `Ok(false)` (not an error) when validation
    /// fails and the transaction is rolled back instead.
    pub fn commit(&self, txn_id: u64) -> Result<bool, TxnError> {
        let (start_ts, write_set) = self.with_txn(txn_id, |ctx| {
            if !ctx.is_active() {
                return Err(TxnError::InvalidState("transaction is not active".into()));
            }
            ctx.state = TxnState::Preparing;
            Ok((ctx.start_ts, ctx.write_set.clone()))
        })?;

        for key in write_set.keys() {
            if self.has_newer_committed_write(key, start_ts) {
                warn!(txn_id, "write-write conflict detected, aborting");
                self.abort(txn_id)?;
                return Ok(false);
            }
        }

        let commit_ts = self.tick();
        for (key, value) in &write_set {
            match value {
                Some(v) => self.mvcc.write(key, v.clone(), txn_id, commit_ts),
                None => {
                    // A key buffered for delete may never have been
                    // written through MVCC if it was created and deleted
                    // within the same transaction; that's a silent no-op.
                    let _ = self.mvcc.remove(key, txn_id, commit_ts);
                }
            }
        }
        self.mvcc.commit(txn_id, commit_ts);
        self.locks.release_all(txn_id);

        self.with_txn(txn_id, |ctx| {
            ctx.state = TxnState::Committed;
            Ok(())
        })?;
        info!(txn_id, commit_ts, "transaction committed");
        Ok(true)
    }

    fn has_newer_committed_write(&self, key: &[u8], start_ts: u64) -> bool {
        self.mvcc
            .all_versions(key)
            .iter()
            .any(|v| v.committed && v.create_ts > start_ts)
    }

    pub fn abort(&self, txn_id: u64) -> Result<(), TxnError> {
        self.mvcc.abort(txn_id);
        self.locks.release_all(txn_id);
        self.with_txn(txn_id, |ctx| {
            ctx.state = TxnState::Aborted;
            Ok(())
        })?;
        info!(txn_id, "transaction aborted");
        Ok(())
    }

    /// The oldest start timestamp among still-active transactions, i.e.
    /// the floor below which MVCC garbage collection may reclaim versions.
    #[must_use]
    pub fn min_active_start_ts(&self) -> u64 {
        self.txns
            .read()
            .values()
            .filter(|ctx| ctx.is_active())
            .map(|ctx| ctx.start_ts)
            .min()
            .unwrap_or_else(|| self.clock.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn context(&self, txn_id: u64) -> Option<TransactionContext> {
        self.txns.read().get(&txn_id).cloned()
    }

    #[must_use]
    pub fn active_transactions(&self) -> Vec<u64> {
        self.txns
            .read()
            .iter()
            .filter(|(_, ctx)| ctx.is_active())
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Lock resources are keyed by the user key's byte string; this gives the
/// lock table a stable, human-debuggable identifier without allocating
/// more than one string per distinct key.
fn resource_name(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
