//! Combines the pessimistic and optimistic managers behind a per-transaction
//! strategy choice, optionally adapted automatically from the observed
//! conflict rate.

use super::mode::LockMode;
use super::optimistic::OptimisticLockManager;
use super::pessimistic::PessimisticLockManager;
use crate::error::TxnError;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Rolling-window conflict tracker driving the adaptive default strategy.
struct ConflictWindow {
    window: VecDeque<bool>,
    capacity: usize,
}

impl ConflictWindow {
    fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, had_conflict: bool) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(had_conflict);
    }

    fn rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().filter(|c| **c).count() as f64 / self.window.len() as f64
    }
}

pub struct HybridLockManager {
    pessimistic: PessimisticLockManager,
    optimistic: OptimisticLockManager,
    strategies: Mutex<HashMap<u64, bool>>,
    default_optimistic: Mutex<bool>,
    adaptive: bool,
    conflict_threshold: f64,
    conflicts: Mutex<ConflictWindow>,
}

impl HybridLockManager {
    #[must_use]
    pub fn new(
        default_timeout: Duration,
        default_optimistic: bool,
        adaptive: bool,
        window_size: usize,
        conflict_threshold: f64,
    ) -> Self {
        Self {
            pessimistic: PessimisticLockManager::new(default_timeout),
            optimistic: OptimisticLockManager::new(),
            strategies: Mutex::new(HashMap::new()),
            default_optimistic: Mutex::new(default_optimistic),
            adaptive,
            conflict_threshold,
            conflicts: Mutex::new(ConflictWindow::new(window_size.max(1))),
        }
    }

    pub fn set_strategy_for_transaction(&self, txn_id: u64, use_optimistic: bool) {
        self.strategies.lock().insert(txn_id, use_optimistic);
    }

    fn uses_optimistic(&self, txn_id: u64) -> bool {
        self.strategies
            .lock()
            .get(&txn_id)
            .copied()
            .unwrap_or(*self.default_optimistic.lock())
    }

    #[must_use]
    pub fn pessimistic(&self) -> &PessimisticLockManager {
        &self.pessimistic
    }

    #[must_use]
    pub fn optimistic(&self) -> &OptimisticLockManager {
        &self.optimistic
    }

    pub fn acquire(
        &self,
        txn_id: u64,
        resource: &str,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<(), TxnError> {
        if self.uses_optimistic(txn_id) {
            Ok(())
        } else {
            self.pessimistic.acquire(txn_id, resource, mode, timeout)
        }
    }

    pub fn release_all(&self, txn_id: u64) {
        self.pessimistic.release_all(txn_id);
        self.optimistic.cleanup(txn_id);
        self.strategies.lock().remove(&txn_id);
    }

    /// Folds one more transaction's outcome into the rolling conflict-rate
    /// window, switching the default strategy if adaptive mode is enabled
    /// and the rate has crossed `conflict_threshold`.
    pub fn update_conflict_statistics(&self, had_conflict: bool) {
        let mut conflicts = self.conflicts.lock();
        conflicts.record(had_conflict);
        if self.adaptive {
            let rate = conflicts.rate();
            let mut default_optimistic = self.default_optimistic.lock();
            *default_optimistic = rate <= self.conflict_threshold;
        }
    }

    #[must_use]
    pub fn conflict_rate(&self) -> f64 {
        self.conflicts.lock().rate()
    }

    #[must_use]
    pub fn detect_deadlock(&self) -> bool {
        self.pessimistic.detect_deadlock()
    }

    pub fn resolve_deadlocks(&self) -> Vec<u64> {
        self.pessimistic.resolve_deadlocks()
    }
}
