//! Pessimistic (wait-based) locking with FIFO granting and background-
//! friendly deadlock detection over a wait-for graph.

use super::mode::LockMode;
use crate::error::TxnError;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct Entry {
    /// Currently granted holders.
    granted: Vec<(u64, LockMode)>,
    /// FIFO queue of requests not yet granted.
    waiting: VecDeque<(u64, LockMode)>,
}

struct EntrySlot {
    state: Mutex<Entry>,
    cvar: Condvar,
}

impl EntrySlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(Entry {
                granted: Vec::new(),
                waiting: VecDeque::new(),
            }),
            cvar: Condvar::new(),
        }
    }
}

#[derive(Default)]
pub struct LockManagerStats {
    pub granted_requests: u64,
    pub waiting_requests: u64,
    pub timeout_requests: u64,
    pub deadlocks_detected: u64,
}

/// A classical hierarchical lock table: per-resource granted/waiting lists,
/// a transaction→resources index for bulk release, and a wait-for graph
/// used for deadlock detection.
///
/// Grants are strictly FIFO: a request at the head of a resource's waiting
/// queue blocks every request behind it even if a later one would itself
/// be compatible with the current holders, matching textbook lock-manager
/// behavior (and avoiding starvation of long-waiting writers).
pub struct PessimisticLockManager {
    table: RwLock<HashMap<String, Arc<EntrySlot>>>,
    transaction_locks: Mutex<HashMap<u64, HashSet<String>>>,
    wait_graph: Mutex<HashMap<u64, HashSet<u64>>>,
    /// Transactions marked by [`PessimisticLockManager::resolve_deadlocks`]
    /// for involuntary abort; a waiting `acquire` polls this set and bails
    /// out as soon as it notices its own id.
    victims: Mutex<HashSet<u64>>,
    default_timeout: Duration,
    granted_requests: AtomicU64,
    waiting_requests: AtomicU64,
    timeout_requests: AtomicU64,
    deadlocks_detected: AtomicU64,
}

/// How long an `acquire` call sleeps between polling for a grant, a
/// timeout, or a deadlock-victim notification.
const POLL_SLICE: Duration = Duration::from_millis(20);

impl PessimisticLockManager {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            transaction_locks: Mutex::new(HashMap::new()),
            wait_graph: Mutex::new(HashMap::new()),
            victims: Mutex::new(HashSet::new()),
            default_timeout,
            granted_requests: AtomicU64::new(0),
            waiting_requests: AtomicU64::new(0),
            timeout_requests: AtomicU64::new(0),
            deadlocks_detected: AtomicU64::new(0),
        }
    }

    fn entry(&self, resource: &str) -> Arc<EntrySlot> {
        if let Some(e) = self.table.read().get(resource) {
            return e.clone();
        }
        self.table
            .write()
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(EntrySlot::new()))
            .clone()
    }

    fn can_grant(granted: &[(u64, LockMode)], mode: LockMode, txn_id: u64) -> bool {
        granted
            .iter()
            .all(|(t, m)| *t == txn_id || m.compatible(mode))
    }

    /// Promotes as many FIFO-head waiters as are currently grantable.
    fn grant_compatible(entry: &mut Entry) {
        while let Some(&(txn_id, mode)) = entry.waiting.front() {
            if Self::can_grant(&entry.granted, mode, txn_id) {
                entry.waiting.pop_front();
                entry.granted.push((txn_id, mode));
            } else {
                break;
            }
        }
    }

    pub fn acquire(
        &self,
        txn_id: u64,
        resource: &str,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> Result<(), TxnError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let slot = self.entry(resource);

        {
            let mut guard = slot.state.lock();
            if guard.waiting.is_empty() && Self::can_grant(&guard.granted, mode, txn_id) {
                guard.granted.push((txn_id, mode));
                self.granted_requests.fetch_add(1, Ordering::Relaxed);
                self.record_held(txn_id, resource);
                return Ok(());
            }
            guard.waiting.push_back((txn_id, mode));
            self.waiting_requests.fetch_add(1, Ordering::Relaxed);
            let blockers: HashSet<u64> = guard
                .granted
                .iter()
                .map(|(t, _)| *t)
                .filter(|t| *t != txn_id)
                .collect();
            self.wait_graph.lock().insert(txn_id, blockers);
        }

        let outcome = loop {
            let mut guard = slot.state.lock();
            if guard
                .granted
                .iter()
                .any(|&(t, m)| t == txn_id && m == mode)
            {
                break Ok(());
            }
            if self.victims.lock().remove(&txn_id) {
                guard.waiting.retain(|(t, _)| *t != txn_id);
                break Err(TxnError::DeadlockVictim);
            }
            let now = Instant::now();
            if now >= deadline {
                guard.waiting.retain(|(t, _)| *t != txn_id);
                self.timeout_requests.fetch_add(1, Ordering::Relaxed);
                break Err(TxnError::LockTimeout);
            }
            let slice = POLL_SLICE.min(deadline - now);
            slot.cvar.wait_for(&mut guard, slice);
        };

        self.wait_graph.lock().remove(&txn_id);
        if outcome.is_ok() {
            self.granted_requests.fetch_add(1, Ordering::Relaxed);
            self.record_held(txn_id, resource);
        }
        outcome
    }

    fn record_held(&self, txn_id: u64, resource: &str) {
        self.transaction_locks
            .lock()
            .entry(txn_id)
            .or_default()
            .insert(resource.to_string());
    }

    pub fn release(&self, txn_id: u64, resource: &str) -> bool {
        let slot = self.entry(resource);
        let released = {
            let mut guard = slot.state.lock();
            let before = guard.granted.len();
            guard.granted.retain(|(t, _)| *t != txn_id);
            let released = guard.granted.len() != before;
            if released {
                Self::grant_compatible(&mut guard);
            }
            released
        };
        if released {
            if let Some(set) = self.transaction_locks.lock().get_mut(&txn_id) {
                set.remove(resource);
            }
            slot.cvar.notify_all();
        }
        released
    }

    pub fn release_all(&self, txn_id: u64) {
        let resources: Vec<String> = self
            .transaction_locks
            .lock()
            .remove(&txn_id)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for resource in &resources {
            let slot = self.entry(resource);
            let mut guard = slot.state.lock();
            guard.granted.retain(|(t, _)| *t != txn_id);
            Self::grant_compatible(&mut guard);
            drop(guard);
            slot.cvar.notify_all();
        }
        self.wait_graph.lock().remove(&txn_id);
        for waiters in self.wait_graph.lock().values_mut() {
            waiters.remove(&txn_id);
        }
        debug!(txn_id, count = resources.len(), "released all locks");
    }

    #[must_use]
    pub fn has_lock(&self, txn_id: u64, resource: &str) -> bool {
        self.transaction_locks
            .lock()
            .get(&txn_id)
            .is_some_and(|s| s.contains(resource))
    }

    #[must_use]
    pub fn get_mode(&self, txn_id: u64, resource: &str) -> LockMode {
        self.entry(resource)
            .state
            .lock()
            .granted
            .iter()
            .find(|(t, _)| *t == txn_id)
            .map_or(LockMode::None, |(_, m)| *m)
    }

    #[must_use]
    pub fn locked_resources(&self, txn_id: u64) -> Vec<String> {
        self.transaction_locks
            .lock()
            .get(&txn_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn dfs(
        node: u64,
        graph: &HashMap<u64, HashSet<u64>>,
        visited: &mut HashSet<u64>,
        stack: &mut Vec<u64>,
        on_stack: &mut HashSet<u64>,
    ) -> Option<Vec<u64>> {
        visited.insert(node);
        on_stack.insert(node);
        stack.push(node);
        if let Some(edges) = graph.get(&node) {
            for &next in edges {
                if on_stack.contains(&next) {
                    let start = stack.iter().position(|&n| n == next).unwrap();
                    return Some(stack[start..].to_vec());
                }
                if !visited.contains(&next) {
                    if let Some(cycle) = Self::dfs(next, graph, visited, stack, on_stack) {
                        return Some(cycle);
                    }
                }
            }
        }
        stack.pop();
        on_stack.remove(&node);
        None
    }

    #[must_use]
    pub fn find_cycle(&self) -> Vec<u64> {
        let graph = self.wait_graph.lock().clone();
        let mut visited = HashSet::new();
        for &node in graph.keys() {
            if !visited.contains(&node) {
                let mut stack = Vec::new();
                let mut on_stack = HashSet::new();
                if let Some(cycle) = Self::dfs(node, &graph, &mut visited, &mut stack, &mut on_stack) {
                    return cycle;
                }
            }
        }
        Vec::new()
    }

    #[must_use]
    pub fn detect_deadlock(&self) -> bool {
        !self.find_cycle().is_empty()
    }

    /// Finds and breaks every deadlock currently present in the wait-for
    /// graph by marking the youngest (highest transaction id) member of
    /// each cycle as a victim; its blocked `acquire` wakes within one poll
    /// slice and returns [`TxnError::DeadlockVictim`]. Returns the ids of
    /// every transaction aborted this way.
    pub fn resolve_deadlocks(&self) -> Vec<u64> {
        let mut victims = Vec::new();
        loop {
            let cycle = self.find_cycle();
            if cycle.is_empty() {
                break;
            }
            self.deadlocks_detected.fetch_add(1, Ordering::Relaxed);
            let victim = *cycle.iter().max().unwrap();
            self.victims.lock().insert(victim);
            self.wait_graph.lock().remove(&victim);
            for waiters in self.wait_graph.lock().values_mut() {
                waiters.remove(&victim);
            }
            debug!(victim, ?cycle, "resolved deadlock by aborting youngest transaction");
            victims.push(victim);
        }
        victims
    }

    #[must_use]
    pub fn stats(&self) -> LockManagerStats {
        LockManagerStats {
            granted_requests: self.granted_requests.load(Ordering::Relaxed),
            waiting_requests: self.waiting_requests.load(Ordering::Relaxed),
            timeout_requests: self.timeout_requests.load(Ordering::Relaxed),
            deadlocks_detected: self.deadlocks_detected.load(Ordering::Relaxed),
        }
    }
}
