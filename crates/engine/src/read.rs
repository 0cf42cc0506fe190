//! Read path: `get`/`get_at`, `scan`, and `new_iterator`.
//!
//! Point lookups check the Memtable first (freshest data), then every
//! SSTable whose key range could contain the key, newest source first —
//! `L0` by descending `file_id`, `L1..` by ascending `min_key`. The first
//! source with a version visible at the requested snapshot wins, tombstone
//! or not; a tombstone shadows every older value the same way a live value
//! would.
//!
//! Range scans and the concurrent iterator both go through a
//! [`sstable::MergeIterator`] over every relevant source followed by
//! [`crate::iterator::resolve_latest`], so the "newest version wins,
//! tombstones drop" rule only has to be expressed once.

use crate::{ConcurrentIterator, Engine, EngineError};
use memtable::ValueEntry;
use std::sync::Arc;

impl Engine {
    /// Looks up the newest live value for `key`. `Ok(None)` covers both "no
    /// such key" and "key's newest version is a tombstone".
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        self.get_at(key, u64::MAX)
    }

    /// Looks up the version of `key` visible at `snapshot_seq` — the newest
    /// version with `seq <= snapshot_seq`, per the snapshot-isolation
    /// visibility rule.
    pub fn get_at(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Vec<u8>>, EngineError> {
        let state = self.shared.state.read();
        if let Some(entry) = state.mem.get_at(key, snapshot_seq) {
            return Ok(entry.value);
        }
        for handle in state.version.containing(key) {
            if let Some(entry) = handle.reader.get_at(key, snapshot_seq)? {
                return Ok(entry.value);
            }
        }
        Ok(None)
    }

    /// Returns every live `(key, value)` pair with `start <= key < end`, in
    /// ascending key order. Pass `b""` for `start` or `end` to leave that
    /// bound open.
    pub fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        let state = self.shared.state.read();
        let mut sources: Vec<Vec<(Vec<u8>, ValueEntry)>> = Vec::new();

        sources.push(
            state
                .mem
                .iter()
                .filter(|(k, _)| in_range(k, start, end))
                .map(|(k, e)| (k.to_vec(), e))
                .collect(),
        );
        for handle in state.version.overlapping(start, end) {
            let entries = handle.reader.scan_all()?;
            sources.push(
                entries
                    .into_iter()
                    .filter(|(k, _)| in_range(k, start, end))
                    .collect(),
            );
        }

        let merged = sstable::MergeIterator::new(sources).collect_all();
        Ok(crate::iterator::resolve_latest(merged))
    }

    /// Builds a [`ConcurrentIterator`] snapshotting every currently-live key.
    /// Invalidated by the next write anywhere in the engine; construct a new
    /// one to see subsequent writes.
    pub fn new_iterator(&self) -> Result<ConcurrentIterator, EngineError> {
        let entries = self.scan(b"", b"")?;
        Ok(ConcurrentIterator::new(entries, Arc::clone(&self.shared.epoch)))
    }

    /// Pins the engine's current seq as a snapshot and returns it. Pair with
    /// [`Engine::release_snapshot`] once the caller is done reading at it.
    #[must_use]
    pub fn create_snapshot(&self) -> u64 {
        let seq = self.shared.seq.load(std::sync::atomic::Ordering::SeqCst);
        self.shared.snapshots.lock().create(seq)
    }

    /// Releases one pin on `seq`. A no-op if `seq` wasn't pinned.
    pub fn release_snapshot(&self, seq: u64) {
        self.shared.snapshots.lock().release(seq);
    }
}

fn in_range(key: &[u8], start: &[u8], end: &[u8]) -> bool {
    (start.is_empty() || key >= start) && (end.is_empty() || key < end)
}
