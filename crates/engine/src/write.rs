//! Write path: `put`/`del`, WAL rotation, and the synchronous-flush fallback
//! used on `Drop` and during recovery.
//!
//! Every write takes the state write lock for just long enough to append to
//! the WAL, mutate the Memtable, and — if the Memtable just crossed its
//! flush threshold — swap in a fresh one and rotate the WAL segment. The
//! sealed Memtable is then handed to the background flush worker over a
//! channel; the write itself never blocks on SST I/O.

use crate::version::SstMeta;
use crate::{Engine, EngineError, FlushJob, Shared, State, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use memtable::Memtable;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};
use wal::{WalRecord, WalWriter};

impl Engine {
    /// Inserts or overwrites `key` with `value`, returning the assigned seq.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<u64, EngineError> {
        validate(&key, Some(&value))?;
        self.apply(key, Some(value))
    }

    /// Deletes `key` (recorded as a tombstone, not removed in place).
    pub fn del(&self, key: Vec<u8>) -> Result<u64, EngineError> {
        validate(&key, None)?;
        self.apply(key, None)
    }

    fn apply(&self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<u64, EngineError> {
        let mut state = self.shared.state.write();
        if let Some(reason) = &state.poisoned {
            return Err(EngineError::Fatal(reason.clone()));
        }

        let seq = self.shared.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = match &value {
            Some(v) => WalRecord::Put {
                seq,
                key: key.clone(),
                value: v.clone(),
            },
            None => WalRecord::Del {
                seq,
                key: key.clone(),
            },
        };
        state
            .wal_writer
            .append(&record)
            .map_err(|e| EngineError::Retry(e.to_string()))?;

        match value {
            Some(v) => state.mem.put(key, v, seq),
            None => state.mem.delete(key, seq),
        }
        self.shared.epoch.fetch_add(1, Ordering::Release);

        if state.mem.approx_size() >= state.flush_threshold {
            rotate_and_enqueue_flush(&self.shared, &mut state)
                .map_err(|e| EngineError::Retry(e.to_string()))?;
        }

        Ok(seq)
    }
}

fn validate(key: &[u8], value: Option<&[u8]>) -> Result<(), EngineError> {
    if key.is_empty() {
        return Err(EngineError::InvalidInput("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(EngineError::InvalidInput(format!(
            "key exceeds maximum size of {MAX_KEY_SIZE} bytes"
        )));
    }
    if let Some(v) = value {
        if v.len() > MAX_VALUE_SIZE {
            return Err(EngineError::InvalidInput(format!(
                "value exceeds maximum size of {MAX_VALUE_SIZE} bytes"
            )));
        }
    }
    Ok(())
}

pub(crate) fn wal_segment_path(data_dir: &std::path::Path, seg_id: u64) -> std::path::PathBuf {
    data_dir.join(format!("wal-{seg_id:06}.log"))
}

/// Seals the active Memtable, opens a fresh WAL segment for new writes, and
/// hands the sealed Memtable off to the flush worker. Called with the state
/// write lock already held.
fn rotate_and_enqueue_flush(shared: &Arc<Shared>, state: &mut State) -> Result<()> {
    let old_wal_path = wal_segment_path(&shared.data_dir, state.wal_seg_id);
    let new_seg_id = state.wal_seg_id + 1;
    let new_wal_path = wal_segment_path(&shared.data_dir, new_seg_id);

    let new_writer = WalWriter::create(&new_wal_path, state.wal_sync)
        .with_context(|| format!("failed to create wal segment {}", new_wal_path.display()))?;
    let old_mem = std::mem::replace(&mut state.mem, Memtable::new());
    state.wal_writer = new_writer;
    state.wal_seg_id = new_seg_id;

    let job = FlushJob {
        mem: old_mem,
        wal_seg_to_retire: old_wal_path,
    };

    // If the worker channel is already gone (shutting down), the data is
    // still durable in the retired WAL segment and will replay on next open.
    if let Some(tx) = shared.flush_tx.lock().as_ref() {
        let _ = tx.send(job);
    }
    Ok(())
}

/// The background flush worker's main loop. Runs until `rx` is closed
/// (the engine drops its sending half on shutdown).
pub(crate) fn run_flush_worker(shared: Arc<Shared>, rx: Receiver<FlushJob>) {
    for job in rx.iter() {
        if let Err(e) = flush_job(&shared, job) {
            error!(error = %e, "flush failed, poisoning engine");
            shared.state.write().poisoned = Some(e.to_string());
        }
    }
    info!("flush worker exiting");
}

fn flush_job(shared: &Shared, job: FlushJob) -> Result<()> {
    if job.mem.is_empty() {
        let _ = std::fs::remove_file(&job.wal_seg_to_retire);
        return Ok(());
    }

    let file_id = sstable::next_file_id();
    let filename = format!("sstable_{file_id}.dat");
    let path = shared.sst_dir.join(&filename);
    sstable::SSTableWriter::write_from_memtable(&path, file_id, &job.mem)?;

    let (min_key, max_key) = key_bounds(&job.mem);
    let meta = SstMeta {
        file_id,
        filename: filename.clone(),
        level: 0,
        min_key,
        max_key,
    };

    let reader =
        sstable::SSTableReader::open_with_cache(&path, Some(Arc::clone(&shared.block_cache)))?;
    {
        let mut state = shared.state.write();
        state.manifest.append_add(&meta)?;
        state.version.ensure_level(1);
        state.version.levels[0].insert(0, Arc::new(crate::version::SstHandle { meta, reader }));
    }
    shared.epoch.fetch_add(1, Ordering::Release);

    let _ = std::fs::remove_file(&job.wal_seg_to_retire);

    let should_compact = {
        let state = shared.state.read();
        crate::compaction::needs_compaction(state.compaction_kind, &state.version, &state.tuning)
    };
    if should_compact {
        if let Some(tx) = shared.compaction_tx.lock().as_ref() {
            let _ = tx.send(());
        }
    }
    Ok(())
}

pub(crate) fn key_bounds(mem: &Memtable) -> (Vec<u8>, Vec<u8>) {
    let mut min_key: Option<Vec<u8>> = None;
    let mut max_key: Option<Vec<u8>> = None;
    for (key, _) in mem.iter() {
        if min_key.is_none() {
            min_key = Some(key.to_vec());
        }
        max_key = Some(key.to_vec());
    }
    (min_key.unwrap_or_default(), max_key.unwrap_or_default())
}

/// Synchronously flushes whatever is currently in the active Memtable.
/// Used on `Drop` so an in-memory write isn't lost if the process exits
/// before the background worker gets to it.
pub(crate) fn force_flush_sync(shared: &Arc<Shared>) -> Result<()> {
    let job = {
        let mut state = shared.state.write();
        if state.mem.is_empty() {
            return Ok(());
        }
        let old_wal_path = wal_segment_path(&shared.data_dir, state.wal_seg_id);
        let new_seg_id = state.wal_seg_id + 1;
        let new_wal_path = wal_segment_path(&shared.data_dir, new_seg_id);
        let new_writer = WalWriter::create(&new_wal_path, state.wal_sync)?;
        let old_mem = std::mem::replace(&mut state.mem, Memtable::new());
        state.wal_writer = new_writer;
        state.wal_seg_id = new_seg_id;
        FlushJob {
            mem: old_mem,
            wal_seg_to_retire: old_wal_path,
        }
    };
    flush_job(shared, job)
}
