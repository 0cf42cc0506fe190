//! # Engine - RiptideKV Storage Engine
//!
//! The central orchestrator tying [`memtable`], [`wal`], and [`sstable`]
//! together into a multi-level LSM-tree key-value store with snapshot reads,
//! concurrent iterators, and a pluggable compaction strategy.
//!
//! ## Architecture
//!
//! The engine is an "actor": it owns its MemTable, version set, and
//! background worker threads exclusively behind an `Arc<Shared>`. Readers
//! take a shared lock over `State`; the write path and the background
//! workers take an exclusive lock only for the brief metadata mutation
//! (memtable swap, version-set install) — the expensive I/O (SST write,
//! merge) happens outside the lock.
//!
//! ```text
//! put/del -> WAL append -> Memtable insert -> (threshold?) rotate WAL,
//!            hand sealed Memtable to the flush worker over a channel
//!
//! flush worker -> write SST -> MANIFEST ADD -> install into L0 -> maybe
//!                 wake the compaction worker
//!
//! compaction worker -> strategy.pick_compaction -> merge inputs ->
//!                       MANIFEST ADD/DEL -> install -> delete old files
//!
//! get/get_at/scan/new_iterator -> Memtable + every overlapping SST,
//!                                 newest source wins
//! ```
//!
//! ## Module responsibilities
//!
//! | Module | Purpose |
//! |---|---|
//! | [`version`] | `SstMeta`/`Version`: in-memory level membership |
//! | [`manifest`] | Append-only `ADD`/`DEL` wire log, replay |
//! | [`snapshot`] | Pinned-seq tracking, GC floor |
//! | [`compaction`] | Strategy kinds, task selection (pure functions) |
//! | [`iterator`] | Epoch-invalidated concurrent iterator |
//! | [`recovery`] | WAL segment replay, version bootstrap |
//! | [`write`] | `put`/`del`, WAL rotation, flush handoff |
//! | [`read`] | `get`/`get_at`/`scan`/`new_iterator` |
//! | [`error`] | Public `EngineError` shape |

mod compaction;
mod error;
mod iterator;
mod manifest;
mod read;
mod recovery;
mod snapshot;
mod version;
mod write;

pub use compaction::{CompactionKind, CompactionTuning};
pub use error::EngineError;
pub use iterator::ConcurrentIterator;

use anyhow::Result;
use crossbeam_channel::Sender;
use manifest::Manifest;
use memtable::Memtable;
use parking_lot::{Mutex, RwLock};
use snapshot::SnapshotManager;
use sstable::BlockCache;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;
use version::Version;
use wal::WalWriter;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Tunables threaded in from `config::RiptideConfig`; see [`EngineOptions::default`]
/// for the values the teacher's single-level engine used as a baseline.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub flush_threshold: usize,
    pub wal_sync: bool,
    pub compaction_kind: CompactionKind,
    pub tuning: compaction::CompactionTuning,
    pub block_cache_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            flush_threshold: 4 * 1024 * 1024,
            wal_sync: true,
            compaction_kind: CompactionKind::Leveled,
            tuning: compaction::CompactionTuning::default(),
            block_cache_capacity: 1024,
        }
    }
}

pub(crate) struct State {
    pub(crate) mem: Memtable,
    pub(crate) wal_writer: WalWriter,
    pub(crate) wal_seg_id: u64,
    pub(crate) version: Version,
    pub(crate) manifest: Manifest,
    pub(crate) compaction_kind: CompactionKind,
    pub(crate) tuning: compaction::CompactionTuning,
    pub(crate) flush_threshold: usize,
    pub(crate) wal_sync: bool,
    pub(crate) poisoned: Option<String>,
}

pub(crate) struct FlushJob {
    pub(crate) mem: Memtable,
    pub(crate) wal_seg_to_retire: PathBuf,
}

pub(crate) struct Shared {
    pub(crate) data_dir: PathBuf,
    pub(crate) sst_dir: PathBuf,
    pub(crate) state: RwLock<State>,
    pub(crate) seq: AtomicU64,
    pub(crate) epoch: Arc<AtomicU64>,
    pub(crate) snapshots: Mutex<SnapshotManager>,
    pub(crate) block_cache: Arc<BlockCache>,
    pub(crate) flush_tx: Mutex<Option<Sender<FlushJob>>>,
    pub(crate) compaction_tx: Mutex<Option<Sender<()>>>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
}

/// A RiptideKV storage engine instance, open over one data directory.
///
/// Cheap to clone: internally an `Arc<Shared>`, so handing a second `Engine`
/// handle to a background task (or to `cli`'s REPL loop) shares the same
/// underlying state rather than opening the directory twice.
#[derive(Clone)]
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Engine")
            .field("seq", &self.shared.seq.load(Ordering::Relaxed))
            .field("flush_threshold", &state.flush_threshold)
            .field("data_dir", &self.shared.data_dir)
            .field("memtable_entries", &state.mem.len())
            .field("level_counts", &state.version.levels.iter().map(|l| l.len()).collect::<Vec<_>>())
            .field("compaction_kind", &state.compaction_kind)
            .field("poisoned", &state.poisoned)
            .finish()
    }
}

impl Engine {
    /// Opens (or creates) an engine rooted at `data_dir`, replaying the WAL
    /// segments and MANIFEST found there, then spawns the background flush
    /// and compaction workers.
    pub fn open<P: AsRef<Path>>(data_dir: P, opts: EngineOptions) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let sst_dir = data_dir.clone();
        std::fs::create_dir_all(&sst_dir)?;
        recovery::cleanup_tmp_files(&sst_dir);

        let block_cache = Arc::new(BlockCache::new(opts.block_cache_capacity));
        let recovered = recovery::recover(&data_dir, &sst_dir, &block_cache, opts.wal_sync)?;

        let state = State {
            mem: recovered.mem,
            wal_writer: recovered.wal_writer,
            wal_seg_id: recovered.next_wal_seg,
            version: recovered.version,
            manifest: recovered.manifest,
            compaction_kind: opts.compaction_kind,
            tuning: opts.tuning,
            flush_threshold: opts.flush_threshold,
            wal_sync: opts.wal_sync,
            poisoned: None,
        };

        let shared = Arc::new(Shared {
            data_dir,
            sst_dir,
            state: RwLock::new(state),
            seq: AtomicU64::new(recovered.max_seq),
            epoch: Arc::new(AtomicU64::new(0)),
            snapshots: Mutex::new(SnapshotManager::new()),
            block_cache,
            flush_tx: Mutex::new(None),
            compaction_tx: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        });

        let (flush_tx, flush_rx) = crossbeam_channel::unbounded::<FlushJob>();
        let (compaction_tx, compaction_rx) = crossbeam_channel::unbounded::<()>();
        *shared.flush_tx.lock() = Some(flush_tx);
        *shared.compaction_tx.lock() = Some(compaction_tx);

        let flush_shared = Arc::clone(&shared);
        let flush_handle = std::thread::Builder::new()
            .name("riptide-flush".into())
            .spawn(move || write::run_flush_worker(flush_shared, flush_rx))?;

        let compaction_shared = Arc::clone(&shared);
        let compaction_handle = std::thread::Builder::new()
            .name("riptide-compaction".into())
            .spawn(move || compaction_worker_loop(compaction_shared, compaction_rx))?;

        shared.workers.lock().push(flush_handle);
        shared.workers.lock().push(compaction_handle);

        info!(data_dir = %shared.data_dir.display(), "engine opened");
        Ok(Self { shared })
    }

    #[must_use]
    pub fn seq(&self) -> u64 {
        self.shared.seq.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.shared.state.read().poisoned.is_some()
    }

    pub fn set_compaction_strategy(&self, kind: CompactionKind) {
        self.shared.state.write().compaction_kind = kind;
    }

    #[must_use]
    pub fn compaction_strategy(&self) -> CompactionKind {
        self.shared.state.read().compaction_kind
    }

    /// Number of SSTables at each level, `levels()[0]` is `L0`.
    #[must_use]
    pub fn level_counts(&self) -> Vec<usize> {
        self.shared
            .state
            .read()
            .version
            .levels
            .iter()
            .map(|l| l.len())
            .collect()
    }

    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.shared.state.read().mem.approx_size()
    }

    /// Synchronously seals the active Memtable and writes it to an SSTable,
    /// without waiting for the flush threshold. Used by the CLI's `FLUSH`
    /// command; the background flush worker still does this automatically
    /// once the threshold is crossed.
    pub fn flush(&self) -> Result<(), EngineError> {
        write::force_flush_sync(&self.shared).map_err(|e| EngineError::Retry(e.to_string()))
    }

    /// Synchronously runs whatever compaction the current strategy picks,
    /// on the calling thread, repeating until nothing more is pending.
    /// Used by the CLI's `COMPACT` command; the background compaction
    /// worker runs the same logic automatically after a flush.
    pub fn compact(&self) {
        compaction::run_pending_compactions(&self.shared);
    }

    /// Blocking shutdown: stops accepting new background work and joins the
    /// worker threads. Called automatically on `Drop`, but exposed so the
    /// `cli` can shut down deterministically before process exit.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.flush_tx.lock().take();
        self.shared.compaction_tx.lock().take();
        let mut workers = self.shared.workers.lock();
        for h in workers.drain(..) {
            let _ = h.join();
        }
    }
}

fn compaction_worker_loop(shared: Arc<Shared>, rx: crossbeam_channel::Receiver<()>) {
    for _ in rx.iter() {
        compaction::run_pending_compactions(&shared);
    }
}

/// Best-effort flush on drop: anything still sitting in the active memtable
/// when the last handle is dropped is flushed synchronously so it isn't
/// silently lost if the process exits before the background worker would
/// have picked it up. Errors are swallowed — the WAL still has the data and
/// will replay it on the next open.
impl Drop for Engine {
    fn drop(&mut self) {
        if Arc::strong_count(&self.shared) == 1 {
            let _ = write::force_flush_sync(&self.shared);
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests;
