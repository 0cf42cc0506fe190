use crate::{CompactionKind, Engine, EngineOptions};
use std::time::{Duration, Instant};

/// Opens a fresh engine in a throwaway directory with a small flush
/// threshold, so a handful of test writes reliably cross it.
pub(crate) fn small_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = EngineOptions::default();
    opts.flush_threshold = 32;
    opts.compaction_kind = CompactionKind::Leveled;
    let engine = Engine::open(dir.path(), opts).unwrap();
    (dir, engine)
}

/// Polls `cond` until it returns `true` or `timeout` elapses, for asserting
/// on work done by the background flush/compaction workers.
pub(crate) fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if cond() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
