//! Per-level SSTable membership: the in-memory mirror of the MANIFEST.
//!
//! `L0` files may overlap in key range; `fileId` (monotonic, assigned at
//! creation) breaks ties when two L0 files both contain a key — the higher
//! `fileId` is newer and wins. From `L1` up (under the leveled strategy)
//! files are kept non-overlapping and sorted by `min_key`.

use sstable::SSTableReader;
use std::sync::Arc;

/// Static metadata for one SSTable file, as recorded in the MANIFEST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstMeta {
    pub file_id: u64,
    pub filename: String,
    pub level: usize,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

impl SstMeta {
    pub fn overlaps(&self, lo: &[u8], hi: &[u8]) -> bool {
        let lo_ok = hi.is_empty() || self.min_key.as_slice() < hi;
        let hi_ok = lo.is_empty() || self.max_key.as_slice() >= lo;
        lo_ok && hi_ok
    }

    pub fn key_ranges_overlap(&self, other: &SstMeta) -> bool {
        self.min_key <= other.max_key && other.min_key <= self.max_key
    }
}

/// An open SSTable paired with the metadata that describes it.
pub struct SstHandle {
    pub meta: SstMeta,
    pub reader: SSTableReader,
}

/// The live set of SSTables, grouped by level. `levels[0]` is `L0`.
///
/// Kept separate from [`SstHandle`] construction (which requires opening a
/// file) so the pure metadata can be manipulated — e.g. by the compaction
/// strategies in [`crate::compaction`] — without touching the filesystem.
#[derive(Default)]
pub struct Version {
    pub levels: Vec<Vec<Arc<SstHandle>>>,
}

impl Version {
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: (0..num_levels).map(|_| Vec::new()).collect(),
        }
    }

    pub fn ensure_level(&mut self, level: usize) {
        while self.levels.len() <= level {
            self.levels.push(Vec::new());
        }
    }

    pub fn metas(&self) -> Vec<SstMeta> {
        self.levels
            .iter()
            .flat_map(|l| l.iter().map(|h| h.meta.clone()))
            .collect()
    }

    /// Every SSTable overlapping `[lo, hi)` across all levels, L0 first
    /// (newest `file_id` first within L0), then `L1..`.
    pub fn overlapping(&self, lo: &[u8], hi: &[u8]) -> Vec<Arc<SstHandle>> {
        let mut out = Vec::new();
        for (level, files) in self.levels.iter().enumerate() {
            let mut matched: Vec<Arc<SstHandle>> = files
                .iter()
                .filter(|h| h.meta.overlaps(lo, hi))
                .cloned()
                .collect();
            if level == 0 {
                matched.sort_by(|a, b| b.meta.file_id.cmp(&a.meta.file_id));
            } else {
                matched.sort_by(|a, b| a.meta.min_key.cmp(&b.meta.min_key));
            }
            out.extend(matched);
        }
        out
    }

    /// Every SSTable whose `[min_key, max_key]` could contain `key`, ordered
    /// newest-first the same way [`Version::overlapping`] is: L0 by
    /// descending `file_id`, then `L1..` by ascending `min_key`.
    pub fn containing(&self, key: &[u8]) -> Vec<Arc<SstHandle>> {
        let mut out = Vec::new();
        for (level, files) in self.levels.iter().enumerate() {
            let mut matched: Vec<Arc<SstHandle>> = files
                .iter()
                .filter(|h| h.meta.min_key.as_slice() <= key && key <= h.meta.max_key.as_slice())
                .cloned()
                .collect();
            if level == 0 {
                matched.sort_by(|a, b| b.meta.file_id.cmp(&a.meta.file_id));
            } else {
                matched.sort_by(|a, b| a.meta.min_key.cmp(&b.meta.min_key));
            }
            out.extend(matched);
        }
        out
    }

    pub fn total_bytes(&self, level: usize) -> u64 {
        self.levels
            .get(level)
            .map(|files| {
                files
                    .iter()
                    .map(|h| h.reader_len_bytes())
                    .sum()
            })
            .unwrap_or(0)
    }

    pub fn file_count(&self, level: usize) -> usize {
        self.levels.get(level).map(|l| l.len()).unwrap_or(0)
    }
}

impl SstHandle {
    /// Approximate on-disk size, used for level-score accounting. We don't
    /// keep a separate byte-size field in the metadata (recomputing it from
    /// the filesystem would race with compaction deleting the file), so this
    /// is a cheap proxy based on indexed block count.
    fn reader_len_bytes(&self) -> u64 {
        (self.reader.len() as u64) * sstable::BLOCK_SIZE_TARGET as u64
    }
}
