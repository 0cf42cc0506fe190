use anyhow::Result;
use bloom::BloomFilter;
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::{Memtable, ValueEntry};
use std::fs::{rename, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use crate::format::write_footer_v4;

/// Default bloom filter false positive rate (1%).
const BLOOM_FPR: f64 = 0.01;

/// Target size, in bytes, of one DATA block before it is closed and a new
/// one started. A block is only ever closed on a user_key boundary — it may
/// run past this target to finish writing every version of the key in
/// progress, so the on-disk size is "at least" rather than "exactly" this.
pub const BLOCK_SIZE_TARGET: usize = 4096;

/// Writes a [`Memtable`] (or an arbitrary sorted entry stream) to disk as an
/// immutable, block-structured SSTable file.
///
/// The writer is stateless — all work happens inside the static methods
/// below. The write is crash-safe: data is first written to a temporary
/// file, fsynced, and then atomically renamed to the final path.
pub struct SSTableWriter {}

impl SSTableWriter {
    /// Flushes `mem` to a new SSTable file at `path` under `file_id`.
    pub fn write_from_memtable(path: &Path, file_id: u64, mem: &Memtable) -> Result<()> {
        if mem.is_empty() {
            anyhow::bail!("refusing to write an empty SSTable (empty memtable)");
        }
        let iter = mem.iter().map(|(k, v)| (k.to_vec(), v));
        Self::write_internal(path, file_id, mem.len(), iter)
    }

    /// Writes an SSTable from an iterator of `(key, ValueEntry)` pairs.
    ///
    /// This is the **streaming compaction** entry point. Unlike
    /// [`write_from_memtable`](SSTableWriter::write_from_memtable), this
    /// method does not require the entire dataset to be materialized in a
    /// `Memtable`. Entries are consumed one at a time and written directly to
    /// disk, keeping memory proportional to the bloom filter + block index
    /// (not the data).
    ///
    /// # Arguments
    ///
    /// * `path` – destination `.sst` file path.
    /// * `file_id` – monotonically increasing id assigned by the version set.
    /// * `expected_count` – estimated number of entries (sizes the bloom
    ///   filter). Over-estimating is safe; under-estimating raises the FPR.
    /// * `iter` – entries in **InternalKey order** (ascending user_key, then
    ///   descending seq). The caller is responsible for any deduplication.
    pub fn write_from_iterator<I>(
        path: &Path,
        file_id: u64,
        expected_count: usize,
        iter: I,
    ) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        Self::write_internal(path, file_id, expected_count.max(1), iter)
    }

    fn write_internal<I>(path: &Path, file_id: u64, expected_count: usize, iter: I) -> Result<()>
    where
        I: Iterator<Item = (Vec<u8>, ValueEntry)>,
    {
        let tmp_path = path.with_extension("sst.tmp");
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut file = BufWriter::new(raw_file);

        let mut bloom = BloomFilter::new(expected_count.max(1), BLOOM_FPR);
        // Sparse block index: one (first_key, block_offset) pair per block.
        let mut block_index: Vec<(Vec<u8>, u64)> = Vec::new();
        let mut max_seq: u64 = 0;
        let mut total_entries: usize = 0;

        let mut block_buf: Vec<u8> = Vec::with_capacity(BLOCK_SIZE_TARGET + 256);
        let mut block_first_key: Option<Vec<u8>> = None;
        let mut last_key: Option<Vec<u8>> = None;
        let mut record_buf: Vec<u8> = Vec::with_capacity(256);

        macro_rules! flush_block {
            () => {
                if !block_buf.is_empty() {
                    let offset = file.stream_position()?;
                    file.write_all(&block_buf)?;
                    block_index.push((block_first_key.take().unwrap(), offset));
                    block_buf.clear();
                }
            };
        }

        for (key, entry) in iter {
            max_seq = max_seq.max(entry.seq);
            total_entries += 1;

            // Only close a block on a user_key boundary, so every version of
            // a key always lives in exactly one block.
            let is_new_key = last_key.as_deref() != Some(key.as_slice());
            if is_new_key && block_buf.len() >= BLOCK_SIZE_TARGET {
                flush_block!();
            }
            if block_first_key.is_none() {
                block_first_key = Some(key.clone());
            }

            record_buf.clear();
            record_buf.write_u32::<LittleEndian>(key.len() as u32)?;
            record_buf.extend_from_slice(&key);
            record_buf.write_u64::<LittleEndian>(entry.seq)?;
            match &entry.value {
                Some(v) => {
                    record_buf.write_u8(1)?;
                    record_buf.write_u32::<LittleEndian>(v.len() as u32)?;
                    record_buf.extend_from_slice(v);
                }
                None => {
                    record_buf.write_u8(0)?;
                }
            }

            let mut hasher = Crc32::new();
            hasher.update(&record_buf);
            let crc = hasher.finalize();

            block_buf.write_u32::<LittleEndian>(crc)?;
            block_buf.extend_from_slice(&record_buf);

            bloom.insert(&key);
            last_key = Some(key);
        }
        flush_block!();

        if block_index.is_empty() {
            drop(file);
            let _ = std::fs::remove_file(&tmp_path);
            anyhow::bail!("refusing to write an empty SSTable (no entries)");
        }

        let bloom_offset = file.stream_position()?;
        bloom.write_to(&mut file)?;

        let block_index_offset = file.stream_position()?;
        for (key, offset) in &block_index {
            file.write_u32::<LittleEndian>(key.len() as u32)?;
            file.write_all(key)?;
            file.write_u64::<LittleEndian>(*offset)?;
        }

        write_footer_v4(&mut file, file_id, max_seq, bloom_offset, block_index_offset)?;

        file.flush()?;
        file.into_inner()?.sync_all()?;

        rename(&tmp_path, path)?;

        // Fsync the parent directory to ensure the rename is durable.
        // On NTFS this is a no-op (metadata is journaled), but on ext4/XFS
        // a crash after rename but before dir sync can lose the entry.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        let _ = total_entries;
        Ok(())
    }
}
