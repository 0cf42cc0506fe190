use anyhow::{bail, Result};
use bloom::BloomFilter;
use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use memtable::ValueEntry;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::block_cache::{BlockCache, BlockKey};
use crate::format::{read_footer_versioned, Footer, FOOTER_BYTES_V1};

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during reads (10 MiB). Prevents OOM on corrupt files.
const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

/// Assigns the next `file_id` for a newly created SSTable. Shared process-wide
/// so every reader/writer pair agrees on a unique identifier for the block
/// cache key, regardless of which `Engine` instance created the file.
static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh, process-unique SSTable `file_id`.
pub fn next_file_id() -> u64 {
    NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reads a block-structured (v4) SSTable file for point lookups and scans.
///
/// On [`open`](SSTableReader::open) only the **sparse block index** and the
/// bloom filter are loaded into memory — a handful of bytes per block rather
/// than per key. Data blocks are paged in on demand through a shared
/// [`BlockCache`].
///
/// Older v1/v2/v3 files (full per-key index, no block structure) are still
/// readable for point lookups, since the engine may encounter them during a
/// rolling upgrade; `keys()`/`scan_all()` fall back to the flat-index path in
/// that case.
pub struct SSTableReader {
    /// Path to the `.sst` file on disk (kept for diagnostics).
    #[allow(dead_code)]
    path: PathBuf,
    /// Sparse block index: first key of each block -> block start offset
    /// (v4). Empty for legacy files, which use `flat_index` instead.
    block_index: BTreeMap<Vec<u8>, u64>,
    /// Legacy (pre-v4) full per-key index: key -> data offset.
    flat_index: BTreeMap<Vec<u8>, u64>,
    bloom: Option<BloomFilter>,
    file: Mutex<BufReader<File>>,
    footer: Footer,
    file_id: u64,
    block_cache: Option<Arc<BlockCache>>,
}

impl SSTableReader {
    /// Opens an SSTable file with no shared block cache (one-off reads only
    /// touch the index and bloom filter; each data read goes straight to
    /// disk). Prefer [`open_with_cache`](Self::open_with_cache) in the
    /// engine's hot path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_cache(path, None)
    }

    /// Opens an SSTable file, routing block reads through `cache` when given.
    pub fn open_with_cache<P: AsRef<Path>>(
        path: P,
        cache: Option<Arc<BlockCache>>,
    ) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        let mut f = File::open(&path_buf)?;
        let metadata = f.metadata()?;
        let filesize = metadata.len();

        if filesize < FOOTER_BYTES_V1 {
            bail!("sstable file too small");
        }

        let footer = read_footer_versioned(&mut f)?;
        let index_offset = footer.index_offset();

        if index_offset >= filesize {
            bail!("invalid index_offset");
        }
        let footer_size = footer.footer_size();

        let bloom = if let Some(bloom_offset) = footer.bloom_offset() {
            f.seek(SeekFrom::Start(bloom_offset))?;
            Some(BloomFilter::read_from(&mut f)?)
        } else {
            None
        };

        f.seek(SeekFrom::Start(index_offset))?;
        let mut block_index = BTreeMap::new();
        let mut flat_index = BTreeMap::new();

        while f.stream_position()? < (filesize - footer_size) {
            let key_len = f.read_u32::<LittleEndian>()? as usize;
            if key_len > MAX_KEY_BYTES {
                bail!(
                    "corrupt index: key_len {} exceeds maximum {}",
                    key_len,
                    MAX_KEY_BYTES
                );
            }
            let mut key = vec![0u8; key_len];
            f.read_exact(&mut key)?;
            let offset = f.read_u64::<LittleEndian>()?;
            if footer.is_block_structured() {
                block_index.insert(key, offset);
            } else {
                flat_index.insert(key, offset);
            }
        }

        f.seek(SeekFrom::Start(0))?;

        let file_id = footer.file_id().unwrap_or_else(next_file_id);

        Ok(Self {
            path: path_buf,
            block_index,
            flat_index,
            bloom,
            file: Mutex::new(BufReader::new(f)),
            footer,
            file_id,
            block_cache: cache,
        })
    }

    /// Point lookup for the newest version of `key` visible at `snapshot_seq`.
    ///
    /// Checks the bloom filter first; a negative result means the key is
    /// **definitely not** in this SSTable. Returns `Ok(Some(entry))` (which
    /// may be a tombstone) if a qualifying version exists, `Ok(None)`
    /// otherwise.
    pub fn get_at(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<ValueEntry>> {
        if let Some(ref bf) = self.bloom {
            if !bf.may_contain(key) {
                return Ok(None);
            }
        }

        if self.footer.is_block_structured() {
            self.get_at_block_structured(key, snapshot_seq)
        } else {
            self.get_at_legacy(key, snapshot_seq)
        }
    }

    /// Convenience wrapper for the newest version regardless of snapshot.
    pub fn get(&self, key: &[u8]) -> Result<Option<ValueEntry>> {
        self.get_at(key, u64::MAX)
    }

    fn get_at_block_structured(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<ValueEntry>> {
        let Some((block_offset, block_end)) = self.locate_block(key) else {
            return Ok(None);
        };
        let block = self.read_block(block_offset, block_end)?;
        Self::scan_block_for_key(&block, key, snapshot_seq)
    }

    /// Finds the block that would contain `key`: its start offset and the
    /// offset where it ends (the next block's start, or the bloom section
    /// for the last block).
    fn locate_block(&self, key: &[u8]) -> Option<(u64, u64)> {
        let mut range = self.block_index.range(..=key.to_vec());
        let (first_key, &offset) = range.next_back()?;
        let next_offset = self
            .block_index
            .range((
                std::ops::Bound::Excluded(first_key.clone()),
                std::ops::Bound::Unbounded,
            ))
            .next()
            .map(|(_, &o)| o)
            .unwrap_or_else(|| self.footer.bloom_offset().unwrap_or(offset));
        Some((offset, next_offset.max(offset)))
    }

    fn read_block(&self, block_offset: u64, block_end: u64) -> Result<Arc<Vec<u8>>> {
        let cache_key = BlockKey {
            file_id: self.file_id,
            block_offset,
        };
        if let Some(cache) = &self.block_cache {
            if let Some(hit) = cache.get(cache_key) {
                return Ok(hit);
            }
        }

        let len = (block_end - block_offset) as usize;
        let mut buf = vec![0u8; len];
        {
            let mut f = self.file.lock();
            f.seek(SeekFrom::Start(block_offset))?;
            f.read_exact(&mut buf)?;
        }
        let buf = Arc::new(buf);
        if let Some(cache) = &self.block_cache {
            cache.insert(cache_key, Arc::clone(&buf));
        }
        Ok(buf)
    }

    /// Scans a decoded block's records (sequential, CRC-checked) for the
    /// newest version of `key` with `seq <= snapshot_seq`. Blocks are never
    /// split mid-key, so once a record's key no longer matches and we've
    /// already seen at least one match, the search is over.
    fn scan_block_for_key(
        block: &[u8],
        key: &[u8],
        snapshot_seq: u64,
    ) -> Result<Option<ValueEntry>> {
        let mut cursor = Cursor::new(block);
        let mut seen_key = false;
        loop {
            if cursor.position() >= block.len() as u64 {
                break;
            }
            let (rec_key, entry) = match Self::read_record(&mut cursor)? {
                Some(v) => v,
                None => break,
            };
            if rec_key == key {
                seen_key = true;
                if entry.seq <= snapshot_seq {
                    return Ok(Some(entry));
                }
            } else if seen_key {
                break;
            } else if rec_key.as_slice() > key {
                break;
            }
        }
        Ok(None)
    }

    /// Reads one `[crc32][key_len][key][seq][present][val_len?][val]` record
    /// from `cursor`, verifying its CRC32. Returns `Ok(None)` at a clean EOF.
    fn read_record(cursor: &mut Cursor<&[u8]>) -> Result<Option<(Vec<u8>, ValueEntry)>> {
        if cursor.position() >= cursor.get_ref().len() as u64 {
            return Ok(None);
        }
        let stored_crc = cursor.read_u32::<LittleEndian>()?;
        let key_len = cursor.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            bail!("corrupt block: key_len {} exceeds maximum", key_len);
        }
        let mut key = vec![0u8; key_len];
        cursor.read_exact(&mut key)?;
        let seq = cursor.read_u64::<LittleEndian>()?;
        let present = cursor.read_u8()?;
        let value = if present == 1 {
            let val_len = cursor.read_u32::<LittleEndian>()? as usize;
            if val_len > MAX_VALUE_BYTES {
                bail!("corrupt block: val_len {} exceeds maximum", val_len);
            }
            let mut val = vec![0u8; val_len];
            cursor.read_exact(&mut val)?;
            Some(val)
        } else {
            None
        };

        let mut hasher = Crc32::new();
        hasher.update(&(key_len as u32).to_le_bytes());
        hasher.update(&key);
        hasher.update(&seq.to_le_bytes());
        hasher.update(&[present]);
        if let Some(ref v) = value {
            hasher.update(&(v.len() as u32).to_le_bytes());
            hasher.update(v);
        }
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            bail!(
                "CRC32 mismatch in data block: expected {:#010x}, got {:#010x} (data corruption)",
                stored_crc,
                actual_crc
            );
        }

        Ok(Some((key, ValueEntry { seq, value })))
    }

    fn get_at_legacy(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<ValueEntry>> {
        let offset = match self.flat_index.get(key) {
            Some(&o) => o,
            None => return Ok(None),
        };
        let has_crc = self.footer.has_checksums();

        let mut f = self.file.lock();
        f.seek(SeekFrom::Start(offset))?;

        let stored_crc = if has_crc {
            Some(f.read_u32::<LittleEndian>()?)
        } else {
            None
        };
        let key_len = f.read_u32::<LittleEndian>()? as usize;
        if key_len > MAX_KEY_BYTES {
            bail!("corrupt data: key_len {} exceeds maximum", key_len);
        }
        let mut key_buf = vec![0u8; key_len];
        f.read_exact(&mut key_buf)?;
        if key_buf.as_slice() != key {
            bail!("index pointed to mismatching key at offset");
        }
        let seq = f.read_u64::<LittleEndian>()?;
        let present = f.read_u8()?;
        let (value, val_bytes) = if present == 1 {
            let val_len = f.read_u32::<LittleEndian>()? as usize;
            if val_len > MAX_VALUE_BYTES {
                bail!("corrupt data: val_len {} exceeds maximum", val_len);
            }
            let mut val = vec![0u8; val_len];
            f.read_exact(&mut val)?;
            (Some(val.clone()), Some(val))
        } else {
            (None, None)
        };

        if let Some(expected_crc) = stored_crc {
            let mut hasher = Crc32::new();
            hasher.update(&(key_len as u32).to_le_bytes());
            hasher.update(&key_buf);
            hasher.update(&seq.to_le_bytes());
            hasher.update(&[present]);
            if let Some(ref vb) = val_bytes {
                hasher.update(&(vb.len() as u32).to_le_bytes());
                hasher.update(vb);
            }
            let actual_crc = hasher.finalize();
            if actual_crc != expected_crc {
                bail!(
                    "CRC32 mismatch at offset {}: expected {:#010x}, got {:#010x} (data corruption)",
                    offset, expected_crc, actual_crc
                );
            }
        }

        if seq <= snapshot_seq {
            Ok(Some(ValueEntry { seq, value }))
        } else {
            Ok(None)
        }
    }

    /// Returns `true` if this SSTable has a bloom filter loaded.
    #[must_use]
    pub fn has_bloom(&self) -> bool {
        self.bloom.is_some()
    }

    /// Returns the max sequence number stored in the footer (v3+).
    #[must_use]
    pub fn max_seq(&self) -> Option<u64> {
        self.footer.max_seq()
    }

    /// Returns `true` if this SSTable has per-record CRC32 checksums (v3+).
    #[must_use]
    pub fn has_checksums(&self) -> bool {
        self.footer.has_checksums()
    }

    /// This file's `file_id`, used as half of the block cache key.
    #[must_use]
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// Returns the number of blocks (v4) or keys (legacy) indexed in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.block_index.len() + self.flat_index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every first-key-of-block in ascending order (legacy files
    /// return every key, since they have no block structure).
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.block_index
            .keys()
            .chain(self.flat_index.keys())
            .map(|k| k.as_slice())
    }

    /// Reads every record in the file, in ascending `(user_key, -seq)` order.
    ///
    /// Used by compaction to build a full merge input from this file.
    pub fn scan_all(&self) -> Result<Vec<(Vec<u8>, ValueEntry)>> {
        let mut f = self.file.lock();
        let mut out = Vec::new();

        if self.footer.is_block_structured() {
            let offsets: Vec<u64> = self.block_index.values().copied().collect();
            let bloom_offset = self.footer.bloom_offset().unwrap_or(u64::MAX);
            for (i, &start) in offsets.iter().enumerate() {
                let end = offsets.get(i + 1).copied().unwrap_or(bloom_offset);
                let len = (end - start) as usize;
                let mut buf = vec![0u8; len];
                f.seek(SeekFrom::Start(start))?;
                f.read_exact(&mut buf)?;
                let mut cursor = Cursor::new(buf.as_slice());
                while let Some((key, entry)) = Self::read_record(&mut cursor)? {
                    out.push((key, entry));
                }
            }
        } else {
            for (key, &offset) in &self.flat_index {
                f.seek(SeekFrom::Start(offset))?;
                let has_crc = self.footer.has_checksums();
                let stored_crc = if has_crc {
                    Some(f.read_u32::<LittleEndian>()?)
                } else {
                    None
                };
                let key_len = f.read_u32::<LittleEndian>()? as usize;
                let mut key_buf = vec![0u8; key_len];
                f.read_exact(&mut key_buf)?;
                let seq = f.read_u64::<LittleEndian>()?;
                let present = f.read_u8()?;
                let value = if present == 1 {
                    let val_len = f.read_u32::<LittleEndian>()? as usize;
                    let mut val = vec![0u8; val_len];
                    f.read_exact(&mut val)?;
                    Some(val)
                } else {
                    None
                };
                let _ = stored_crc;
                out.push((key.clone(), ValueEntry { seq, value }));
            }
        }

        Ok(out)
    }
}
