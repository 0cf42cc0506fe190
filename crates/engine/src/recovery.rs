//! Cold-start recovery: replay WAL segments, bootstrap the `Version` from
//! the MANIFEST, and reconcile the two.
//!
//! `<data>/wal-<n>.log` segments are replayed oldest to newest into one
//! Memtable. If that Memtable ends up non-empty (the process crashed after
//! rotating a segment but before the flush worker finished), it is flushed
//! synchronously right here — before the old segments are deleted — so a
//! second crash immediately after open can't lose data that recovery itself
//! already claimed to have durably captured.

use crate::manifest::{Manifest, ManifestRecord};
use crate::version::{SstHandle, SstMeta, Version};
use crate::write::{key_bounds, wal_segment_path};
use anyhow::Result;
use memtable::Memtable;
use sstable::{BlockCache, SSTableReader};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use wal::{WalReader, WalRecord, WalWriter};

pub(crate) struct Recovered {
    pub(crate) mem: Memtable,
    pub(crate) wal_writer: WalWriter,
    pub(crate) next_wal_seg: u64,
    pub(crate) version: Version,
    pub(crate) manifest: Manifest,
    pub(crate) max_seq: u64,
}

/// Replays a single WAL segment into `mem`, returning the highest seq seen.
/// A missing file is treated as an empty segment (`Ok(0)`).
pub(crate) fn replay_wal_and_build<P: AsRef<Path>>(path: P, mem: &mut Memtable) -> Result<u64> {
    match WalReader::open(path.as_ref()) {
        Ok(mut reader) => {
            let mut max_seq = 0u64;
            reader.replay(|r| match r {
                WalRecord::Put { seq, key, value } => {
                    mem.put(key, value, seq);
                    max_seq = max_seq.max(seq);
                }
                WalRecord::Del { seq, key } => {
                    mem.delete(key, seq);
                    max_seq = max_seq.max(seq);
                }
            })?;
            Ok(max_seq)
        }
        Err(e) => {
            if matches!(e, wal::WalError::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
            {
                Ok(0)
            } else {
                Err(anyhow::anyhow!(e).context("failed to open wal segment for replay"))
            }
        }
    }
}

/// Deletes leftover `.sst.tmp` files from an SSTable write interrupted by a
/// crash between the temp-file write and the atomic rename.
pub(crate) fn cleanup_tmp_files(sst_dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(sst_dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                if name.ends_with(".sst.tmp") {
                    let _ = std::fs::remove_file(&p);
                }
            }
        }
    }
}

pub(crate) fn recover(
    data_dir: &Path,
    sst_dir: &Path,
    block_cache: &Arc<BlockCache>,
    wal_sync: bool,
) -> Result<Recovered> {
    let mut manifest = Manifest::open_or_create(sst_dir)?;
    let mut version = load_version(sst_dir, &manifest.records, block_cache)?;

    let segments = list_wal_segments(data_dir)?;
    let mut mem = Memtable::new();
    let mut max_seq = 0u64;
    for (_, path) in &segments {
        max_seq = max_seq.max(replay_wal_and_build(path, &mut mem)?);
    }
    let next_seg_id = segments.last().map(|(id, _)| id + 1).unwrap_or(0);

    if !mem.is_empty() {
        let file_id = sstable::next_file_id();
        let filename = format!("sstable_{file_id}.dat");
        let path = sst_dir.join(&filename);
        sstable::SSTableWriter::write_from_memtable(&path, file_id, &mem)?;

        let (min_key, max_key) = key_bounds(&mem);
        let meta = SstMeta {
            file_id,
            filename: filename.clone(),
            level: 0,
            min_key,
            max_key,
        };
        manifest.append_add(&meta)?;

        let reader = SSTableReader::open_with_cache(&path, Some(Arc::clone(block_cache)))?;
        version.ensure_level(1);
        version.levels[0].insert(0, Arc::new(SstHandle { meta, reader }));
        mem = Memtable::new();
    }

    for (_, path) in &segments {
        let _ = std::fs::remove_file(path);
    }

    let wal_path = wal_segment_path(data_dir, next_seg_id);
    let wal_writer = WalWriter::create(&wal_path, wal_sync)?;

    Ok(Recovered {
        mem,
        wal_writer,
        next_wal_seg: next_seg_id + 1,
        version,
        manifest,
        max_seq,
    })
}

/// Folds MANIFEST records into current membership (later record wins for a
/// given filename), then opens a reader for each surviving file. An `ADD`
/// whose file is missing from disk is dropped with a warning rather than
/// failing recovery outright.
fn load_version(
    sst_dir: &Path,
    records: &[ManifestRecord],
    block_cache: &Arc<BlockCache>,
) -> Result<Version> {
    let mut live: BTreeMap<String, SstMeta> = BTreeMap::new();
    for record in records {
        match record {
            ManifestRecord::Add(meta) => {
                live.insert(meta.filename.clone(), meta.clone());
            }
            ManifestRecord::Del { filename, .. } => {
                live.remove(filename);
            }
        }
    }

    let mut version = Version::new(1);
    for meta in live.into_values() {
        let path = sst_dir.join(&meta.filename);
        if !path.exists() {
            warn!(file = %meta.filename, "manifest references missing sstable file, dropping");
            continue;
        }
        let reader = SSTableReader::open_with_cache(&path, Some(Arc::clone(block_cache)))?;
        version.ensure_level(meta.level);
        version.levels[meta.level].push(Arc::new(SstHandle { meta, reader }));
    }
    Ok(version)
}

fn list_wal_segments(data_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut segs = Vec::new();
    if data_dir.exists() {
        for entry in std::fs::read_dir(data_dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if let Some(rest) = name.strip_prefix("wal-").and_then(|r| r.strip_suffix(".log")) {
                    if let Ok(id) = rest.parse::<u64>() {
                        segs.push((id, path));
                    }
                }
            }
        }
    }
    segs.sort_by_key(|(id, _)| *id);
    Ok(segs)
}
