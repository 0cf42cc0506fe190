use crate::*;
use anyhow::Result;
use memtable::Memtable;
use tempfile::tempdir;

/// Writes a memtable to an SSTable, reopens it, and returns the full
/// scanned contents in `InternalKey` order — a convenient merge source.
fn write_and_scan(
    dir: &std::path::Path,
    name: &str,
    file_id: u64,
    entries: &[(&[u8], Option<&[u8]>, u64)],
) -> Result<Vec<(Vec<u8>, memtable::ValueEntry)>> {
    let path = dir.join(name);
    let mut mem = Memtable::new();
    for &(key, val, seq) in entries {
        match val {
            Some(v) => mem.put(key.to_vec(), v.to_vec(), seq),
            None => mem.delete(key.to_vec(), seq),
        }
    }
    SSTableWriter::write_from_memtable(&path, file_id, &mem)?;
    let reader = SSTableReader::open(&path)?;
    reader.scan_all()
}

#[test]
fn merge_single_source() -> Result<()> {
    let dir = tempdir()?;
    let a = write_and_scan(
        dir.path(),
        "a.sst",
        1,
        &[
            (b"a", Some(b"1"), 1),
            (b"b", Some(b"2"), 2),
            (b"c", Some(b"3"), 3),
        ],
    )?;

    let mut iter = MergeIterator::new(vec![a]);
    let result = iter.collect_all();

    assert_eq!(result.len(), 3);
    assert_eq!(result[0].0, b"a");
    assert_eq!(result[1].0, b"b");
    assert_eq!(result[2].0, b"c");
    Ok(())
}

#[test]
fn merge_two_non_overlapping_sources() -> Result<()> {
    let dir = tempdir()?;
    let a = write_and_scan(
        dir.path(),
        "a.sst",
        1,
        &[(b"a", Some(b"1"), 1), (b"b", Some(b"2"), 2)],
    )?;
    let b = write_and_scan(
        dir.path(),
        "b.sst",
        2,
        &[(b"c", Some(b"3"), 3), (b"d", Some(b"4"), 4)],
    )?;

    let mut iter = MergeIterator::new(vec![a, b]);
    let result = iter.collect_all();

    assert_eq!(result.len(), 4);
    let keys: Vec<&[u8]> = result.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"a", b"b", b"c", b"d"]);
    Ok(())
}

#[test]
fn merge_many_keys_across_sources_preserves_overlap_versions() -> Result<()> {
    let dir = tempdir()?;

    let a_entries: Vec<(Vec<u8>, Option<Vec<u8>>, u64)> = (0..100u64)
        .map(|i| (format!("key{:04}", i).into_bytes(), Some(b"v1".to_vec()), i))
        .collect();
    let a_refs: Vec<(&[u8], Option<&[u8]>, u64)> = a_entries
        .iter()
        .map(|(k, v, s)| (k.as_slice(), v.as_deref(), *s))
        .collect();
    let a = write_and_scan(dir.path(), "1.sst", 1, &a_refs)?;

    let b_entries: Vec<(Vec<u8>, Option<Vec<u8>>, u64)> = (50..150u64)
        .map(|i| {
            (
                format!("key{:04}", i).into_bytes(),
                Some(b"v2".to_vec()),
                i + 100,
            )
        })
        .collect();
    let b_refs: Vec<(&[u8], Option<&[u8]>, u64)> = b_entries
        .iter()
        .map(|(k, v, s)| (k.as_slice(), v.as_deref(), *s))
        .collect();
    let b = write_and_scan(dir.path(), "2.sst", 2, &b_refs)?;

    let mut iter = MergeIterator::new(vec![a, b]);
    let result = iter.collect_all();

    // 100 + 100 = 200 total versions: no dedup, keys 50..100 appear twice
    assert_eq!(result.len(), 200);

    let keys: Vec<&[u8]> = result.iter().map(|(k, _)| k.as_slice()).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted, "global order must be ascending by user_key");

    Ok(())
}

#[test]
fn merge_three_sources_with_overlap_keeps_every_version_newest_first() -> Result<()> {
    let dir = tempdir()?;
    let a = write_and_scan(
        dir.path(),
        "1.sst",
        1,
        &[(b"a", Some(b"v1"), 1), (b"c", Some(b"v1"), 1)],
    )?;
    let b = write_and_scan(
        dir.path(),
        "2.sst",
        2,
        &[(b"b", Some(b"v2"), 2), (b"c", Some(b"v2"), 2)],
    )?;
    let c = write_and_scan(
        dir.path(),
        "3.sst",
        3,
        &[(b"c", Some(b"v3"), 3), (b"d", Some(b"v3"), 3)],
    )?;

    let mut iter = MergeIterator::new(vec![a, b, c]);
    let result = iter.collect_all();

    // a, b, c(v3), c(v2), c(v1), d -- 6 entries, no collapsing
    assert_eq!(result.len(), 6);
    let c_versions: Vec<u64> = result
        .iter()
        .filter(|(k, _)| k == b"c")
        .map(|(_, e)| e.seq)
        .collect();
    assert_eq!(c_versions, vec![3, 2, 1], "versions of c appear newest-first");

    Ok(())
}

#[test]
fn merge_no_sources_is_empty() {
    let mut iter = MergeIterator::new(vec![]);
    assert!(iter.collect_all().is_empty());
}

#[test]
fn merge_then_drop_obsolete_collapses_to_visible_snapshot() -> Result<()> {
    let dir = tempdir()?;
    let old = write_and_scan(dir.path(), "old.sst", 1, &[(b"key", Some(b"old_value"), 1)])?;
    let new = write_and_scan(dir.path(), "new.sst", 2, &[(b"key", Some(b"new_value"), 5)])?;

    let merged = MergeIterator::new(vec![old, new]).collect_all();
    assert_eq!(merged.len(), 2, "merge itself keeps both versions");

    let collapsed = drop_obsolete_versions(merged, 0, true);
    assert_eq!(collapsed.len(), 1, "gc with no active readers below seq 5 drops the old version");
    assert_eq!(collapsed[0].1.seq, 5);
    assert_eq!(collapsed[0].1.value, Some(b"new_value".to_vec()));

    Ok(())
}

#[test]
fn merge_then_drop_obsolete_respects_bottommost_tombstone_rule() -> Result<()> {
    let dir = tempdir()?;
    let old = write_and_scan(dir.path(), "old.sst", 1, &[(b"key", Some(b"alive"), 1)])?;
    let new = write_and_scan(dir.path(), "new.sst", 2, &[(b"key", None, 5)])?;

    let merged = MergeIterator::new(vec![old, new]).collect_all();
    assert_eq!(merged.len(), 2);

    // not bottommost: tombstone must survive to shadow the lower level
    let kept = drop_obsolete_versions(merged.clone(), 10, false);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].1.value, None);

    // bottommost: nothing left to shadow, tombstone can finally go
    let kept_bottommost = drop_obsolete_versions(merged, 10, true);
    assert!(kept_bottommost.is_empty());

    Ok(())
}
