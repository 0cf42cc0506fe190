use super::helpers::{small_engine, wait_until};
use std::time::Duration;

#[test]
fn scan_returns_live_keys_in_ascending_order() {
    let (_dir, engine) = small_engine();
    engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.put(b"c".to_vec(), b"3".to_vec()).unwrap();

    let entries = engine.scan(b"", b"").unwrap();
    assert_eq!(
        entries,
        vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
}

#[test]
fn scan_respects_bounds() {
    let (_dir, engine) = small_engine();
    for k in ["a", "b", "c", "d"] {
        engine.put(k.as_bytes().to_vec(), b"v".to_vec()).unwrap();
    }
    let entries = engine.scan(b"b", b"d").unwrap();
    let keys: Vec<Vec<u8>> = entries.into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
}

#[test]
fn scan_drops_tombstones() {
    let (_dir, engine) = small_engine();
    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    engine.del(b"a".to_vec()).unwrap();

    let entries = engine.scan(b"", b"").unwrap();
    assert_eq!(entries, vec![(b"b".to_vec(), b"2".to_vec())]);
}

#[test]
fn scan_merges_memtable_and_flushed_sstables() {
    let (_dir, engine) = small_engine();
    for i in 0..50u32 {
        engine
            .put(format!("k{i:04}").into_bytes(), b"old".to_vec())
            .unwrap();
    }
    assert!(wait_until(
        || engine.level_counts()[0] > 0,
        Duration::from_secs(2)
    ));
    engine.put(b"k0025".to_vec(), b"new".to_vec()).unwrap();

    let entries = engine.scan(b"", b"").unwrap();
    let found = entries
        .iter()
        .find(|(k, _)| k == b"k0025")
        .map(|(_, v)| v.clone());
    assert_eq!(found, Some(b"new".to_vec()));
    assert_eq!(entries.len(), 50);
}

#[test]
fn get_at_honors_snapshot_visibility() {
    let (_dir, engine) = small_engine();
    let seq_v1 = engine.put(b"a".to_vec(), b"v1".to_vec()).unwrap();
    let _seq_v2 = engine.put(b"a".to_vec(), b"v2".to_vec()).unwrap();

    assert_eq!(engine.get_at(b"a", seq_v1).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(b"a").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn snapshot_sees_pre_delete_value_until_released() {
    let (_dir, engine) = small_engine();
    engine.put(b"a".to_vec(), b"v1".to_vec()).unwrap();
    let snap = engine.create_snapshot();
    engine.del(b"a".to_vec()).unwrap();

    assert_eq!(engine.get_at(b"a", snap).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(b"a").unwrap(), None);
    engine.release_snapshot(snap);
}

#[test]
fn new_iterator_is_invalidated_by_a_subsequent_write() {
    let (_dir, engine) = small_engine();
    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    let it = engine.new_iterator().unwrap();
    assert!(it.valid());
    engine.put(b"b".to_vec(), b"2".to_vec()).unwrap();
    assert!(!it.valid());
}
