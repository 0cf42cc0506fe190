use crate::MvccManager;

#[test]
fn uncommitted_write_is_invisible() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    assert_eq!(mvcc.read(b"a", 100), None);
}

#[test]
fn committed_write_is_visible_at_or_after_commit_ts() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    assert_eq!(mvcc.read(b"a", 20), Some(b"1".to_vec()));
    assert_eq!(mvcc.read(b"a", 100), Some(b"1".to_vec()));
    assert_eq!(mvcc.read(b"a", 19), None);
}

#[test]
fn abort_discards_the_write_entirely() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.abort(1);
    mvcc.commit(1, 20); // no-op: pending ops were already drained by abort
    assert_eq!(mvcc.read(b"a", 1000), None);
    assert_eq!(mvcc.version_count(b"a"), 0);
}

#[test]
fn newer_commit_shadows_an_older_one() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.write(b"a", b"2".to_vec(), 2, 30);
    mvcc.commit(2, 40);

    assert_eq!(mvcc.read(b"a", 25), Some(b"1".to_vec()));
    assert_eq!(mvcc.read(b"a", 40), Some(b"2".to_vec()));
}

#[test]
fn delete_hides_the_key_from_readers_at_or_after_delete_ts() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.remove(b"a", 2, 50).unwrap();
    mvcc.commit(2, 50);

    assert_eq!(mvcc.read(b"a", 49), Some(b"1".to_vec()));
    assert_eq!(mvcc.read(b"a", 50), None);
}

#[test]
fn aborted_delete_restores_visibility() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.remove(b"a", 2, 50).unwrap();
    mvcc.abort(2);

    assert_eq!(mvcc.read(b"a", 1000), Some(b"1".to_vec()));
}

#[test]
fn remove_on_an_unknown_key_is_not_found() {
    let mvcc = MvccManager::new();
    let err = mvcc.remove(b"missing", 1, 10).unwrap_err();
    assert_eq!(err, crate::MvccError::NotFound);
}

#[test]
fn snapshot_reads_are_stable_despite_concurrent_writes() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.write(b"b", b"2".to_vec(), 1, 10);
    mvcc.commit(1, 20);

    let snap = mvcc.create_snapshot(20);

    mvcc.write(b"a", b"3".to_vec(), 2, 30);
    mvcc.commit(2, 40);

    assert_eq!(snap.get(b"a".as_slice()), Some(&b"1".to_vec()));
    assert_eq!(mvcc.read(b"a", 40), Some(b"3".to_vec()));
}

#[test]
fn snapshot_omits_keys_not_yet_committed_at_that_timestamp() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.write(b"b", b"2".to_vec(), 2, 30);
    mvcc.commit(2, 40);

    let snap = mvcc.create_snapshot(20);
    assert!(snap.contains_key(b"a".as_slice()));
    assert!(!snap.contains_key(b"b".as_slice()));
}

#[test]
fn gc_keeps_the_newest_committed_version_even_if_old() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);

    let removed = mvcc.run_gc(1_000_000);
    assert_eq!(removed, 0);
    assert_eq!(mvcc.read(b"a", 1_000_000), Some(b"1".to_vec()));
}

#[test]
fn gc_drops_versions_shadowed_by_a_newer_committed_write() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.write(b"a", b"2".to_vec(), 2, 30);
    mvcc.commit(2, 40);

    assert_eq!(mvcc.version_count(b"a"), 2);
    let removed = mvcc.run_gc(1_000);
    assert_eq!(removed, 1);
    assert_eq!(mvcc.version_count(b"a"), 1);
    assert_eq!(mvcc.read(b"a", 1_000), Some(b"2".to_vec()));
}

#[test]
fn gc_drops_a_tombstone_once_its_delete_predates_the_floor() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.remove(b"a", 2, 50).unwrap();
    mvcc.commit(2, 50);

    let removed = mvcc.run_gc(1_000);
    assert_eq!(removed, 1);
    assert_eq!(mvcc.read(b"a", 1_000), None);
}

#[test]
fn gc_leaves_versions_still_reachable_by_an_active_reader() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.write(b"a", b"2".to_vec(), 2, 30);
    mvcc.commit(2, 40);

    // A reader pinned at ts=25 still needs the v1 ("1") version.
    let removed = mvcc.run_gc(25);
    assert_eq!(removed, 0);
    assert_eq!(mvcc.read(b"a", 25), Some(b"1".to_vec()));
}

#[test]
fn keys_are_independent() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.write(b"b", b"2".to_vec(), 1, 10);
    mvcc.commit(1, 20);
    mvcc.remove(b"a", 2, 30).unwrap();
    mvcc.commit(2, 30);

    assert_eq!(mvcc.read(b"a", 40), None);
    assert_eq!(mvcc.read(b"b", 40), Some(b"2".to_vec()));
}

#[test]
fn total_versions_and_keys_report_accurately() {
    let mvcc = MvccManager::new();
    mvcc.write(b"a", b"1".to_vec(), 1, 10);
    mvcc.write(b"b", b"2".to_vec(), 1, 10);
    mvcc.commit(1, 20);

    assert_eq!(mvcc.total_versions(), 2);
    let mut keys = mvcc.keys();
    keys.sort();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
}
