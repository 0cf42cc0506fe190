use crate::{IsolationLevel, PessimisticLockManager, TransactionManager, TxnError};
use mvcc::MvccManager;
use std::sync::Arc;
use std::time::Duration;

fn manager() -> TransactionManager {
    TransactionManager::new(
        Arc::new(MvccManager::new()),
        Arc::new(PessimisticLockManager::new(Duration::from_millis(200))),
        Duration::from_millis(200),
    )
}

#[test]
fn committed_write_is_visible_to_a_transaction_started_afterward() {
    let txm = manager();
    let t1 = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(t1.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();
    assert!(txm.commit(t1.txn_id).unwrap());

    let t2 = txm.begin(IsolationLevel::ReadCommitted);
    assert_eq!(txm.get(t2.txn_id, b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn uncommitted_write_is_invisible_to_another_transaction() {
    let txm = manager();
    let t1 = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(t1.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();

    let t2 = txm.begin(IsolationLevel::ReadCommitted);
    assert_eq!(txm.get(t2.txn_id, b"a").unwrap(), None);
}

#[test]
fn a_transaction_sees_its_own_uncommitted_write() {
    let txm = manager();
    let t1 = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(t1.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();
    assert_eq!(txm.get(t1.txn_id, b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn repeatable_read_keeps_seeing_its_start_snapshot_across_a_concurrent_commit() {
    let txm = manager();
    let t0 = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(t0.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();
    txm.commit(t0.txn_id).unwrap();

    let reader = txm.begin(IsolationLevel::RepeatableRead);
    assert_eq!(txm.get(reader.txn_id, b"a").unwrap(), Some(b"1".to_vec()));

    let writer = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(writer.txn_id, b"a".to_vec(), b"2".to_vec()).unwrap();
    txm.commit(writer.txn_id).unwrap();

    assert_eq!(txm.get(reader.txn_id, b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn read_committed_observes_a_concurrent_commit_on_its_next_read() {
    let txm = manager();
    let t0 = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(t0.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();
    txm.commit(t0.txn_id).unwrap();

    let reader = txm.begin(IsolationLevel::ReadCommitted);
    assert_eq!(txm.get(reader.txn_id, b"a").unwrap(), Some(b"1".to_vec()));

    let writer = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(writer.txn_id, b"a".to_vec(), b"2".to_vec()).unwrap();
    txm.commit(writer.txn_id).unwrap();

    assert_eq!(txm.get(reader.txn_id, b"a").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn write_write_conflict_under_snapshot_isolation_aborts_the_later_committer() {
    let txm = manager();
    let t0 = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(t0.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();
    txm.commit(t0.txn_id).unwrap();

    let t1 = txm.begin(IsolationLevel::RepeatableRead);
    let t2 = txm.begin(IsolationLevel::RepeatableRead);

    txm.put(t1.txn_id, b"a".to_vec(), b"from-t1".to_vec()).unwrap();
    assert!(txm.commit(t1.txn_id).unwrap());

    txm.put(t2.txn_id, b"a".to_vec(), b"from-t2".to_vec()).unwrap();
    // t2's snapshot predates t1's commit, so committing it now must fail.
    assert!(!txm.commit(t2.txn_id).unwrap());

    let reader = txm.begin(IsolationLevel::ReadCommitted);
    assert_eq!(txm.get(reader.txn_id, b"a").unwrap(), Some(b"from-t1".to_vec()));
}

#[test]
fn abort_discards_the_buffered_write_entirely() {
    let txm = manager();
    let t1 = txm.begin(IsolationLevel::ReadCommitted);
    txm.put(t1.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();
    txm.abort(t1.txn_id).unwrap();

    let t2 = txm.begin(IsolationLevel::ReadCommitted);
    assert_eq!(txm.get(t2.txn_id, b"a").unwrap(), None);
}

#[test]
fn serializable_transactions_serialize_through_exclusive_locks() {
    let txm = manager();
    let t1 = txm.begin(IsolationLevel::Serializable);
    txm.put(t1.txn_id, b"a".to_vec(), b"1".to_vec()).unwrap();

    let t2 = txm.begin(IsolationLevel::Serializable);
    let result = txm.put(t2.txn_id, b"a".to_vec(), b"2".to_vec());
    assert!(matches!(result, Err(TxnError::LockTimeout)));

    assert!(txm.commit(t1.txn_id).unwrap());
}

#[test]
fn operations_on_an_unknown_transaction_are_rejected() {
    let txm = manager();
    assert!(matches!(
        txm.get(999, b"a"),
        Err(TxnError::UnknownTransaction(999))
    ));
}

#[test]
fn operations_after_commit_are_rejected() {
    let txm = manager();
    let t1 = txm.begin(IsolationLevel::ReadCommitted);
    txm.commit(t1.txn_id).unwrap();
    assert!(matches!(
        txm.put(t1.txn_id, b"a".to_vec(), b"1".to_vec()),
        Err(TxnError::InvalidState(_))
    ));
}

#[test]
fn min_active_start_ts_tracks_the_oldest_still_running_transaction() {
    let txm = manager();
    let t1 = txm.begin(IsolationLevel::RepeatableRead);
    let _t2 = txm.begin(IsolationLevel::RepeatableRead);
    assert_eq!(txm.min_active_start_ts(), t1.start_ts);

    txm.commit(t1.txn_id).unwrap();
    assert_eq!(txm.min_active_start_ts(), _t2.start_ts);
}
