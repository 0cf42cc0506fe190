use crate::storage::RaftStorage;
use crate::LogEntry;

#[test]
fn reopening_empty_storage_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let (_storage, term, voted_for, log) = RaftStorage::open(dir.path()).unwrap();
    assert_eq!(term, 0);
    assert_eq!(voted_for, None);
    assert!(log.is_empty());
}

#[test]
fn persisted_term_and_vote_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (storage, _, _, _) = RaftStorage::open(dir.path()).unwrap();
        storage.persist_state(7, &Some("node-2".to_string())).unwrap();
    }
    let (_storage, term, voted_for, _log) = RaftStorage::open(dir.path()).unwrap();
    assert_eq!(term, 7);
    assert_eq!(voted_for, Some("node-2".to_string()));
}

#[test]
fn appended_log_entries_replay_in_order() {
    let dir = tempfile::tempdir().unwrap();
    {
        let (mut storage, ..) = RaftStorage::open(dir.path()).unwrap();
        for i in 1..=5u64 {
            storage
                .append_entry(&LogEntry {
                    term: 1,
                    index: i,
                    command: format!("cmd-{i}").into_bytes(),
                })
                .unwrap();
        }
    }
    let (_storage, _, _, log) = RaftStorage::open(dir.path()).unwrap();
    assert_eq!(log.len(), 5);
    assert_eq!(log[0].command, b"cmd-1");
    assert_eq!(log[4].index, 5);
}

#[test]
fn rewrite_log_replaces_the_file_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let (mut storage, ..) = RaftStorage::open(dir.path()).unwrap();
    storage
        .append_entry(&LogEntry { term: 1, index: 1, command: b"a".to_vec() })
        .unwrap();
    storage
        .append_entry(&LogEntry { term: 1, index: 2, command: b"b".to_vec() })
        .unwrap();
    storage
        .rewrite_log(&[LogEntry { term: 2, index: 1, command: b"only".to_vec() }])
        .unwrap();
    drop(storage);

    let (_storage, _, _, log) = RaftStorage::open(dir.path()).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].command, b"only");
    assert_eq!(log[0].term, 2);
}
