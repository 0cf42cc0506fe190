//! Sanity tests exercising the real `engine` crate directly (no process
//! spawn), covering the load patterns the REPL's `PUT`/`DEL`/`FLUSH` map
//! onto: WAL-backed durability and high key churn through the memtable.
use engine::{Engine, EngineOptions};
use tempfile::tempdir;

#[test]
fn put_and_flush_produces_a_readable_sstable() {
    let dir = tempdir().unwrap();
    let opts = EngineOptions { flush_threshold: 1, ..EngineOptions::default() };
    let engine = Engine::open(dir.path(), opts).unwrap();

    engine.put(b"key1".to_vec(), b"value1".to_vec()).unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.get(b"key1").unwrap(), Some(b"value1".to_vec()));
    assert!(engine.level_counts()[0] >= 1);
}

#[test]
fn data_survives_reopening_the_same_data_dir() {
    let dir = tempdir().unwrap();
    {
        let engine = Engine::open(dir.path(), EngineOptions::default()).unwrap();
        engine.put(b"persist".to_vec(), b"value".to_vec()).unwrap();
        engine.flush().unwrap();
        engine.shutdown();
    }
    let engine = Engine::open(dir.path(), EngineOptions::default()).unwrap();
    assert_eq!(engine.get(b"persist").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn delete_then_get_returns_nil() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path(), EngineOptions::default()).unwrap();
    engine.put(b"a".to_vec(), b"1".to_vec()).unwrap();
    engine.del(b"a".to_vec()).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), None);
}

#[cfg(test)]
mod load_test {
    use memtable::Memtable;

    #[test]
    fn write_load_test() {
        let mut mem = Memtable::new();
        let mut seq = 0;
        for i in 0..1_000_000 {
            seq += 1;
            let key = format!("key{}", i % 10_000).into_bytes();
            let val = vec![b'x'; 100];
            mem.put(key, val, seq);
        }
        assert!(mem.len() <= 10_000);
    }

    #[test]
    fn delete_heavy_workload() {
        let mut mem = Memtable::new();
        let mut seq = 0;
        for _ in 0..100_000 {
            seq += 1;
            mem.put(b"k".to_vec(), b"v".to_vec(), seq);
            seq += 1;
            mem.delete(b"k".to_vec(), seq);
        }
        assert!(mem.get(b"k").is_none());
        assert_eq!(mem.len(), 1);
    }
}
