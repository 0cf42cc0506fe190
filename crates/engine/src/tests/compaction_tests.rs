use super::helpers::wait_until;
use crate::{CompactionKind, Engine, EngineOptions};
use std::time::Duration;

fn leveled_engine(dir: &std::path::Path, flush_threshold: usize) -> Engine {
    let mut opts = EngineOptions::default();
    opts.flush_threshold = flush_threshold;
    opts.compaction_kind = CompactionKind::Leveled;
    Engine::open(dir, opts).unwrap()
}

#[test]
fn repeated_flushes_eventually_populate_l0() {
    let dir = tempfile::tempdir().unwrap();
    let engine = leveled_engine(dir.path(), 64);

    for i in 0..20u32 {
        engine
            .put(format!("k{i:04}").into_bytes(), b"val".to_vec())
            .unwrap();
    }

    assert!(wait_until(
        || engine.level_counts()[0] > 0,
        Duration::from_secs(2)
    ));
    assert_eq!(
        engine.level_counts().get(1).copied().unwrap_or(0),
        0,
        "L1 should stay empty until enough L0 files accumulate to trigger compaction"
    );
}

#[test]
fn enough_l0_files_triggers_leveled_compaction_into_l1() {
    let dir = tempfile::tempdir().unwrap();
    let engine = leveled_engine(dir.path(), 64);

    for i in 0..80u32 {
        engine
            .put(format!("k{i:04}").into_bytes(), b"val".to_vec())
            .unwrap();
    }

    assert!(wait_until(
        || engine.level_counts().get(1).copied().unwrap_or(0) > 0,
        Duration::from_secs(5)
    ));

    for i in 0..80u32 {
        let key = format!("k{i:04}").into_bytes();
        assert_eq!(
            engine.get(&key).unwrap(),
            Some(b"val".to_vec()),
            "key {i} should still be reachable after compaction"
        );
    }
}

#[test]
fn compaction_keeps_the_newest_value_for_an_overwritten_key() {
    let dir = tempfile::tempdir().unwrap();
    let engine = leveled_engine(dir.path(), 32);

    for v in 0..30u32 {
        engine
            .put(b"shared".to_vec(), format!("v{v}").into_bytes())
            .unwrap();
    }
    for i in 0..30u32 {
        engine
            .put(format!("pad{i:04}").into_bytes(), b"x".to_vec())
            .unwrap();
    }

    assert!(wait_until(
        || engine.level_counts().get(1).copied().unwrap_or(0) > 0,
        Duration::from_secs(5)
    ));
    assert_eq!(engine.get(b"shared").unwrap(), Some(b"v29".to_vec()));
}

#[test]
fn compaction_garbage_collects_tombstones_below_the_snapshot_floor() {
    let dir = tempfile::tempdir().unwrap();
    let engine = leveled_engine(dir.path(), 32);

    engine.put(b"alive".to_vec(), b"yes".to_vec()).unwrap();
    engine.put(b"dead".to_vec(), b"soon".to_vec()).unwrap();
    engine.del(b"dead".to_vec()).unwrap();
    for i in 0..40u32 {
        engine
            .put(format!("pad{i:04}").into_bytes(), b"x".to_vec())
            .unwrap();
    }

    assert!(wait_until(
        || engine.level_counts().get(1).copied().unwrap_or(0) > 0,
        Duration::from_secs(5)
    ));

    assert_eq!(engine.get(b"dead").unwrap(), None);
    assert_eq!(engine.get(b"alive").unwrap(), Some(b"yes".to_vec()));
}

#[test]
fn live_snapshot_keeps_older_versions_alive_through_compaction() {
    let dir = tempfile::tempdir().unwrap();
    let engine = leveled_engine(dir.path(), 32);

    engine.put(b"key".to_vec(), b"v1".to_vec()).unwrap();
    let snap = engine.create_snapshot();
    engine.put(b"key".to_vec(), b"v2".to_vec()).unwrap();
    for i in 0..40u32 {
        engine
            .put(format!("pad{i:04}").into_bytes(), b"x".to_vec())
            .unwrap();
    }

    assert!(wait_until(
        || engine.level_counts().get(1).copied().unwrap_or(0) > 0,
        Duration::from_secs(5)
    ));

    assert_eq!(engine.get_at(b"key", snap).unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get(b"key").unwrap(), Some(b"v2".to_vec()));
    engine.release_snapshot(snap);
}

#[test]
fn switching_compaction_strategy_is_observed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = leveled_engine(dir.path(), 64);
    assert_eq!(engine.compaction_strategy(), CompactionKind::Leveled);
    engine.set_compaction_strategy(CompactionKind::Tiered);
    assert_eq!(engine.compaction_strategy(), CompactionKind::Tiered);
}
