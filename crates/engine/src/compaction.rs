//! Compaction strategy selection and execution.
//!
//! [`CompactionKind`] is a tagged enum, not a trait object — per the
//! redesign notes, a virtual strategy hierarchy becomes a pure function
//! parameterized by the kind. `pick_compaction` only looks at level
//! metadata; actually reading/writing files happens in
//! [`Engine::run_one_compaction`].

use crate::version::{SstHandle, SstMeta, Version};
use crate::Shared;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionKind {
    Leveled,
    Tiered,
    SizeTiered,
    TimeWindow,
}

impl Default for CompactionKind {
    fn default() -> Self {
        CompactionKind::Leveled
    }
}

impl std::str::FromStr for CompactionKind {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LEVELED" => Ok(CompactionKind::Leveled),
            "TIERED" => Ok(CompactionKind::Tiered),
            "SIZE_TIERED" => Ok(CompactionKind::SizeTiered),
            "TIME_WINDOW" => Ok(CompactionKind::TimeWindow),
            other => anyhow::bail!("unknown compaction strategy: {other}"),
        }
    }
}

/// Tuning knobs threaded in from `config::RiptideConfig`.
#[derive(Debug, Clone)]
pub struct CompactionTuning {
    pub level_base_bytes: u64,
    pub level_size_multiplier: u64,
    pub l0_file_count_trigger: usize,
    pub max_files_per_tier: usize,
    pub size_tiered_min_threshold: usize,
    pub size_tiered_ratio: f64,
    pub time_window_max_files: usize,
    pub time_window_millis: u64,
}

impl Default for CompactionTuning {
    fn default() -> Self {
        Self {
            level_base_bytes: 4 * 1024 * 1024,
            level_size_multiplier: 10,
            l0_file_count_trigger: 4,
            max_files_per_tier: 4,
            size_tiered_min_threshold: 4,
            size_tiered_ratio: 0.5,
            time_window_max_files: 4,
            time_window_millis: 60_000,
        }
    }
}

/// A single unit of compaction work: merge `inputs` (and anything in
/// `target_level` they overlap) into `target_level`.
#[derive(Debug, Clone)]
pub struct Task {
    pub source_level: usize,
    pub target_level: usize,
    pub inputs: Vec<SstMeta>,
    pub overlapping: Vec<SstMeta>,
    pub estimated_output_size: u64,
    pub priority: f64,
}

pub fn needs_compaction(kind: CompactionKind, version: &Version, tuning: &CompactionTuning) -> bool {
    pick_compaction(kind, version, tuning).is_some()
}

pub fn pick_compaction(
    kind: CompactionKind,
    version: &Version,
    tuning: &CompactionTuning,
) -> Option<Task> {
    match kind {
        CompactionKind::Leveled => pick_leveled(version, tuning),
        CompactionKind::Tiered => pick_tiered(version, tuning),
        CompactionKind::SizeTiered => pick_size_tiered(version, tuning),
        CompactionKind::TimeWindow => pick_time_window(version, tuning),
    }
}

fn priority(inputs: usize, output_size: u64, source_level: usize) -> f64 {
    (inputs as f64 * output_size as f64) / (source_level as f64 + 1.0)
}

fn pick_leveled(version: &Version, tuning: &CompactionTuning) -> Option<Task> {
    let mut best: Option<(usize, f64)> = None;
    for (level, files) in version.levels.iter().enumerate() {
        let (score, triggered) = if level == 0 {
            let score = files.len() as f64 / tuning.l0_file_count_trigger as f64;
            (score, score >= 1.0)
        } else {
            let cap = tuning.level_base_bytes * tuning.level_size_multiplier.pow(level as u32 - 1);
            let score = version.total_bytes(level) as f64 / cap.max(1) as f64;
            (score, score > 1.0)
        };
        if triggered && best.map(|(_, s)| score > s).unwrap_or(true) {
            best = Some((level, score));
        }
    }
    let (level, _) = best?;

    let inputs: Vec<SstMeta> = if level == 0 {
        version.levels[0].iter().map(|h| h.meta.clone()).collect()
    } else {
        version.levels[level]
            .iter()
            .min_by_key(|h| h.meta.file_id)
            .map(|h| vec![h.meta.clone()])
            .unwrap_or_default()
    };
    if inputs.is_empty() {
        return None;
    }

    let target_level = level + 1;
    let overlapping: Vec<SstMeta> = version
        .levels
        .get(target_level)
        .map(|files| {
            files
                .iter()
                .filter(|h| inputs.iter().any(|m| m.key_ranges_overlap(&h.meta)))
                .map(|h| h.meta.clone())
                .collect()
        })
        .unwrap_or_default();

    let estimated_output_size = version.total_bytes(level) + version.total_bytes(target_level);
    Some(Task {
        priority: priority(inputs.len(), estimated_output_size, level),
        source_level: level,
        target_level,
        inputs,
        overlapping,
        estimated_output_size,
    })
}

fn pick_tiered(version: &Version, tuning: &CompactionTuning) -> Option<Task> {
    let (level, files) = version
        .levels
        .iter()
        .enumerate()
        .filter(|(_, f)| f.len() >= tuning.max_files_per_tier)
        .max_by_key(|(_, f)| f.len())?;

    let inputs: Vec<SstMeta> = files.iter().map(|h| h.meta.clone()).collect();
    let estimated_output_size = version.total_bytes(level);
    Some(Task {
        priority: priority(inputs.len(), estimated_output_size, level),
        source_level: level,
        target_level: level,
        inputs,
        overlapping: Vec::new(),
        estimated_output_size,
    })
}

fn pick_size_tiered(version: &Version, tuning: &CompactionTuning) -> Option<Task> {
    for (level, files) in version.levels.iter().enumerate() {
        if files.len() < tuning.size_tiered_min_threshold {
            continue;
        }
        let mut sizes: Vec<(u64, &SstMeta)> = files
            .iter()
            .map(|h| (h.reader.len() as u64, &h.meta))
            .collect();
        sizes.sort_by_key(|(sz, _)| *sz);

        let mut best_group: Vec<&SstMeta> = Vec::new();
        let mut i = 0;
        while i < sizes.len() {
            let mut group = vec![sizes[i].1];
            let mut j = i + 1;
            while j < sizes.len() {
                let ratio = sizes[j].0 as f64 / sizes[i].0.max(1) as f64;
                if ratio <= 1.0 + tuning.size_tiered_ratio {
                    group.push(sizes[j].1);
                    j += 1;
                } else {
                    break;
                }
            }
            if group.len() > best_group.len() {
                best_group = group;
            }
            i += 1;
        }

        if best_group.len() >= 2 {
            let inputs: Vec<SstMeta> = best_group.into_iter().cloned().collect();
            let estimated_output_size = version.total_bytes(level);
            return Some(Task {
                priority: priority(inputs.len(), estimated_output_size, level),
                source_level: level,
                target_level: level,
                inputs,
                overlapping: Vec::new(),
                estimated_output_size,
            });
        }
    }
    None
}

fn pick_time_window(version: &Version, tuning: &CompactionTuning) -> Option<Task> {
    for (level, files) in version.levels.iter().enumerate() {
        let mut windows: std::collections::BTreeMap<u64, Vec<&SstMeta>> =
            std::collections::BTreeMap::new();
        for h in files {
            let window = h.meta.file_id / tuning.time_window_millis.max(1);
            windows.entry(window).or_default().push(&h.meta);
        }
        if let Some((_, metas)) = windows
            .into_iter()
            .find(|(_, metas)| metas.len() > tuning.time_window_max_files)
        {
            let inputs: Vec<SstMeta> = metas.into_iter().cloned().collect();
            let estimated_output_size = version.total_bytes(level);
            return Some(Task {
                priority: priority(inputs.len(), estimated_output_size, level),
                source_level: level,
                target_level: level,
                inputs,
                overlapping: Vec::new(),
                estimated_output_size,
            });
        }
    }
    None
}

/// Drains every compaction task the active strategy can pick, in priority
/// order, stopping as soon as one fails (which poisons the engine) or none
/// remain. Runs on the dedicated compaction worker thread.
pub(crate) fn run_pending_compactions(shared: &Arc<Shared>) {
    loop {
        let task = {
            let state = shared.state.read();
            if state.poisoned.is_some() {
                return;
            }
            pick_compaction(state.compaction_kind, &state.version, &state.tuning)
        };
        let Some(task) = task else { return };
        if let Err(e) = run_one_task(shared, task) {
            error!(error = %e, "compaction task failed, poisoning engine");
            shared.state.write().poisoned = Some(e.to_string());
            return;
        }
    }
}

fn lookup(version: &Version, metas: &[SstMeta]) -> Vec<Arc<SstHandle>> {
    metas
        .iter()
        .filter_map(|m| {
            version
                .levels
                .get(m.level)
                .and_then(|files| files.iter().find(|h| h.meta.filename == m.filename))
                .cloned()
        })
        .collect()
}

fn run_one_task(shared: &Shared, task: Task) -> anyhow::Result<()> {
    let (to_merge, num_levels) = {
        let state = shared.state.read();
        let mut handles = lookup(&state.version, &task.inputs);
        handles.extend(lookup(&state.version, &task.overlapping));
        (handles, state.version.levels.len())
    };

    let mut sources = Vec::with_capacity(to_merge.len());
    for h in &to_merge {
        sources.push(h.reader.scan_all()?);
    }
    let merged = sstable::MergeIterator::new(sources).collect_all();

    let min_active_seq = shared.snapshots.lock().min_active();
    let bottommost = task.target_level + 1 >= num_levels;
    let collapsed = sstable::drop_obsolete_versions(merged, min_active_seq, bottommost);

    let new_meta = if collapsed.is_empty() {
        None
    } else {
        let file_id = sstable::next_file_id();
        let filename = format!("sstable_{file_id}.dat");
        let path = shared.sst_dir.join(&filename);
        let min_key = collapsed.first().unwrap().0.clone();
        let max_key = collapsed.last().unwrap().0.clone();
        sstable::SSTableWriter::write_from_iterator(&path, file_id, collapsed.len(), collapsed.into_iter())?;
        Some(SstMeta {
            file_id,
            filename,
            level: task.target_level,
            min_key,
            max_key,
        })
    };

    let mut state = shared.state.write();
    for meta in task.inputs.iter().chain(task.overlapping.iter()) {
        state.manifest.append_del(meta.level, &meta.filename)?;
        if let Some(files) = state.version.levels.get_mut(meta.level) {
            files.retain(|h| h.meta.filename != meta.filename);
        }
    }
    if let Some(meta) = new_meta {
        state.manifest.append_add(&meta)?;
        state.version.ensure_level(meta.level);
        let reader = sstable::SSTableReader::open_with_cache(
            shared.sst_dir.join(&meta.filename),
            Some(Arc::clone(&shared.block_cache)),
        )?;
        state.version.levels[meta.level].push(Arc::new(SstHandle { meta, reader }));
    }
    drop(state);
    shared.epoch.fetch_add(1, std::sync::atomic::Ordering::Release);

    for meta in task.inputs.iter().chain(task.overlapping.iter()) {
        let path = shared.sst_dir.join(&meta.filename);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(file = %meta.filename, error = %e, "failed to remove obsolete sstable file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SstHandle;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn meta(file_id: u64, level: usize, min: &[u8], max: &[u8]) -> SstMeta {
        SstMeta {
            file_id,
            filename: format!("sstable_{file_id}.dat"),
            level,
            min_key: min.to_vec(),
            max_key: max.to_vec(),
        }
    }

    fn handle(dir: &std::path::Path, m: SstMeta, entries: &[(&[u8], u64)]) -> Arc<SstHandle> {
        let path = dir.join(&m.filename);
        let mut mt = memtable::Memtable::new();
        for &(k, seq) in entries {
            mt.put(k.to_vec(), b"v".to_vec(), seq);
        }
        sstable::SSTableWriter::write_from_memtable(&path, m.file_id, &mt).unwrap();
        let reader = sstable::SSTableReader::open(&path).unwrap();
        Arc::new(SstHandle { meta: m, reader })
    }

    #[test]
    fn leveled_triggers_on_l0_file_count() {
        let dir = tempdir().unwrap();
        let mut v = Version::new(2);
        for i in 0..4u64 {
            v.levels[0].push(handle(
                dir.path(),
                meta(i, 0, b"a", b"z"),
                &[(b"a", i)],
            ));
        }
        let tuning = CompactionTuning::default();
        assert!(needs_compaction(CompactionKind::Leveled, &v, &tuning));
        let task = pick_compaction(CompactionKind::Leveled, &v, &tuning).unwrap();
        assert_eq!(task.source_level, 0);
        assert_eq!(task.target_level, 1);
        assert_eq!(task.inputs.len(), 4);
    }

    #[test]
    fn leveled_no_compaction_below_trigger() {
        let v = Version::new(2);
        let tuning = CompactionTuning::default();
        assert!(!needs_compaction(CompactionKind::Leveled, &v, &tuning));
    }

    #[test]
    fn tiered_merges_fullest_level() {
        let dir = tempdir().unwrap();
        let mut v = Version::new(1);
        for i in 0..5u64 {
            v.levels[0].push(handle(dir.path(), meta(i, 0, b"a", b"z"), &[(b"a", i)]));
        }
        let tuning = CompactionTuning::default();
        let task = pick_compaction(CompactionKind::Tiered, &v, &tuning).unwrap();
        assert_eq!(task.inputs.len(), 5);
        assert_eq!(task.target_level, 0);
    }
}
