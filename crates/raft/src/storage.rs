//! Durable storage for the persistent fields Raft's correctness depends on:
//! `current_term`, `voted_for`, and the log itself.
//!
//! ## File layout
//!
//! ```text
//! {data_dir}/
//! ├── raft-log           append-only log entries
//! └── raft-state.json    current_term + voted_for
//! ```
//!
//! Each log entry is framed the same way `wal::WalWriter` frames its
//! records — a length-prefixed, CRC-checked body — since both are
//! append-only logs replayed linearly on startup:
//!
//! ```text
//! [body_len: u32 LE][crc32: u32 LE][term: u64 LE][index: u64 LE][command ...]
//! ```

use crate::error::RaftError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::types::LogEntry;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistedState {
    current_term: u64,
    voted_for: Option<String>,
}

/// Owns `raft-log` and `raft-state.json` beneath `data_dir`, replaying both
/// on open and appending new log entries as they're produced.
pub struct RaftStorage {
    state_path: PathBuf,
    log_path: PathBuf,
    log_file: File,
}

impl RaftStorage {
    /// Opens (creating if necessary) the storage files under `data_dir` and
    /// replays everything found into the returned `(current_term,
    /// voted_for, log)` triple.
    pub fn open(data_dir: &Path) -> Result<(Self, u64, Option<String>, Vec<LogEntry>), RaftError> {
        fs::create_dir_all(data_dir)?;
        let state_path = data_dir.join("raft-state.json");
        let log_path = data_dir.join("raft-log");

        let state = if state_path.exists() {
            let bytes = fs::read(&state_path)?;
            serde_json::from_slice(&bytes).unwrap_or_default()
        } else {
            PersistedState::default()
        };

        let log = Self::replay_log(&log_path)?;

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&log_path)?;

        let storage = Self {
            state_path,
            log_path,
            log_file,
        };
        Ok((storage, state.current_term, state.voted_for, log))
    }

    fn replay_log(log_path: &Path) -> Result<Vec<LogEntry>, RaftError> {
        if !log_path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = BufReader::new(File::open(log_path)?);
        let mut entries = Vec::new();
        loop {
            let body_len = match reader.read_u32::<LittleEndian>() {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            let crc = reader.read_u32::<LittleEndian>()?;
            let mut body = vec![0u8; body_len as usize];
            if reader.read_exact(&mut body).is_err() {
                tracing::warn!("raft log truncated mid-record, stopping replay");
                break;
            }
            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                tracing::warn!("raft log entry failed CRC check, stopping replay");
                break;
            }
            let mut cursor = io::Cursor::new(&body);
            let term = cursor.read_u64::<LittleEndian>()?;
            let index = cursor.read_u64::<LittleEndian>()?;
            let mut command = Vec::new();
            cursor.read_to_end(&mut command)?;
            entries.push(LogEntry { term, index, command });
        }
        Ok(entries)
    }

    /// Persists `current_term`/`voted_for`. Must happen before any RPC that
    /// depends on them is sent, per the spec's crash-safety rule.
    pub fn persist_state(&self, current_term: u64, voted_for: &Option<String>) -> Result<(), RaftError> {
        let state = PersistedState {
            current_term,
            voted_for: voted_for.clone(),
        };
        let bytes = serde_json::to_vec(&state)?;
        let tmp = self.state_path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.state_path)?;
        Ok(())
    }

    /// Appends one log entry, fsync'ing before returning so a leader never
    /// reports success for an entry the crash could still lose.
    pub fn append_entry(&mut self, entry: &LogEntry) -> Result<(), RaftError> {
        let mut body = Vec::with_capacity(16 + entry.command.len());
        body.write_u64::<LittleEndian>(entry.term)?;
        body.write_u64::<LittleEndian>(entry.index)?;
        body.extend_from_slice(&entry.command);

        let mut hasher = Crc32::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        self.log_file.write_u32::<LittleEndian>(body.len() as u32)?;
        self.log_file.write_u32::<LittleEndian>(crc)?;
        self.log_file.write_all(&body)?;
        self.log_file.sync_all()?;
        Ok(())
    }

    /// Rewrites the whole log file to `entries`, used after a follower
    /// truncates a conflicting suffix. Small logs only; this crate has no
    /// snapshotting, so the log is never large enough for rewrite cost to
    /// matter.
    pub fn rewrite_log(&mut self, entries: &[LogEntry]) -> Result<(), RaftError> {
        let tmp = self.log_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            for entry in entries {
                let mut body = Vec::with_capacity(16 + entry.command.len());
                body.write_u64::<LittleEndian>(entry.term)?;
                body.write_u64::<LittleEndian>(entry.index)?;
                body.extend_from_slice(&entry.command);
                let mut hasher = Crc32::new();
                hasher.update(&body);
                let crc = hasher.finalize();
                file.write_u32::<LittleEndian>(body.len() as u32)?;
                file.write_u32::<LittleEndian>(crc)?;
                file.write_all(&body)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.log_path)?;
        self.log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.log_path)?;
        Ok(())
    }
}
