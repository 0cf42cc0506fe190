//! MANIFEST — the persistent, append-only log of level transitions.
//!
//! Wire format (text, line-oriented, one record per line):
//!
//! ```text
//! ADD <level:int> <filename:string> <min_key:quoted> <max_key:quoted>
//! DEL <level:int> <filename:string>
//! ```
//!
//! Keys are quoted with a minimal escaping scheme (`\\` and `\"` escaped,
//! other bytes passed through as-is if printable ASCII, else `\xHH`) so the
//! format stays human-inspectable for the common case of UTF-8-ish keys.
//! Replay applies records strictly in file order; a later record always
//! overrides an earlier one for the same filename. An `ADD` whose file no
//! longer exists on disk is silently dropped (with a warning) rather than
//! treated as a fatal recovery error — see the design notes on ambiguous
//! source behavior.

use crate::version::SstMeta;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// One parsed MANIFEST record, prior to being folded into a `VersionSet`.
#[derive(Debug, Clone)]
pub enum ManifestRecord {
    Add(SstMeta),
    Del { level: usize, filename: String },
}

/// The append-only MANIFEST file handle plus the records replayed from it.
pub struct Manifest {
    path: PathBuf,
    file: File,
    /// Current membership, folded from the replayed records in file order.
    pub records: Vec<ManifestRecord>,
}

impl Manifest {
    /// Opens (creating if absent) the MANIFEST in `sst_dir`, replaying any
    /// existing records.
    pub fn open_or_create(sst_dir: &Path) -> Result<Self> {
        let path = sst_dir.join(MANIFEST_FILENAME);
        let mut records = Vec::new();

        if path.exists() {
            let f = File::open(&path)
                .with_context(|| format!("failed to open manifest at {}", path.display()))?;
            let reader = BufReader::new(f);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line.with_context(|| format!("reading manifest line {}", line_no + 1))?;
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                match parse_line(trimmed) {
                    Ok(rec) => records.push(rec),
                    Err(e) => warn!(line = line_no + 1, error = %e, "skipping malformed manifest record"),
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open manifest for append at {}", path.display()))?;

        Ok(Self { path, file, records })
    }

    /// Appends an `ADD` record and fsyncs before returning, so the record is
    /// durable before the caller installs the file into the live version.
    pub fn append_add(&mut self, meta: &SstMeta) -> Result<()> {
        writeln!(
            self.file,
            "ADD {} {} {} {}",
            meta.level,
            meta.filename,
            quote(&meta.min_key),
            quote(&meta.max_key)
        )?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.records.push(ManifestRecord::Add(meta.clone()));
        Ok(())
    }

    /// Appends a `DEL` record for `filename` at `level`.
    pub fn append_del(&mut self, level: usize, filename: &str) -> Result<()> {
        writeln!(self.file, "DEL {} {}", level, filename)?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.records.push(ManifestRecord::Del {
            level,
            filename: filename.to_string(),
        });
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_line(line: &str) -> Result<ManifestRecord> {
    let mut parts = line.split_whitespace();
    let kind = parts.next().context("missing record kind")?;
    match kind {
        "ADD" => {
            let level: usize = parts.next().context("missing level")?.parse()?;
            let filename = parts.next().context("missing filename")?.to_string();
            let rest: Vec<&str> = parts.collect();
            let joined = rest.join(" ");
            let (min_q, max_q) = split_two_quoted(&joined)?;
            Ok(ManifestRecord::Add(SstMeta {
                file_id: file_id_from_filename(&filename),
                filename,
                level,
                min_key: unquote(&min_q)?,
                max_key: unquote(&max_q)?,
            }))
        }
        "DEL" => {
            let level: usize = parts.next().context("missing level")?.parse()?;
            let filename = parts.next().context("missing filename")?.to_string();
            Ok(ManifestRecord::Del { level, filename })
        }
        other => anyhow::bail!("unknown manifest record kind: {other}"),
    }
}

/// Pulls a `fileId` back out of the conventional `sstable_<fileId>.dat`
/// naming scheme written by the flush/compaction paths, falling back to 0
/// for filenames that don't match (shouldn't happen for files this engine
/// wrote itself).
fn file_id_from_filename(filename: &str) -> u64 {
    filename
        .trim_start_matches("sstable_")
        .trim_end_matches(".dat")
        .parse()
        .unwrap_or(0)
}

fn quote(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('"');
    out
}

fn unquote(s: &str) -> Result<Vec<u8>> {
    let inner = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .context("expected quoted key")?;
    let mut out = Vec::with_capacity(inner.len());
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'"' => {
                    out.push(b'"');
                    i += 2;
                }
                b'\\' => {
                    out.push(b'\\');
                    i += 2;
                }
                b'x' if i + 3 < bytes.len() => {
                    let hex = std::str::from_utf8(&bytes[i + 2..i + 4])?;
                    out.push(u8::from_str_radix(hex, 16)?);
                    i += 4;
                }
                other => {
                    out.push(other);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// The whitespace-joined remainder of a line may itself contain embedded
/// spaces inside each quoted key, so we split on the boundary between the
/// two quoted strings rather than on whitespace.
fn split_two_quoted(s: &str) -> Result<(String, String)> {
    let s = s.trim();
    anyhow::ensure!(s.starts_with('"'), "expected quoted min_key");
    let mut chars = s.char_indices().skip(1);
    let mut first_end = None;
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        if c == '"' {
            first_end = Some(i);
            break;
        }
    }
    let first_end = first_end.context("unterminated min_key")?;
    let first = s[..=first_end].to_string();
    let remainder = s[first_end + 1..].trim_start();
    anyhow::ensure!(remainder.starts_with('"'), "expected quoted max_key");
    Ok((first, remainder.to_string()))
}
