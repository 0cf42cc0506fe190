//! # CLI - RiptideKV Interactive Shell
//!
//! A REPL-style command-line interface for the RiptideKV storage engine.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Designed for both interactive use and scripted testing
//! (pipe commands via stdin).
//!
//! This binary only ever talks to the `engine` crate — it has no
//! transaction, Raft, or 2PC surface of its own. Those subsystems are
//! exercised through their own crates' test suites, not through the REPL.
//!
//! ## Commands
//!
//! ```text
//! PUT k v               GET k                DEL k
//! SCAN lo hi             PREFIX_SCAN p        SNAPSHOT
//! GET_AT k snap          RELEASE snap         FLUSH
//! COMPACT                SET_COMPACTION kind  STATS
//! LSM                    BATCH op args...     GET_WHERE field op value [LIMIT n]
//! COUNT [WHERE ...]      SUM [pattern]        AVG [pattern]
//! MIN_MAX [pattern]      SCAN_ORDER ASC|DESC [lo hi] [LIMIT n]
//! HELP                   MAN cmd              EXIT
//! ```
//!
//! ## Configuration
//!
//! Loaded via [`config::RiptideConfig::load`]: an optional TOML file (path
//! from the first CLI argument, or `RIPTIDE_CONFIG`) overlaid with
//! `RIPTIDE_*` environment variables. Logging is configured separately via
//! the standard `RUST_LOG` variable (default `info`).
//!
//! ## Example
//!
//! ```text
//! $ cli
//! RiptideKV started (seq=0, data_dir=data, compaction=LEVELED)
//! > PUT name Alice
//! OK
//! > GET name
//! Alice
//! > EXIT
//! bye
//! ```

use config::RiptideConfig;
use engine::{CompactionKind, Engine, EngineError, EngineOptions};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

mod query;

use query::{Condition, ConditionOp, Field, SortOrder};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from).or_else(|| std::env::var("RIPTIDE_CONFIG").ok().map(PathBuf::from));
    let config = RiptideConfig::load(config_path.as_deref())?;

    let compaction_kind = CompactionKind::from_str(&config.compaction_kind).unwrap_or_default();
    let opts = EngineOptions {
        flush_threshold: config.flush_threshold_bytes,
        wal_sync: config.wal_sync,
        compaction_kind,
        block_cache_capacity: config.block_cache_capacity,
        ..EngineOptions::default()
    };

    let engine = Engine::open(&config.data_dir, opts)?;
    tracing::info!(data_dir = %config.data_dir.display(), compaction = ?engine.compaction_strategy(), "repl starting");

    println!(
        "RiptideKV started (seq={}, data_dir={}, compaction={:?})",
        engine.seq(),
        config.data_dir.display(),
        engine.compaction_strategy()
    );
    print_help();
    prompt();

    let stdin = io::stdin();
    let mut exit_code = 0;

    for line in stdin.lock().lines() {
        let line = line?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match dispatch(&engine, &tokens) {
            Outcome::Continue => {}
            Outcome::Exit => break,
            Outcome::Fatal => {
                exit_code = 1;
                break;
            }
        }
        prompt();
    }

    engine.shutdown();
    std::process::exit(exit_code);
}

fn prompt() {
    print!("> ");
    io::stdout().flush().ok();
}

enum Outcome {
    Continue,
    Exit,
    Fatal,
}

fn dispatch(engine: &Engine, tokens: &[&str]) -> Outcome {
    let Some(cmd) = tokens.first() else { return Outcome::Continue };
    let args = &tokens[1..];

    match cmd.to_ascii_uppercase().as_str() {
        "PUT" => cmd_put(engine, args),
        "GET" => cmd_get(engine, args),
        "DEL" => cmd_del(engine, args),
        "SCAN" => cmd_scan(engine, args),
        "PREFIX_SCAN" => cmd_prefix_scan(engine, args),
        "SNAPSHOT" => cmd_snapshot(engine),
        "GET_AT" => cmd_get_at(engine, args),
        "RELEASE" => cmd_release(engine, args),
        "FLUSH" => cmd_flush(engine),
        "COMPACT" => cmd_compact(engine),
        "SET_COMPACTION" => cmd_set_compaction(engine, args),
        "STATS" => {
            println!("{:?}", engine);
            Outcome::Continue
        }
        "LSM" => cmd_lsm(engine),
        "BATCH" => cmd_batch(engine, args),
        "GET_WHERE" => cmd_get_where(engine, args),
        "COUNT" => cmd_count(engine, args),
        "SUM" => cmd_sum(engine, args),
        "AVG" => cmd_avg(engine, args),
        "MIN_MAX" => cmd_min_max(engine, args),
        "SCAN_ORDER" => cmd_scan_order(engine, args),
        "HELP" => {
            print_help();
            Outcome::Continue
        }
        "MAN" => {
            cmd_man(args);
            Outcome::Continue
        }
        "EXIT" | "QUIT" => {
            println!("bye");
            Outcome::Exit
        }
        other => {
            println!("ERR unknown command: {other}");
            Outcome::Continue
        }
    }
}

fn report_engine_error(e: EngineError) -> Outcome {
    match e {
        EngineError::Fatal(msg) => {
            tracing::error!(%msg, "engine poisoned, REPL shutting down");
            println!("FATAL {msg}");
            Outcome::Fatal
        }
        other => {
            println!("ERR {other}");
            Outcome::Continue
        }
    }
}

fn cmd_put(engine: &Engine, args: &[&str]) -> Outcome {
    let (Some(k), Some(v)) = (args.first(), args.get(1)) else {
        println!("ERR usage: PUT k v");
        return Outcome::Continue;
    };
    match engine.put(k.as_bytes().to_vec(), v.as_bytes().to_vec()) {
        Ok(_) => {
            println!("OK");
            Outcome::Continue
        }
        Err(e) => report_engine_error(e),
    }
}

fn cmd_get(engine: &Engine, args: &[&str]) -> Outcome {
    let Some(k) = args.first() else {
        println!("ERR usage: GET k");
        return Outcome::Continue;
    };
    match engine.get(k.as_bytes()) {
        Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
        Ok(None) => println!("(nil)"),
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn cmd_del(engine: &Engine, args: &[&str]) -> Outcome {
    let Some(k) = args.first() else {
        println!("ERR usage: DEL k");
        return Outcome::Continue;
    };
    match engine.del(k.as_bytes().to_vec()) {
        Ok(_) => {
            println!("OK");
            Outcome::Continue
        }
        Err(e) => report_engine_error(e),
    }
}

fn cmd_scan(engine: &Engine, args: &[&str]) -> Outcome {
    let start = args.first().copied().unwrap_or("").as_bytes();
    let end = args.get(1).copied().unwrap_or("").as_bytes();
    match engine.scan(start, end) {
        Ok(entries) => print_entries(&entries),
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn cmd_prefix_scan(engine: &Engine, args: &[&str]) -> Outcome {
    let Some(prefix) = args.first() else {
        println!("ERR usage: PREFIX_SCAN p");
        return Outcome::Continue;
    };
    let end = prefix_upper_bound(prefix.as_bytes());
    let result = match &end {
        Some(end) => engine.scan(prefix.as_bytes(), end),
        None => engine.scan(prefix.as_bytes(), b""),
    };
    match result {
        Ok(entries) => print_entries(&entries),
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

/// Smallest byte string strictly greater than every string starting with
/// `prefix`, used as `scan`'s exclusive upper bound. `None` when `prefix`
/// is all `0xff` bytes (or empty), in which case there is no finite bound.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(&last) = bound.last() {
        if last == 0xff {
            bound.pop();
        } else {
            *bound.last_mut().unwrap() += 1;
            return Some(bound);
        }
    }
    None
}

fn cmd_snapshot(engine: &Engine) -> Outcome {
    println!("{}", engine.create_snapshot());
    Outcome::Continue
}

fn cmd_get_at(engine: &Engine, args: &[&str]) -> Outcome {
    let (Some(k), Some(snap)) = (args.first(), args.get(1)) else {
        println!("ERR usage: GET_AT k snap");
        return Outcome::Continue;
    };
    let Ok(snap) = snap.parse::<u64>() else {
        println!("ERR invalid snapshot: {snap}");
        return Outcome::Continue;
    };
    match engine.get_at(k.as_bytes(), snap) {
        Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
        Ok(None) => println!("(nil)"),
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn cmd_release(engine: &Engine, args: &[&str]) -> Outcome {
    let Some(snap) = args.first() else {
        println!("ERR usage: RELEASE snap");
        return Outcome::Continue;
    };
    let Ok(snap) = snap.parse::<u64>() else {
        println!("ERR invalid snapshot: {snap}");
        return Outcome::Continue;
    };
    engine.release_snapshot(snap);
    println!("OK");
    Outcome::Continue
}

fn cmd_flush(engine: &Engine) -> Outcome {
    match engine.flush() {
        Ok(()) => {
            println!("OK (levels={:?})", engine.level_counts());
            Outcome::Continue
        }
        Err(e) => report_engine_error(e),
    }
}

fn cmd_compact(engine: &Engine) -> Outcome {
    engine.compact();
    println!("OK (levels={:?})", engine.level_counts());
    Outcome::Continue
}

fn cmd_set_compaction(engine: &Engine, args: &[&str]) -> Outcome {
    let Some(kind) = args.first() else {
        println!("ERR usage: SET_COMPACTION {{LEVELED|TIERED|SIZE_TIERED|TIME_WINDOW}}");
        return Outcome::Continue;
    };
    match CompactionKind::from_str(kind) {
        Ok(kind) => {
            engine.set_compaction_strategy(kind);
            println!("OK");
        }
        Err(e) => println!("ERR {e}"),
    }
    Outcome::Continue
}

fn cmd_lsm(engine: &Engine) -> Outcome {
    for (level, count) in engine.level_counts().iter().enumerate() {
        println!("L{level}: {count} sstables");
    }
    println!("memtable_size={}", engine.memtable_size());
    Outcome::Continue
}

/// `BATCH PUT k1 v1 GET k2 DEL k3 ...` — a sequence of sub-operations on
/// one line, run in order; each sub-op's output is prefixed with its
/// index so results line up with input.
fn cmd_batch(engine: &Engine, args: &[&str]) -> Outcome {
    let mut i = 0usize;
    let mut index = 0usize;
    while i < args.len() {
        let op = args[i].to_ascii_uppercase();
        let result = match op.as_str() {
            "PUT" => {
                let (Some(k), Some(v)) = (args.get(i + 1), args.get(i + 2)) else {
                    println!("[{index}] ERR usage: PUT k v");
                    break;
                };
                i += 3;
                engine.put(k.as_bytes().to_vec(), v.as_bytes().to_vec()).map(|_| "OK".to_string())
            }
            "GET" => {
                let Some(k) = args.get(i + 1) else {
                    println!("[{index}] ERR usage: GET k");
                    break;
                };
                i += 2;
                engine.get(k.as_bytes()).map(|v| match v {
                    Some(v) => String::from_utf8_lossy(&v).into_owned(),
                    None => "(nil)".to_string(),
                })
            }
            "DEL" => {
                let Some(k) = args.get(i + 1) else {
                    println!("[{index}] ERR usage: DEL k");
                    break;
                };
                i += 2;
                engine.del(k.as_bytes().to_vec()).map(|_| "OK".to_string())
            }
            other => {
                println!("[{index}] ERR unknown batch op: {other}");
                break;
            }
        };
        match result {
            Ok(line) => println!("[{index}] {line}"),
            Err(e) => {
                println!("[{index}] ERR {e}");
                if matches!(e, EngineError::Fatal(_)) {
                    return Outcome::Fatal;
                }
            }
        }
        index += 1;
    }
    Outcome::Continue
}

fn cmd_get_where(engine: &Engine, args: &[&str]) -> Outcome {
    let Some((condition, limit)) = parse_condition_with_limit(args) else {
        println!("ERR usage: GET_WHERE field op value [LIMIT n]");
        return Outcome::Continue;
    };
    match engine.scan(b"", b"") {
        Ok(entries) => {
            let mut count = 0usize;
            for (k, v) in &entries {
                if query::evaluate(k, v, &condition) {
                    println!("{} -> {}", String::from_utf8_lossy(k), String::from_utf8_lossy(v));
                    count += 1;
                    if let Some(limit) = limit {
                        if count >= limit {
                            break;
                        }
                    }
                }
            }
            println!("({count} entries)");
        }
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn parse_condition_with_limit<'a>(args: &[&'a str]) -> Option<(Condition<'a>, Option<usize>)> {
    if args.len() < 3 {
        return None;
    }
    let field = match args[0].to_ascii_uppercase().as_str() {
        "KEY" => Field::Key,
        "VALUE" => Field::Value,
        _ => return None,
    };
    let op = ConditionOp::parse(args[1])?;
    let value = args[2];
    let limit = if args.len() >= 5 && args[3].eq_ignore_ascii_case("LIMIT") {
        args[4].parse::<usize>().ok()
    } else {
        None
    };
    Some((Condition { field, op, value }, limit))
}

fn cmd_count(engine: &Engine, args: &[&str]) -> Outcome {
    let condition = if args.first().is_some_and(|a| a.eq_ignore_ascii_case("WHERE")) {
        match parse_condition_with_limit(&args[1..]) {
            Some((c, _)) => Some(c),
            None => {
                println!("ERR usage: COUNT [WHERE field op value]");
                return Outcome::Continue;
            }
        }
    } else {
        None
    };

    match engine.scan(b"", b"") {
        Ok(entries) => {
            let count = match &condition {
                Some(c) => entries.iter().filter(|(k, v)| query::evaluate(k, v, c)).count(),
                None => entries.len(),
            };
            println!("{count}");
        }
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn cmd_sum(engine: &Engine, args: &[&str]) -> Outcome {
    let pattern = args.first().copied().unwrap_or("");
    match engine.scan(b"", b"") {
        Ok(entries) => {
            let summary = query::summarize(&entries, pattern);
            println!("sum={} count={}", summary.sum, summary.count);
        }
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn cmd_avg(engine: &Engine, args: &[&str]) -> Outcome {
    let pattern = args.first().copied().unwrap_or("");
    match engine.scan(b"", b"") {
        Ok(entries) => {
            let summary = query::summarize(&entries, pattern);
            println!("avg={} count={}", summary.avg(), summary.count);
        }
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn cmd_min_max(engine: &Engine, args: &[&str]) -> Outcome {
    let pattern = args.first().copied().unwrap_or("");
    match engine.scan(b"", b"") {
        Ok(entries) => {
            let summary = query::summarize(&entries, pattern);
            println!("min={} max={} count={}", summary.min, summary.max, summary.count);
        }
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn cmd_scan_order(engine: &Engine, args: &[&str]) -> Outcome {
    let Some(order) = args.first().and_then(|a| SortOrder::parse(a)) else {
        println!("ERR usage: SCAN_ORDER {{ASC|DESC}} [lo hi] [LIMIT n]");
        return Outcome::Continue;
    };
    let mut rest = &args[1..];
    let mut lo = "";
    let mut hi = "";
    if rest.len() >= 2 && !rest[0].eq_ignore_ascii_case("LIMIT") {
        lo = rest[0];
        hi = rest[1];
        rest = &rest[2..];
    }
    let limit = if rest.len() >= 2 && rest[0].eq_ignore_ascii_case("LIMIT") {
        rest[1].parse::<usize>().ok()
    } else {
        None
    };

    match engine.scan(lo.as_bytes(), hi.as_bytes()) {
        Ok(entries) => {
            let mut entries = query::apply_order(entries, order);
            if let Some(limit) = limit {
                entries.truncate(limit);
            }
            print_entries(&entries);
        }
        Err(e) => return report_engine_error(e),
    }
    Outcome::Continue
}

fn print_entries(entries: &[(Vec<u8>, Vec<u8>)]) {
    if entries.is_empty() {
        println!("(empty)");
        return;
    }
    for (k, v) in entries {
        println!("{} -> {}", String::from_utf8_lossy(k), String::from_utf8_lossy(v));
    }
    println!("({} entries)", entries.len());
}

fn print_help() {
    println!("Commands: PUT k v | GET k | DEL k | SCAN lo hi | PREFIX_SCAN p | SNAPSHOT");
    println!("          GET_AT k snap | RELEASE snap | FLUSH | COMPACT | SET_COMPACTION kind");
    println!("          STATS | LSM | BATCH op args... | GET_WHERE field op value [LIMIT n]");
    println!("          COUNT [WHERE ...] | SUM [pattern] | AVG [pattern] | MIN_MAX [pattern]");
    println!("          SCAN_ORDER ASC|DESC [lo hi] [LIMIT n] | HELP | MAN cmd | EXIT");
}

fn cmd_man(args: &[&str]) {
    let Some(cmd) = args.first() else {
        println!("ERR usage: MAN cmd");
        return;
    };
    let text = match cmd.to_ascii_uppercase().as_str() {
        "PUT" => "PUT k v - insert or overwrite a key",
        "GET" => "GET k - look up the newest live value for a key",
        "DEL" => "DEL k - write a tombstone for a key",
        "SCAN" => "SCAN lo hi - ascending range scan, lo inclusive, hi exclusive; empty bound is open",
        "PREFIX_SCAN" => "PREFIX_SCAN p - every live key starting with p",
        "SNAPSHOT" => "SNAPSHOT - pin the current seq, print its id",
        "GET_AT" => "GET_AT k snap - read k as of a pinned snapshot",
        "RELEASE" => "RELEASE snap - unpin a snapshot",
        "FLUSH" => "FLUSH - synchronously seal and flush the active memtable",
        "COMPACT" => "COMPACT - synchronously run the current compaction strategy to completion",
        "SET_COMPACTION" => "SET_COMPACTION {LEVELED|TIERED|SIZE_TIERED|TIME_WINDOW} - change strategy",
        "STATS" => "STATS - debug dump of engine state",
        "LSM" => "LSM - sstable count per level, memtable size",
        "BATCH" => "BATCH op args... - run a sequence of PUT/GET/DEL sub-ops in order",
        "GET_WHERE" => "GET_WHERE field op value [LIMIT n] - filter a full scan by key or value",
        "COUNT" => "COUNT [WHERE field op value] - count live entries, optionally filtered",
        "SUM" => "SUM [pattern] - sum numeric values whose key matches pattern",
        "AVG" => "AVG [pattern] - average of SUM's matched values",
        "MIN_MAX" => "MIN_MAX [pattern] - min/max of numeric values whose key matches pattern",
        "SCAN_ORDER" => "SCAN_ORDER {ASC|DESC} [lo hi] [LIMIT n] - range scan in either key order",
        "HELP" => "HELP - list all commands",
        "MAN" => "MAN cmd - show this help for one command",
        "EXIT" | "QUIT" => "EXIT - flush, shut down workers, quit",
        other => {
            println!("ERR no manual entry for: {other}");
            return;
        }
    };
    println!("{text}");
}
