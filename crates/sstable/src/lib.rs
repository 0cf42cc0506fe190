//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the RiptideKV storage engine.
//!
//! When the in-memory [`memtable::Memtable`] exceeds its size threshold the
//! engine flushes it to disk as an SSTable. SSTables are *write-once,
//! read-many* — once created they are never modified (only replaced during
//! compaction).
//!
//! ## File layout (v3 – current)
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA SECTION (sorted key/value records)                        │
//! │                                                               │
//! │ crc32 (u32) | key_len (u32) | key | seq (u64)                 │
//! │ present (u8) | [val_len (u32) | val]                           │
//! │                                                               │
//! │ ... repeated for each entry ...                                │
//! │                                                               │
//! │ The CRC32 covers everything after itself in the               │
//! │ record (key_len through end of value). This detects           │
//! │ silent disk corruption on reads.                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ BLOOM SECTION (serialized BloomFilter)                         │
//! │                                                               │
//! │ num_bits (u64) | num_hashes (u32)                              │
//! │ bits_len (u32) | bits (bytes)                                 │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX SECTION (key -> data_offset mapping)                     │
//! │                                                               │
//! │ key_len (u32) | key | data_offset (u64)                        │
//! │                                                               │
//! │ ... repeated for each entry ...                                │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 28 bytes)                                  │
//! │                                                               │
//! │ max_seq (u64 LE) | bloom_offset (u64 LE)                       │
//! │ index_offset (u64 LE) | magic (u32 LE) "SST3"                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. v4 (current) replaces the flat DATA
//! section with bounded-size blocks and a sparse block index; a single
//! user_key's version run is never split across a block boundary, so a
//! reader that has located the right block has located every version of the
//! key. The reader also supports v1-v3 files for backward compatibility.
//!
//! ## Version history
//!
//! | Version | Magic | Footer | Features                                     |
//! |---------|-------|--------|-----------------------------------------------|
//! | v1      | `SST1`| 12 B   | Basic DATA + INDEX                            |
//! | v2      | `SST2`| 20 B   | + Bloom filter section                        |
//! | v3      | `SST3`| 28 B   | + Per-record CRC32, max_seq in footer          |
//! | v4      | `SST4`| 36 B   | + Block structure, sparse index, file_id       |

mod block_cache;
mod format;
mod merge;
mod reader;
mod writer;

pub use block_cache::{BlockCache, BlockKey};
pub use format::{
    FOOTER_BYTES, FOOTER_BYTES_V2, FOOTER_BYTES_V3, FOOTER_BYTES_V4, SSTABLE_MAGIC,
    SSTABLE_MAGIC_V2, SSTABLE_MAGIC_V3, SSTABLE_MAGIC_V4,
};
pub use merge::{drop_obsolete_versions, take_while_prefix, MergeIterator};
pub use reader::{next_file_id, SSTableReader};
pub use writer::{SSTableWriter, BLOCK_SIZE_TARGET};

#[cfg(test)]
mod tests;
