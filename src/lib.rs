//! # StratumDB
//!
//! An embeddable, persistent, ordered key-value storage engine built on a
//! **leveled Log-Structured Merge Tree (LSM-tree)**. Designed for fast
//! writes, ordered iteration, and crash recovery via WAL replay.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                         Db                             │
//! │         reader/writer gate  ·  telemetry               │
//! │  ┌────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │  Memtable  │  │  Immutable   │  │  SST levels   │   │
//! │  │ (skip list)│  │  memtable    │  │  L0 … Ln      │   │
//! │  │  + WAL     │  │  + WAL       │  │  (on disk)    │   │
//! │  └─────┬──────┘  └──────┬───────┘  └──────┬────────┘   │
//! │        │    reset       │    flush        │            │
//! │        └────────►       └────────►        │            │
//! │                                           │            │
//! │  ┌────────────────────────────────────────┘            │
//! │  │  Leveled compaction (level → level + 1)             │
//! │  └──────────────────────────────────────────────────┐  │
//! │  ┌──────────────────────────────────────────────────┴┐ │
//! │  │          Manifest (snapshot + event log)           │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`db`] | Façade — open, close, add, remove, get, merged iteration |
//! | [`memtable`] | Skip-list write buffer backed by a write-ahead log |
//! | [`wal`] | Generic, CRC-protected write-ahead log for crash recovery |
//! | [`sstable`] | Immutable, sorted, block-based on-disk tables |
//! | [`sst_manager`] | Per-level file organization, flush, and compaction |
//! | [`iterators`] | Chained and heap-merged cursors over sorted runs |
//! | [`manifest`] | Persistent metadata (snapshot + event log model) |
//! | [`encoding`] | Crate-owned, byte-stable binary wire format |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation hits the WAL before the
//!   in-memory skip list, so reopen restores the last durable memtable.
//! - **Leveled on-disk layout** — level 0 holds possibly-overlapping flush
//!   output newest-first; levels ≥ 1 hold non-overlapping, binary-searchable
//!   sorted runs kept within per-level size targets by compaction.
//! - **Tombstone deletes** — removals shadow older versions until compaction
//!   reclaims them at the bottom level.
//! - **Ordered iteration** — a merged cursor over the live memtable, the
//!   in-flight immutable memtable, and every on-disk level, deduplicated by
//!   key and skipping tombstones.
//! - **Bloom filter lookups** — each table carries a bloom filter for fast
//!   negative point lookups, plus an LRU block cache on the read path.
//! - **Reader/writer gating** — concurrent readers, serialized writers, with
//!   a writer-preferring admission protocol owned by the `Db` object.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stratumdb::db::Db;
//!
//! let db = Db::open("/tmp/my_db").unwrap();
//!
//! db.add(b"hello", b"world").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! db.remove(b"hello").unwrap();
//! assert_eq!(db.get(b"hello").unwrap(), None);
//!
//! let mut iter = db.iterator().unwrap();
//! iter.seek(b"").unwrap();
//! while iter.valid() {
//!     println!("{:?} = {:?}", iter.key(), iter.value());
//!     iter.next().unwrap();
//! }
//!
//! db.close().unwrap();
//! ```

pub mod db;
pub mod encoding;
pub mod iterators;
pub mod manifest;
pub mod memtable;
pub mod sst_manager;
pub mod sstable;
pub mod wal;
