//! # Memtable Module
//!
//! The mutable in-memory write buffer of the storage engine: an ordered
//! skip-list map of `key → (value, op, seq)` mirrored by a write-ahead log.
//!
//! ## Design Invariants
//!
//! - Every mutation is appended to the WAL *before* the in-memory insert
//!   and is assigned a monotonically increasing sequence number.
//! - A key holds exactly one entry; re-inserting replaces the payload
//!   (value, op, seq) without changing the key count.
//! - Deletes are tombstone entries ([`Op::Del`]), not physical removals;
//!   they shadow older on-disk versions until compaction reclaims them.
//! - `needs_flush` is true once the approximate byte footprint exceeds the
//!   configured write buffer size.
//!
//! ## Iterator pinning
//!
//! The skip list lives behind an `Arc`, and cursors clone that handle.
//! A memtable reset therefore never invalidates a live iterator: the
//! retired map stays alive until the last handle drops.
//!
//! ## Frozen Memtable
//!
//! - A [`FrozenMemtable`] is read-only.
//! - It retains ownership of its WAL so durability is guaranteed until the
//!   data has been persisted to an SSTable, at which point the WAL file is
//!   removed.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;
use tracing::{info, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::wal::{Wal, WalError};

// ------------------------------------------------------------------------------------------------
// Limits
// ------------------------------------------------------------------------------------------------

/// Maximum accepted key length (16 KiB).
pub const MAX_KEY_LEN: usize = 16 * 1024;

/// Maximum accepted value length (1 MiB).
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, Error)]
pub enum MemtableError {
    /// Underlying WAL I/O failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Rejected key or value (empty, or beyond the size limits).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Data model
// ------------------------------------------------------------------------------------------------

/// The operation recorded for a key version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Insert or update.
    Add,
    /// Point tombstone.
    Del,
}

impl encoding::Encode for Op {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        let tag: u8 = match self {
            Op::Add => 0,
            Op::Del => 1,
        };
        tag.encode_to(buf)
    }
}

impl encoding::Decode for Op {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, n) = u8::decode_from(buf)?;
        let op = match tag {
            0 => Op::Add,
            1 => Op::Del,
            other => {
                return Err(EncodingError::InvalidTag {
                    tag: other,
                    type_name: "Op",
                });
            }
        };
        Ok((op, n))
    }
}

/// The payload stored for a key in the skip list.
///
/// `value` is empty for tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    /// The stored value bytes. Empty when `op` is [`Op::Del`].
    pub value: Vec<u8>,

    /// Whether this version is an insert or a tombstone.
    pub op: Op,

    /// Sequence number ordering this version against all others.
    pub seq: u64,
}

/// The ordered map type backing the memtable.
pub type MemtableMap = SkipMap<Vec<u8>, VersionEntry>;

/// A logical WAL record mirroring one memtable mutation.
#[derive(Debug, PartialEq)]
pub enum MemtableRecord {
    /// Insert or update a single key.
    Add {
        key: Vec<u8>,
        value: Vec<u8>,
        seq: u64,
    },

    /// Delete a single key (tombstone; no value bytes on the wire).
    Del { key: Vec<u8>, seq: u64 },
}

impl encoding::Encode for MemtableRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            MemtableRecord::Add { key, value, seq } => {
                0u8.encode_to(buf)?;
                key.encode_to(buf)?;
                value.encode_to(buf)?;
                seq.encode_to(buf)?;
            }
            MemtableRecord::Del { key, seq } => {
                1u8.encode_to(buf)?;
                key.encode_to(buf)?;
                seq.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl encoding::Decode for MemtableRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u8::decode_from(buf)?;
        match tag {
            0 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((MemtableRecord::Add { key, value, seq }, offset))
            }
            1 => {
                let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((MemtableRecord::Del { key, seq }, offset))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "MemtableRecord",
            }),
        }
    }
}

/// Result of a point lookup against one layer of the store.
#[derive(Debug, PartialEq)]
pub enum LookupResult {
    /// A live value for the key.
    Value(Vec<u8>),

    /// The key is shadowed by a tombstone; report not-found to the caller
    /// and stop consulting older layers.
    Tombstone,

    /// This layer knows nothing about the key.
    Miss,
}

// ------------------------------------------------------------------------------------------------
// Memtable Core
// ------------------------------------------------------------------------------------------------

/// The mutable, in-memory write buffer.
///
/// # Concurrency
///
/// The skip list supports concurrent readers; the engine's reader/writer
/// gate serializes mutators against readers, and all bookkeeping here is
/// atomic, so `&self` methods are safe from any thread.
///
/// # Durability
///
/// Every mutation is appended to the WAL before being applied in memory.
pub struct Memtable {
    /// Ordered concurrent map; `Arc` so cursors can pin it across a reset.
    map: Arc<MemtableMap>,

    /// Associated write-ahead log.
    wal: Wal<MemtableRecord>,

    /// Next sequence number to assign.
    next_seq: AtomicU64,

    /// Number of add operations accepted.
    add_count: AtomicU64,

    /// Number of delete operations accepted.
    del_count: AtomicU64,

    /// Approximate in-memory footprint in bytes.
    approximate_size: AtomicUsize,

    /// Byte threshold above which `needs_flush` reports true.
    write_buffer_size: usize,
}

impl Memtable {
    /// Creates a memtable backed by the WAL at `wal_path`, replaying any
    /// existing records to reconstruct in-memory state.
    ///
    /// A truncated record at the very end of the log is the footprint of an
    /// interrupted append whose mutation was never acknowledged; replay
    /// stops there. Any other corruption surfaces as an error.
    pub fn open<P: AsRef<Path>>(wal_path: P, write_buffer_size: usize) -> Result<Self, MemtableError> {
        let wal = Wal::open(&wal_path, None)?;

        let map = SkipMap::new();
        let mut max_seq_seen: u64 = 0;
        let mut approximate_size: usize = 0;
        let mut add_count: u64 = 0;
        let mut del_count: u64 = 0;
        let mut replayed: u64 = 0;

        for record in wal.replay_iter()? {
            let record = match record {
                Ok(record) => record,
                Err(WalError::TruncatedTail) => {
                    warn!(path = %wal.path().display(), "WAL ends in a partial record, stopping replay");
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            replayed += 1;
            match record {
                MemtableRecord::Add { key, value, seq } => {
                    max_seq_seen = max_seq_seen.max(seq);
                    approximate_size += entry_footprint(&key, &value);
                    add_count += 1;
                    map.insert(
                        key,
                        VersionEntry {
                            value,
                            op: Op::Add,
                            seq,
                        },
                    );
                }
                MemtableRecord::Del { key, seq } => {
                    max_seq_seen = max_seq_seen.max(seq);
                    approximate_size += entry_footprint(&key, &[]);
                    del_count += 1;
                    map.insert(
                        key,
                        VersionEntry {
                            value: Vec::new(),
                            op: Op::Del,
                            seq,
                        },
                    );
                }
            }
        }

        if replayed > 0 {
            info!(
                records = replayed,
                max_seq = max_seq_seen,
                "memtable reconstructed from WAL"
            );
        }

        Ok(Self {
            map: Arc::new(map),
            wal,
            next_seq: AtomicU64::new(max_seq_seen.saturating_add(1)),
            add_count: AtomicU64::new(add_count),
            del_count: AtomicU64::new(del_count),
            approximate_size: AtomicUsize::new(approximate_size),
            write_buffer_size,
        })
    }

    /// Inserts or updates a key.
    ///
    /// The mutation is appended to the WAL first, then applied to the skip
    /// list under a freshly assigned sequence number.
    pub fn add(&self, key: &[u8], value: &[u8]) -> Result<(), MemtableError> {
        validate_key_value(key, Some(value))?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        self.wal.append(&MemtableRecord::Add {
            key: key.to_vec(),
            value: value.to_vec(),
            seq,
        })?;

        self.map.insert(
            key.to_vec(),
            VersionEntry {
                value: value.to_vec(),
                op: Op::Add,
                seq,
            },
        );

        self.add_count.fetch_add(1, Ordering::Relaxed);
        self.approximate_size
            .fetch_add(entry_footprint(key, value), Ordering::Relaxed);

        trace!(seq, key_len = key.len(), value_len = value.len(), "memtable add");
        Ok(())
    }

    /// Deletes a key by inserting a tombstone entry.
    ///
    /// The key remains present in the map but resolves to
    /// [`LookupResult::Tombstone`] until compacted away.
    pub fn remove(&self, key: &[u8]) -> Result<(), MemtableError> {
        validate_key_value(key, None)?;

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);

        self.wal.append(&MemtableRecord::Del {
            key: key.to_vec(),
            seq,
        })?;

        self.map.insert(
            key.to_vec(),
            VersionEntry {
                value: Vec::new(),
                op: Op::Del,
                seq,
            },
        );

        self.del_count.fetch_add(1, Ordering::Relaxed);
        self.approximate_size
            .fetch_add(entry_footprint(key, &[]), Ordering::Relaxed);

        trace!(seq, key_len = key.len(), "memtable remove");
        Ok(())
    }

    /// Looks up the current version of a key.
    pub fn get(&self, key: &[u8]) -> LookupResult {
        match self.map.get(key) {
            Some(entry) => match entry.value().op {
                Op::Add => LookupResult::Value(entry.value().value.clone()),
                Op::Del => LookupResult::Tombstone,
            },
            None => LookupResult::Miss,
        }
    }

    /// True once the write buffer threshold has been crossed and the
    /// memtable should be flushed to a level-0 SSTable.
    pub fn needs_flush(&self) -> bool {
        self.approximate_size.load(Ordering::Relaxed) > self.write_buffer_size
    }

    /// Number of distinct keys currently held.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no keys are held.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of accepted add operations.
    pub fn add_count(&self) -> u64 {
        self.add_count.load(Ordering::Relaxed)
    }

    /// Number of accepted delete operations.
    pub fn del_count(&self) -> u64 {
        self.del_count.load(Ordering::Relaxed)
    }

    /// Shared handle to the underlying map, used by cursors to pin the
    /// skip list across a memtable reset.
    pub fn map(&self) -> Arc<MemtableMap> {
        Arc::clone(&self.map)
    }

    /// The WAL segment sequence number backing this memtable.
    pub fn wal_seq(&self) -> u64 {
        self.wal.wal_seq()
    }

    /// Highest assigned sequence number so far (0 if none).
    pub fn max_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// Override the sequence counter with a recovered global maximum.
    ///
    /// Must only be called during recovery, before any writes, so future
    /// sequence numbers stay above everything already on disk.
    pub fn inject_max_seq(&self, seq: u64) {
        self.next_seq.store(seq.saturating_add(1), Ordering::SeqCst);
    }

    /// Force the WAL to stable storage.
    pub fn sync_wal(&self) -> Result<(), MemtableError> {
        self.wal.sync()?;
        Ok(())
    }

    /// Converts this memtable into an immutable [`FrozenMemtable`],
    /// preventing further writes by construction.
    pub fn into_frozen(self) -> FrozenMemtable {
        FrozenMemtable {
            map: self.map,
            wal: std::sync::Mutex::new(Some(self.wal)),
            max_seq: self.next_seq.load(Ordering::SeqCst).saturating_sub(1),
        }
    }
}

fn entry_footprint(key: &[u8], value: &[u8]) -> usize {
    std::mem::size_of::<VersionEntry>() + key.len() + value.len()
}

fn validate_key_value(key: &[u8], value: Option<&[u8]>) -> Result<(), MemtableError> {
    if key.is_empty() {
        return Err(MemtableError::InvalidArgument("empty key".into()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(MemtableError::InvalidArgument(format!(
            "key length {} exceeds limit {MAX_KEY_LEN}",
            key.len()
        )));
    }
    if let Some(value) = value {
        if value.is_empty() {
            return Err(MemtableError::InvalidArgument("empty value".into()));
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(MemtableError::InvalidArgument(format!(
                "value length {} exceeds limit {MAX_VALUE_LEN}",
                value.len()
            )));
        }
    }
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// Frozen Memtable
// ------------------------------------------------------------------------------------------------

/// An immutable, read-only snapshot of a retired memtable.
///
/// Produced by a memtable reset and published in the SST manager's
/// immutable slot so readers and iterators can keep consulting it while
/// its contents are being written to a level-0 SSTable. Owns the WAL until
/// that flush is durable.
pub struct FrozenMemtable {
    map: Arc<MemtableMap>,

    /// Owned until [`FrozenMemtable::remove_wal`] deletes the file; behind
    /// a mutex because the snapshot itself is shared via `Arc`.
    wal: std::sync::Mutex<Option<Wal<MemtableRecord>>>,

    max_seq: u64,
}

impl FrozenMemtable {
    /// Looks up the version of a key in this snapshot.
    pub fn get(&self, key: &[u8]) -> LookupResult {
        match self.map.get(key) {
            Some(entry) => match entry.value().op {
                Op::Add => LookupResult::Value(entry.value().value.clone()),
                Op::Del => LookupResult::Tombstone,
            },
            None => LookupResult::Miss,
        }
    }

    /// Shared handle to the frozen map for cursors.
    pub fn map(&self) -> Arc<MemtableMap> {
        Arc::clone(&self.map)
    }

    /// All entries in key order, ready for the SSTable writer.
    pub fn entries(&self) -> Vec<(Vec<u8>, VersionEntry)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of distinct keys in the snapshot.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when the snapshot holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Highest sequence number captured in this snapshot.
    pub fn max_seq(&self) -> u64 {
        self.max_seq
    }

    /// Delete the WAL now that the snapshot is durable in an SSTable.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn remove_wal(&self) -> Result<(), MemtableError> {
        let wal = self
            .wal
            .lock()
            .map_err(|_| MemtableError::Internal("Mutex poisoned".into()))?
            .take();
        if let Some(wal) = wal {
            wal.remove()?;
        }
        Ok(())
    }
}
