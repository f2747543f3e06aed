//! # Manifest Component
//!
//! The manifest is the metadata authority for the store. It records, per
//! base directory:
//!
//! - the active WAL segment id,
//! - the last globally assigned sequence number,
//! - the next SSTable file id to allocate,
//! - every live SSTable together with the level it belongs to.
//!
//! Reopen reconstructs the LSM layout from the manifest alone — payload
//! files are never rescanned to discover state, and `.sst` files the
//! manifest does not know about (crashed flushes, superseded compaction
//! inputs) are deleted.
//!
//! ## Durability strategy
//!
//! Metadata persists through a **snapshot + event log** model:
//!
//! 1. `manifest.log` — a single-segment, CRC-protected event log of
//!    mutations (WAL switched, seq updated, table added/removed).
//! 2. `MANIFEST` — a checksummed snapshot of the whole structure, written
//!    to a temp file and renamed on [`Manifest::checkpoint`]; the event log
//!    is truncated afterwards.
//! 3. On open: load the snapshot if present (a corrupted snapshot is an
//!    error, not silently skipped), then replay the event log on top.
//!
//! ## Thread safety
//!
//! The in-memory state lives behind a `Mutex`; the event log is internally
//! synchronized. The manifest can be used from any engine thread.

// ------------------------------------------------------------------------------------------------
// Unit tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests;

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, info};

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::wal::{Wal, WalError};

/// Snapshot file name inside the base directory.
const SNAPSHOT_FILENAME: &str = "MANIFEST";

/// Event-log file name. A fixed, single-segment log — it does not rotate
/// and is truncated to zero on each checkpoint.
const EVENT_LOG_FILENAME: &str = "manifest.log";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying event-log failure.
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Snapshot file is corrupted or its checksum mismatched.
    #[error("Snapshot checksum mismatch")]
    SnapshotChecksumMismatch,

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Manifest data structures
// ------------------------------------------------------------------------------------------------

/// Entry describing one live SSTable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTableEntry {
    /// Globally unique SSTable file id.
    pub id: u64,

    /// LSM level the table belongs to.
    pub level: u32,
}

impl Encode for ManifestTableEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        self.level.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for ManifestTableEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (level, n) = u32::decode_from(&buf[offset..])?;
        offset += n;
        Ok((Self { id, level }, offset))
    }
}

/// In-memory representation of the durable manifest state.
#[derive(Debug, Clone, PartialEq)]
struct ManifestData {
    /// Monotonically increasing snapshot version.
    version: u64,

    /// Last globally assigned sequence number.
    last_seq: u64,

    /// Identifier of the current active memtable WAL segment.
    active_wal: u64,

    /// Next SSTable file id to allocate.
    next_file_id: u64,

    /// Every live SSTable with its level.
    tables: Vec<ManifestTableEntry>,
}

impl ManifestData {
    fn fresh() -> Self {
        Self {
            version: 0,
            last_seq: 0,
            active_wal: 1,
            next_file_id: 1,
            tables: Vec::new(),
        }
    }

    fn apply(&mut self, event: &ManifestEvent) {
        match event {
            ManifestEvent::ActiveWal { wal_seq } => self.active_wal = *wal_seq,
            ManifestEvent::SeqUpdated { last_seq } => self.last_seq = (*last_seq).max(self.last_seq),
            ManifestEvent::TableAdded { id, level } => {
                self.tables.push(ManifestTableEntry {
                    id: *id,
                    level: *level,
                });
                self.next_file_id = self.next_file_id.max(id + 1);
            }
            ManifestEvent::TableRemoved { id } => {
                self.tables.retain(|t| t.id != *id);
            }
        }
    }
}

impl Encode for ManifestData {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.version.encode_to(buf)?;
        self.last_seq.encode_to(buf)?;
        self.active_wal.encode_to(buf)?;
        self.next_file_id.encode_to(buf)?;
        encoding::encode_vec(&self.tables, buf)?;
        Ok(())
    }
}

impl Decode for ManifestData {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut offset = 0;
        let (version, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (last_seq, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (active_wal, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (next_file_id, n) = u64::decode_from(&buf[offset..])?;
        offset += n;
        let (tables, n) = encoding::decode_vec::<ManifestTableEntry>(&buf[offset..])?;
        offset += n;
        Ok((
            Self {
                version,
                last_seq,
                active_wal,
                next_file_id,
                tables,
            },
            offset,
        ))
    }
}

/// One logged metadata mutation.
#[derive(Debug, PartialEq)]
enum ManifestEvent {
    /// The active memtable WAL switched segments.
    ActiveWal { wal_seq: u64 },

    /// The last durable sequence number advanced.
    SeqUpdated { last_seq: u64 },

    /// A flushed or compacted SSTable joined the given level.
    TableAdded { id: u64, level: u32 },

    /// A superseded SSTable left the tree.
    TableRemoved { id: u64 },
}

impl Encode for ManifestEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            ManifestEvent::ActiveWal { wal_seq } => {
                0u8.encode_to(buf)?;
                wal_seq.encode_to(buf)?;
            }
            ManifestEvent::SeqUpdated { last_seq } => {
                1u8.encode_to(buf)?;
                last_seq.encode_to(buf)?;
            }
            ManifestEvent::TableAdded { id, level } => {
                2u8.encode_to(buf)?;
                id.encode_to(buf)?;
                level.encode_to(buf)?;
            }
            ManifestEvent::TableRemoved { id } => {
                3u8.encode_to(buf)?;
                id.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for ManifestEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u8::decode_from(buf)?;
        match tag {
            0 => {
                let (wal_seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::ActiveWal { wal_seq }, offset))
            }
            1 => {
                let (last_seq, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::SeqUpdated { last_seq }, offset))
            }
            2 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                let (level, n) = u32::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::TableAdded { id, level }, offset))
            }
            3 => {
                let (id, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((ManifestEvent::TableRemoved { id }, offset))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "ManifestEvent",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Manifest
// ------------------------------------------------------------------------------------------------

/// Persistent metadata manager for one store directory.
#[derive(Debug)]
pub struct Manifest {
    /// In-memory state, kept in sync with the event log.
    data: Mutex<ManifestData>,

    /// Single-segment event log.
    log: Wal<ManifestEvent>,

    /// Base directory holding `MANIFEST` and `manifest.log`.
    dir: PathBuf,
}

impl Manifest {
    /// Open (or create) the manifest in `dir`.
    ///
    /// Loads the snapshot when one exists, then replays the event log on
    /// top of it. A snapshot that fails its checksum is an error.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let dir = dir.as_ref().to_path_buf();

        let snapshot_path = dir.join(SNAPSHOT_FILENAME);
        let mut data = if snapshot_path.exists() {
            Self::load_snapshot(&snapshot_path)?
        } else {
            ManifestData::fresh()
        };

        let log = Wal::open_with_seq(dir.join(EVENT_LOG_FILENAME), 0, None)?;
        let mut replayed = 0u64;
        for event in log.replay_iter()? {
            let event = match event {
                Ok(event) => event,
                Err(WalError::TruncatedTail) => break,
                Err(e) => return Err(e.into()),
            };
            data.apply(&event);
            replayed += 1;
        }

        info!(
            dir = %dir.display(),
            version = data.version,
            tables = data.tables.len(),
            events = replayed,
            "manifest opened"
        );

        Ok(Self {
            data: Mutex::new(data),
            log,
            dir,
        })
    }

    fn load_snapshot(path: &Path) -> Result<ManifestData, ManifestError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        if bytes.len() < 4 {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }

        let (payload, checksum_bytes) = bytes.split_at(bytes.len() - 4);
        let mut stored = [0u8; 4];
        stored.copy_from_slice(checksum_bytes);
        let stored_checksum = u32::from_le_bytes(stored);

        let mut hasher = Crc32::new();
        hasher.update(payload);
        if hasher.finalize() != stored_checksum {
            return Err(ManifestError::SnapshotChecksumMismatch);
        }

        let (data, _) = encoding::decode_from_slice::<ManifestData>(payload)?;
        Ok(data)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ManifestData>, ManifestError> {
        self.data
            .lock()
            .map_err(|_| ManifestError::Internal("Mutex poisoned".into()))
    }

    /// The active memtable WAL segment id.
    pub fn active_wal(&self) -> Result<u64, ManifestError> {
        Ok(self.lock()?.active_wal)
    }

    /// Record a switch to a new active memtable WAL segment.
    pub fn set_active_wal(&self, wal_seq: u64) -> Result<(), ManifestError> {
        let event = ManifestEvent::ActiveWal { wal_seq };
        self.log.append(&event)?;
        self.lock()?.apply(&event);
        Ok(())
    }

    /// The last recorded global sequence number.
    pub fn last_seq(&self) -> Result<u64, ManifestError> {
        Ok(self.lock()?.last_seq)
    }

    /// Advance the recorded global sequence number (never moves backwards).
    pub fn update_seq(&self, last_seq: u64) -> Result<(), ManifestError> {
        let event = ManifestEvent::SeqUpdated { last_seq };
        self.log.append(&event)?;
        self.lock()?.apply(&event);
        Ok(())
    }

    /// Allocate the next SSTable file id.
    ///
    /// The allocation itself is not logged; it becomes durable with the
    /// `TableAdded` event. An id whose table was never added belongs to an
    /// orphan file, which open deletes.
    pub fn allocate_file_id(&self) -> Result<u64, ManifestError> {
        let mut guard = self.lock()?;
        let id = guard.next_file_id;
        guard.next_file_id += 1;
        Ok(id)
    }

    /// Every live table with its level.
    pub fn tables(&self) -> Result<Vec<ManifestTableEntry>, ManifestError> {
        Ok(self.lock()?.tables.clone())
    }

    /// Record a new SSTable at the given level.
    pub fn add_table(&self, id: u64, level: u32) -> Result<(), ManifestError> {
        let event = ManifestEvent::TableAdded { id, level };
        self.log.append(&event)?;
        self.lock()?.apply(&event);
        debug!(id, level, "manifest: table added");
        Ok(())
    }

    /// Record that an SSTable left the tree.
    pub fn remove_table(&self, id: u64) -> Result<(), ManifestError> {
        let event = ManifestEvent::TableRemoved { id };
        self.log.append(&event)?;
        self.lock()?.apply(&event);
        debug!(id, "manifest: table removed");
        Ok(())
    }

    /// Write a checksummed snapshot of the current state and truncate the
    /// event log.
    ///
    /// The snapshot goes to a temp file first and is renamed into place, so
    /// a crash leaves either the old or the new snapshot, never a torn one.
    pub fn checkpoint(&self) -> Result<(), ManifestError> {
        self.log.sync()?;

        let mut guard = self.lock()?;
        guard.version += 1;

        let payload = encoding::encode_to_vec(&*guard)?;
        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let snapshot_path = self.dir.join(SNAPSHOT_FILENAME);
        let tmp_path = self.dir.join(format!("{SNAPSHOT_FILENAME}.tmp"));

        let mut file = File::create(&tmp_path)?;
        file.write_all(&payload)?;
        file.write_all(&checksum.to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &snapshot_path)?;

        info!(version = guard.version, "manifest checkpoint written");
        drop(guard);

        self.log.truncate()?;
        Ok(())
    }

    /// Force the event log to stable storage.
    pub fn sync(&self) -> Result<(), ManifestError> {
        self.log.sync()?;
        Ok(())
    }
}
