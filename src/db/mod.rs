//! # Store façade
//!
//! [`Db`] wires the layers together: the reader/writer gate, the live
//! memtable and its WAL, the immutable-memtable slot, the leveled SSTable
//! manager, the manifest, and per-store telemetry.
//!
//! ## Write path
//!
//! `add`/`remove` take the writer slot of the gate. If the memtable has
//! crossed its buffer threshold it is flushed first: a fresh memtable (on
//! the next WAL segment) is swapped in, the retired one is published as
//! the immutable memtable, written out as a level-0 SSTable, retracted,
//! and its WAL deleted. Compaction then runs inline until every level is
//! back within its target. Finally the mutation lands in the (possibly
//! fresh) memtable, WAL first.
//!
//! ## Read path
//!
//! `get` takes a reader slot — concurrent with other readers, excluded
//! from writers — and consults the live memtable, then the immutable
//! memtable, then level 0 newest-first, then the binary-searched deeper
//! levels. The first hit wins; a tombstone anywhere shadows every older
//! version below it.
//!
//! ## Recovery
//!
//! Open replays the manifest, deletes files the manifest does not know
//! about, flushes any leftover WAL segments from an interrupted flush
//! straight to level 0, and rebuilds the live memtable by replaying the
//! active WAL. Sequence numbers continue above everything recovered.
//!
//! ## Iterators
//!
//! [`DbIterator`] pins the skip lists it reads (via `Arc`) and snapshots
//! the SSTable groups at creation, so a concurrent memtable reset or
//! compaction never invalidates it.

pub mod gate;
pub mod iterator;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use iterator::DbIterator;
pub use telemetry::Telemetry;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manifest::{Manifest, ManifestError};
use crate::memtable::{LookupResult, Memtable, MemtableError, MemtableRecord};
use crate::sst_manager::{SstManager, SstManagerError, SstManagerOptions};
use crate::sstable::SstError;
use crate::wal::Wal;

use gate::AccessGate;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the store façade.
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from the memtable subsystem.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error from the SSTable layer.
    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    /// Error from the SST manager.
    #[error("SST manager error: {0}")]
    SstManager(#[from] SstManagerError),

    /// Error from the manifest.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Rejected key or value (empty, or beyond the size limits). The store
    /// is unchanged.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn map_memtable_err(e: MemtableError) -> DbError {
    match e {
        MemtableError::InvalidArgument(msg) => DbError::InvalidArgument(msg),
        other => DbError::Memtable(other),
    }
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Default LRU block-cache capacity (8 MiB).
pub const DEFAULT_CACHE_SIZE: u64 = 8 * 1024 * 1024;

/// Tuning knobs for a store instance.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// LRU block-cache capacity in bytes.
    pub cache_size_bytes: u64,

    /// Memtable byte threshold that triggers a flush to level 0.
    pub write_buffer_size: usize,

    /// Target data-block size inside SSTables.
    pub block_size: usize,

    /// Number of levels (0 through `max_levels - 1`).
    pub max_levels: usize,

    /// Level-0 file count that triggers compaction into level 1.
    pub level0_compaction_trigger: usize,

    /// Byte target for level 1; each deeper level multiplies by
    /// `level_multiplier`.
    pub level_base_bytes: u64,

    /// Growth factor between consecutive levels.
    pub level_multiplier: u64,

    /// Upper bound for one compaction output file.
    pub max_table_size: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            cache_size_bytes: DEFAULT_CACHE_SIZE,
            write_buffer_size: 4 * 1024 * 1024,
            block_size: crate::sstable::DEFAULT_BLOCK_SIZE,
            max_levels: 7,
            level0_compaction_trigger: 4,
            level_base_bytes: 10 * 1024 * 1024,
            level_multiplier: 10,
            max_table_size: 2 * 1024 * 1024,
        }
    }
}

impl DbConfig {
    fn manager_options(&self) -> SstManagerOptions {
        SstManagerOptions {
            max_levels: self.max_levels,
            level0_compaction_trigger: self.level0_compaction_trigger,
            level_base_bytes: self.level_base_bytes,
            level_multiplier: self.level_multiplier,
            max_table_size: self.max_table_size,
            block_size: self.block_size,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Db
// ------------------------------------------------------------------------------------------------

/// An open store rooted at one base directory.
pub struct Db {
    dir: PathBuf,

    config: DbConfig,

    /// Reader/writer admission control (see [`gate`]).
    gate: AccessGate,

    /// Live write buffer; the lock only guards the swap on reset.
    memtable: RwLock<Memtable>,

    /// On-disk levels, immutable-memtable slot, flush, and compaction.
    sst: SstManager,

    /// Metadata authority, shared with the SST manager.
    manifest: Arc<Manifest>,

    /// Per-store cost accumulators for drivers.
    telemetry: Telemetry,
}

impl Db {
    /// Open (or create) a store with default configuration.
    pub fn open(basedir: impl AsRef<Path>) -> Result<Self, DbError> {
        Self::open_with(basedir, DbConfig::default())
    }

    /// Open (or create) a store with a custom block-cache capacity.
    pub fn open_ex(basedir: impl AsRef<Path>, cache_size_bytes: u64) -> Result<Self, DbError> {
        Self::open_with(
            basedir,
            DbConfig {
                cache_size_bytes,
                ..DbConfig::default()
            },
        )
    }

    /// Open (or create) a store with explicit configuration.
    pub fn open_with(basedir: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        let dir = basedir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let manifest = Arc::new(Manifest::open(&dir)?);
        let sst = SstManager::open(
            &dir,
            config.cache_size_bytes,
            config.manager_options(),
            Arc::clone(&manifest),
        )?;

        let active_wal = manifest.active_wal()?;

        // A WAL segment other than the active one is the footprint of a
        // flush that never completed; its memtable is rebuilt and flushed
        // straight to level 0 before the store serves anything.
        let mut leftover: Vec<(u64, PathBuf)> = Vec::new();
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(seq) = name
                .strip_prefix("wal-")
                .and_then(|s| s.strip_suffix(".log"))
                .and_then(|s| s.parse::<u64>().ok())
            {
                if seq != active_wal {
                    leftover.push((seq, path));
                }
            }
        }
        leftover.sort_by_key(|(seq, _)| *seq);
        for (seq, path) in leftover {
            warn!(seq, "recovering leftover WAL segment");
            let recovered = Memtable::open(&path, config.write_buffer_size)
                .map_err(map_memtable_err)?;
            let frozen = recovered.into_frozen();
            if !frozen.is_empty() {
                sst.flush_frozen(&frozen)?;
            }
            frozen.remove_wal().map_err(map_memtable_err)?;
        }

        let wal_path = dir.join(Wal::<MemtableRecord>::file_name(active_wal));
        let memtable =
            Memtable::open(&wal_path, config.write_buffer_size).map_err(map_memtable_err)?;

        // Sequence numbers must climb above everything already durable.
        let floor = manifest.last_seq()?.max(memtable.max_seq());
        memtable.inject_max_seq(floor);

        info!(
            dir = %dir.display(),
            active_wal,
            seq_floor = floor,
            memtable_keys = memtable.len(),
            "store opened"
        );

        Ok(Self {
            dir,
            config,
            gate: AccessGate::new(),
            memtable: RwLock::new(memtable),
            sst,
            manifest,
            telemetry: Telemetry::new(),
        })
    }

    /// Insert or update a key.
    pub fn add(&self, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let _pass = self.gate.write();
        self.flush_if_needed()?;
        self.memtable.read().add(key, value).map_err(map_memtable_err)
    }

    /// Delete a key (tombstone insert).
    pub fn remove(&self, key: &[u8]) -> Result<(), DbError> {
        let _pass = self.gate.write();
        self.flush_if_needed()?;
        self.memtable.read().remove(key).map_err(map_memtable_err)
    }

    /// Flush and reset the memtable when it has outgrown its buffer.
    /// Caller holds the writer slot.
    fn flush_if_needed(&self) -> Result<(), DbError> {
        let (needs_flush, adds, dels) = {
            let memtable = self.memtable.read();
            (
                memtable.needs_flush(),
                memtable.add_count(),
                memtable.del_count(),
            )
        };
        if needs_flush {
            info!(adds, dels, "memtable full, flushing before mutation");
            self.flush_and_reset()?;
        }
        Ok(())
    }

    /// Look up a key. `Ok(None)` means not found or deleted.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let _pass = self.gate.read();

        match self.memtable.read().get(key) {
            LookupResult::Value(value) => return Ok(Some(value)),
            LookupResult::Tombstone => return Ok(None),
            LookupResult::Miss => {}
        }

        match self.sst.get(key)? {
            LookupResult::Value(value) => Ok(Some(value)),
            LookupResult::Tombstone | LookupResult::Miss => Ok(None),
        }
    }

    /// Create a merged cursor over the whole store.
    ///
    /// The cursor pins the live (and any in-flight immutable) memtable and
    /// snapshots the current SSTable groups; position it with
    /// [`DbIterator::seek`].
    pub fn iterator(&self) -> Result<DbIterator, DbError> {
        let live = self.memtable.read().map();
        let immutable = self.sst.immutable().map(|frozen| frozen.map());
        let groups = self.sst.iterator_groups();
        Ok(DbIterator::new(live, immutable, groups))
    }

    /// Per-store telemetry accumulators.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// File count per level (diagnostics and tests).
    pub fn level_file_counts(&self) -> Vec<usize> {
        self.sst.level_file_counts()
    }

    /// Gracefully shut the store down.
    ///
    /// Flushes a non-empty memtable to level 0, deletes its WAL, and
    /// checkpoints the manifest.
    pub fn close(self) -> Result<(), DbError> {
        let memtable = self.memtable.into_inner();
        info!(
            adds = memtable.add_count(),
            dels = memtable.del_count(),
            "closing store"
        );

        memtable.sync_wal().map_err(map_memtable_err)?;
        let max_seq = memtable.max_seq();
        let frozen = memtable.into_frozen();

        if !frozen.is_empty() {
            self.sst.flush_frozen(&frozen)?;
        }
        frozen.remove_wal().map_err(map_memtable_err)?;

        self.manifest.update_seq(max_seq)?;
        self.manifest.checkpoint()?;
        Ok(())
    }

    /// Flush the live memtable to level 0 and swap in a fresh one.
    ///
    /// Caller holds the writer slot, so no other mutator is active. The
    /// retired memtable stays visible through the immutable slot until its
    /// SSTable is durable.
    fn flush_and_reset(&self) -> Result<(), DbError> {
        // Fresh memtable on the next WAL segment.
        let (old_seq, seq_floor) = {
            let memtable = self.memtable.read();
            memtable.sync_wal().map_err(map_memtable_err)?;
            (memtable.wal_seq(), memtable.max_seq())
        };
        let next_wal = self.dir.join(Wal::<MemtableRecord>::file_name(old_seq + 1));
        let fresh =
            Memtable::open(&next_wal, self.config.write_buffer_size).map_err(map_memtable_err)?;
        fresh.inject_max_seq(seq_floor);

        let retired = {
            let mut guard = self.memtable.write();
            std::mem::replace(&mut *guard, fresh)
        };

        let frozen = Arc::new(retired.into_frozen());
        self.sst.publish_immutable(Arc::clone(&frozen));
        self.manifest.set_active_wal(old_seq + 1)?;

        let flushed = self.sst.flush_frozen(&frozen)?;
        self.sst.clear_immutable();
        frozen.remove_wal().map_err(map_memtable_err)?;

        debug!(?flushed, "memtable reset complete");

        self.sst.maybe_compact()?;
        Ok(())
    }
}
