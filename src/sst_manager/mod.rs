//! SST manager — the on-disk half of the LSM tree.
//!
//! Owns the per-level file lists, the immutable-memtable slot, memtable
//! flushing, point lookups across levels, and leveled compaction.
//!
//! # Level invariants
//!
//! - **Level 0** holds raw memtable flushes. Files may overlap in key range
//!   and are ordered newest-first (descending file id, which tracks
//!   creation order).
//! - **Levels ≥ 1** hold compaction output: pairwise non-overlapping files
//!   ordered by smallest key, so a binary search finds the unique candidate
//!   file for any key.
//! - Each level ≥ 1 has a byte target (`level_base_bytes` ×
//!   `level_multiplier`^(level−1)); exceeding it schedules a compaction of
//!   that level into the next. Level 0 compacts when its file count
//!   reaches `level0_compaction_trigger`.
//!
//! # Compaction
//!
//! A compaction takes every level-0 file (they overlap each other) or one
//! file of a level ≥ 1, plus the overlapping slice of the next level, and
//! k-way merges them. Duplicate keys collapse to the highest sequence
//! number; tombstones are dropped only when the output level is the
//! bottommost, where nothing older can lurk beneath them. Output is split
//! into files of bounded size, published under the level lock, and the
//! inputs are then removed from the manifest and unlinked. Live iterators
//! keep their `Arc`ed readers, and the mmap keeps unlinked files readable,
//! so reads stay correct throughout.
//!
//! # Immutable-memtable slot
//!
//! A memtable reset publishes the frozen memtable here, under its own
//! mutex, so lookups and fresh iterators keep seeing its data until the
//! level-0 flush is durable; the slot is then cleared and the frozen WAL
//! deleted.

#[cfg(test)]
mod tests;

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::iterators::{ChainedIterator, MergeIterator};
use crate::manifest::{Manifest, ManifestError};
use crate::memtable::{FrozenMemtable, LookupResult, Op, VersionEntry};
use crate::sstable::{
    self, BlockCache, SstError, SstReader, SstWriter,
};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SST manager operations.
#[derive(Debug, Error)]
pub enum SstManagerError {
    /// Error from the SSTable layer.
    #[error("SSTable error: {0}")]
    Sst(#[from] SstError),

    /// Error from the manifest.
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Sizing knobs for the leveled layout.
#[derive(Debug, Clone)]
pub struct SstManagerOptions {
    /// Number of levels (level 0 through `max_levels - 1`).
    pub max_levels: usize,

    /// Level-0 file count that triggers a compaction into level 1.
    pub level0_compaction_trigger: usize,

    /// Byte target for level 1.
    pub level_base_bytes: u64,

    /// Growth factor between consecutive levels.
    pub level_multiplier: u64,

    /// Upper bound for one compaction output file.
    pub max_table_size: u64,

    /// Target data-block size inside SSTables.
    pub block_size: usize,
}

impl Default for SstManagerOptions {
    fn default() -> Self {
        Self {
            max_levels: 7,
            level0_compaction_trigger: 4,
            level_base_bytes: 10 * 1024 * 1024,
            level_multiplier: 10,
            max_table_size: 2 * 1024 * 1024,
            block_size: sstable::DEFAULT_BLOCK_SIZE,
        }
    }
}

impl SstManagerOptions {
    fn level_target_bytes(&self, level: usize) -> u64 {
        let exponent = level.saturating_sub(1) as u32;
        self.level_base_bytes
            .saturating_mul(self.level_multiplier.saturating_pow(exponent))
    }
}

// ------------------------------------------------------------------------------------------------
// SstHandle
// ------------------------------------------------------------------------------------------------

/// In-memory handle to one live SSTable.
pub struct SstHandle {
    /// Globally unique file id (also the creation order).
    pub id: u64,

    /// Level this table currently belongs to.
    pub level: u32,

    /// Shared reader (mmap + index + bloom + properties).
    pub reader: Arc<SstReader>,
}

impl SstHandle {
    fn smallest_key(&self) -> &[u8] {
        &self.reader.properties().smallest_key
    }

    fn largest_key(&self) -> &[u8] {
        &self.reader.properties().largest_key
    }

    fn overlaps(&self, smallest: &[u8], largest: &[u8]) -> bool {
        !(self.largest_key() < smallest || largest < self.smallest_key())
    }
}

// ------------------------------------------------------------------------------------------------
// SstManager
// ------------------------------------------------------------------------------------------------

/// Per-level SSTable organization for one store directory.
pub struct SstManager {
    /// Base directory holding the `.sst` files.
    dir: PathBuf,

    /// Shared block cache for every reader.
    cache: BlockCache,

    /// Metadata authority, shared with the DB façade.
    manifest: Arc<Manifest>,

    /// `levels[l]` is the file list of level `l`. Level 0 newest-first;
    /// levels ≥ 1 sorted by smallest key and non-overlapping.
    levels: RwLock<Vec<Vec<Arc<SstHandle>>>>,

    /// The frozen memtable currently being flushed, if any.
    immutable: Mutex<Option<Arc<FrozenMemtable>>>,

    /// Sizing configuration.
    opts: SstManagerOptions,
}

impl SstManager {
    /// Load the manager from the manifest's table list.
    ///
    /// Files in `dir` that the manifest does not know about — crashed
    /// flushes, leftover `.tmp` output, superseded compaction inputs —
    /// are deleted.
    pub fn open(
        dir: impl AsRef<Path>,
        cache_size_bytes: u64,
        opts: SstManagerOptions,
        manifest: Arc<Manifest>,
    ) -> Result<Self, SstManagerError> {
        let dir = dir.as_ref().to_path_buf();
        let cache = BlockCache::new(cache_size_bytes);

        let entries = manifest.tables()?;

        // Remove orphan table files and partial temp output.
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let orphan_sst = name
                .strip_prefix("sst-")
                .and_then(|s| s.strip_suffix(".sst"))
                .and_then(|s| s.parse::<u64>().ok())
                .map(|id| !entries.iter().any(|e| e.id == id))
                .unwrap_or(false);
            if orphan_sst || name.ends_with(".tmp") {
                warn!(file = name, "removing file unknown to the manifest");
                fs::remove_file(&path)?;
            }
        }

        let mut levels: Vec<Vec<Arc<SstHandle>>> = vec![Vec::new(); opts.max_levels];
        for entry in entries {
            let path = dir.join(sstable::file_name(entry.id));
            let reader = Arc::new(SstReader::open(&path, entry.id, cache.clone())?);
            let level = (entry.level as usize).min(opts.max_levels - 1);
            levels[level].push(Arc::new(SstHandle {
                id: entry.id,
                level: entry.level,
                reader,
            }));
        }

        levels[0].sort_by(|a, b| b.id.cmp(&a.id));
        for level in levels.iter_mut().skip(1) {
            level.sort_by(|a, b| a.smallest_key().cmp(b.smallest_key()));
        }

        info!(
            dir = %dir.display(),
            files = levels.iter().map(Vec::len).sum::<usize>(),
            "SST manager loaded"
        );

        Ok(Self {
            dir,
            cache,
            manifest,
            levels: RwLock::new(levels),
            immutable: Mutex::new(None),
            opts,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Immutable-memtable slot
    // --------------------------------------------------------------------------------------------

    /// Publish a frozen memtable so readers keep seeing it during a flush.
    pub fn publish_immutable(&self, frozen: Arc<FrozenMemtable>) {
        *self.immutable.lock() = Some(frozen);
    }

    /// Retract the frozen memtable once its SSTable is durable.
    pub fn clear_immutable(&self) {
        *self.immutable.lock() = None;
    }

    /// The frozen memtable currently in flight, if any.
    pub fn immutable(&self) -> Option<Arc<FrozenMemtable>> {
        self.immutable.lock().clone()
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Point lookup across the immutable memtable and every level.
    ///
    /// Level 0 is scanned newest to oldest; levels ≥ 1 are binary searched.
    /// The first hit wins; a tombstone is reported so the caller returns
    /// not-found without consulting older levels.
    pub fn get(&self, key: &[u8]) -> Result<LookupResult, SstManagerError> {
        if let Some(frozen) = self.immutable() {
            match frozen.get(key) {
                LookupResult::Miss => {}
                hit => return Ok(hit),
            }
        }

        let levels = self.levels.read();

        for handle in &levels[0] {
            if !handle.reader.may_contain(key) {
                continue;
            }
            match handle.reader.get(key)? {
                LookupResult::Miss => {}
                hit => return Ok(hit),
            }
        }

        for level in levels.iter().skip(1) {
            let pp = level.partition_point(|h| h.smallest_key() <= key);
            let Some(idx) = pp.checked_sub(1) else {
                continue;
            };
            let handle = &level[idx];
            if handle.largest_key() < key {
                continue;
            }
            match handle.reader.get(key)? {
                LookupResult::Miss => {}
                hit => return Ok(hit),
            }
        }

        Ok(LookupResult::Miss)
    }

    /// Snapshot of chained-iterator source groups for a merged scan:
    /// non-overlapping groups of level-0 files (newest first), then one
    /// group per populated level ≥ 1.
    pub fn iterator_groups(&self) -> Vec<Vec<Arc<SstReader>>> {
        let levels = self.levels.read();
        let mut groups: Vec<Vec<Arc<SstHandle>>> = Vec::new();

        // Level 0: greedily chain files that do not overlap anything
        // already in the open group, walking newest to oldest.
        for handle in &levels[0] {
            match groups.last_mut() {
                Some(group)
                    if group
                        .iter()
                        .all(|g| !g.overlaps(handle.smallest_key(), handle.largest_key())) =>
                {
                    group.push(Arc::clone(handle));
                }
                _ => groups.push(vec![Arc::clone(handle)]),
            }
        }

        // Within a group files are disjoint, so key order is well defined.
        for group in &mut groups {
            group.sort_by(|a, b| a.smallest_key().cmp(b.smallest_key()));
        }

        let mut result: Vec<Vec<Arc<SstReader>>> = groups
            .into_iter()
            .map(|group| group.iter().map(|h| Arc::clone(&h.reader)).collect())
            .collect();

        for level in levels.iter().skip(1) {
            if !level.is_empty() {
                result.push(level.iter().map(|h| Arc::clone(&h.reader)).collect());
            }
        }

        result
    }

    /// File count per level (diagnostics and tests).
    pub fn level_file_counts(&self) -> Vec<usize> {
        self.levels.read().iter().map(Vec::len).collect()
    }

    /// Smallest/largest key of each file in a level, in list order
    /// (diagnostics and tests).
    pub fn level_key_ranges(&self, level: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.levels
            .read()
            .get(level)
            .map(|files| {
                files
                    .iter()
                    .map(|h| (h.smallest_key().to_vec(), h.largest_key().to_vec()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total on-disk bytes of one level.
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.levels
            .read()
            .get(level)
            .map(|files| files.iter().map(|h| h.reader.file_size()).sum())
            .unwrap_or(0)
    }

    // --------------------------------------------------------------------------------------------
    // Flush
    // --------------------------------------------------------------------------------------------

    /// Write a frozen memtable as a new level-0 SSTable.
    ///
    /// Returns the new file id, or `None` when the memtable was empty.
    pub fn flush_frozen(
        &self,
        frozen: &FrozenMemtable,
    ) -> Result<Option<u64>, SstManagerError> {
        let entries = frozen.entries();
        if entries.is_empty() {
            return Ok(None);
        }

        let handle = self.write_table(&entries, 0)?;
        let id = handle.id;

        self.manifest.update_seq(frozen.max_seq())?;
        self.manifest.add_table(id, 0)?;
        self.manifest.sync()?;

        self.levels.write()[0].insert(0, handle);

        info!(
            id,
            entries = entries.len(),
            max_seq = frozen.max_seq(),
            "memtable flushed to level 0"
        );
        Ok(Some(id))
    }

    /// Build one SSTable from a sorted run and open a handle for it.
    fn write_table(
        &self,
        entries: &[(Vec<u8>, VersionEntry)],
        level: u32,
    ) -> Result<Arc<SstHandle>, SstManagerError> {
        let id = self.manifest.allocate_file_id()?;
        let path = self.dir.join(sstable::file_name(id));

        SstWriter::new(&path, self.opts.block_size).build(entries)?;
        let reader = Arc::new(SstReader::open(&path, id, self.cache.clone())?);

        Ok(Arc::new(SstHandle { id, level, reader }))
    }

    // --------------------------------------------------------------------------------------------
    // Compaction
    // --------------------------------------------------------------------------------------------

    /// Run compactions until every level is back within its target.
    ///
    /// Called inline from the write path after a flush; the caller holds
    /// the writer gate, so no other mutator is active.
    pub fn maybe_compact(&self) -> Result<(), SstManagerError> {
        while let Some(level) = self.pick_compaction_level() {
            self.compact(level)?;
        }
        Ok(())
    }

    fn pick_compaction_level(&self) -> Option<usize> {
        let levels = self.levels.read();

        if levels[0].len() >= self.opts.level0_compaction_trigger {
            return Some(0);
        }

        // The bottom level has nowhere to go.
        for level in 1..self.opts.max_levels - 1 {
            let bytes: u64 = levels[level].iter().map(|h| h.reader.file_size()).sum();
            if bytes > self.opts.level_target_bytes(level) {
                return Some(level);
            }
        }
        None
    }

    /// Merge `level` (all of level 0, or its oldest file for level ≥ 1)
    /// with the overlapping slice of `level + 1`.
    pub fn compact(&self, level: usize) -> Result<(), SstManagerError> {
        if level + 1 >= self.opts.max_levels {
            return Err(SstManagerError::Internal(format!(
                "cannot compact bottom level {level}"
            )));
        }

        let (lower_inputs, upper_inputs) = {
            let levels = self.levels.read();

            let lower_inputs: Vec<Arc<SstHandle>> = if level == 0 {
                levels[0].clone()
            } else {
                // Oldest file first keeps the pick deterministic.
                levels[level]
                    .iter()
                    .min_by_key(|h| h.id)
                    .cloned()
                    .into_iter()
                    .collect()
            };

            if lower_inputs.is_empty() {
                return Ok(());
            }

            let smallest = lower_inputs
                .iter()
                .map(|h| h.smallest_key().to_vec())
                .min()
                .unwrap_or_default();
            let largest = lower_inputs
                .iter()
                .map(|h| h.largest_key().to_vec())
                .max()
                .unwrap_or_default();

            let upper_inputs: Vec<Arc<SstHandle>> = levels[level + 1]
                .iter()
                .filter(|h| h.overlaps(&smallest, &largest))
                .cloned()
                .collect();

            (lower_inputs, upper_inputs)
        };

        let output_level = (level + 1) as u32;
        let drop_tombstones = level + 2 == self.opts.max_levels;

        debug!(
            level,
            lower = lower_inputs.len(),
            upper = upper_inputs.len(),
            drop_tombstones,
            "compaction starting"
        );

        // Level-0 inputs may overlap each other, so each is its own chain;
        // the upper slice is non-overlapping and forms a single chain.
        let mut chains = Vec::new();
        for handle in &lower_inputs {
            chains.push(ChainedIterator::seek(
                vec![Arc::clone(&handle.reader)],
                &[],
            )?);
        }
        if !upper_inputs.is_empty() {
            chains.push(ChainedIterator::seek(
                upper_inputs
                    .iter()
                    .map(|h| Arc::clone(&h.reader))
                    .collect(),
                &[],
            )?);
        }

        let mut merge = MergeIterator::new(chains);
        let mut outputs: Vec<Arc<SstHandle>> = Vec::new();
        let mut pending: Vec<(Vec<u8>, VersionEntry)> = Vec::new();
        let mut pending_bytes: u64 = 0;

        while let Some(winner) = merge.entry() {
            let key = winner.key.clone();
            let entry = VersionEntry {
                value: winner.value.clone(),
                op: winner.op,
                seq: winner.seq,
            };
            // The heap surfaces the newest version first; this consumes the
            // winner together with every superseded duplicate.
            merge.skip_key(&key)?;

            if drop_tombstones && entry.op == Op::Del {
                continue;
            }

            pending_bytes += (key.len() + entry.value.len() + 32) as u64;
            pending.push((key, entry));

            if pending_bytes >= self.opts.max_table_size {
                outputs.push(self.write_table(&pending, output_level)?);
                pending.clear();
                pending_bytes = 0;
            }
        }
        if !pending.is_empty() {
            outputs.push(self.write_table(&pending, output_level)?);
        }

        // Publish: swap the file lists, then update the manifest, then
        // unlink the superseded inputs.
        {
            let mut levels = self.levels.write();

            let input_ids: Vec<u64> = lower_inputs
                .iter()
                .chain(upper_inputs.iter())
                .map(|h| h.id)
                .collect();

            levels[level].retain(|h| !input_ids.contains(&h.id));
            levels[level + 1].retain(|h| !input_ids.contains(&h.id));
            levels[level + 1].extend(outputs.iter().cloned());
            levels[level + 1].sort_by(|a, b| a.smallest_key().cmp(b.smallest_key()));
        }

        for output in &outputs {
            self.manifest.add_table(output.id, output_level)?;
        }
        for handle in lower_inputs.iter().chain(upper_inputs.iter()) {
            self.manifest.remove_table(handle.id)?;
        }
        self.manifest.sync()?;

        for handle in lower_inputs.iter().chain(upper_inputs.iter()) {
            let path = self.dir.join(sstable::file_name(handle.id));
            if let Err(e) = fs::remove_file(&path) {
                warn!(id = handle.id, error = %e, "failed to unlink compacted input");
            }
        }

        info!(
            level,
            inputs = lower_inputs.len() + upper_inputs.len(),
            outputs = outputs.len(),
            "compaction finished"
        );
        Ok(())
    }
}
