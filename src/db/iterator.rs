//! The user-visible merged cursor over the whole store.
//!
//! A [`DbIterator`] merges three kinds of source:
//!
//! 1. the live memtable,
//! 2. the immutable memtable, when a flush was in flight at creation,
//! 3. one chained cursor per non-overlapping level-0 group and per level
//!    ≥ 1, heap-merged by `(key, seq)`.
//!
//! Each `next()` emits the smallest current key. On equal keys the
//! memtables win over the SSTables (they are strictly newer), the live
//! memtable wins over the immutable one, and among SSTable sources the
//! highest sequence number wins; every source positioned at the emitted
//! key is advanced, so duplicates are consumed in the same step.
//! Tombstones are skipped transparently.
//!
//! The memtable cursors step by re-seeking the skip list past the current
//! key (`lower_bound(Excluded(..))`), so they hold no borrow into the map
//! and survive concurrent inserts. The maps themselves are pinned via
//! `Arc`, and SSTable readers via their own `Arc`s, so a memtable reset or
//! a compaction during the iterator's lifetime cannot invalidate it.

use std::ops::Bound;
use std::sync::Arc;

use crate::iterators::{ChainedIterator, MergeIterator};
use crate::memtable::{MemtableMap, Op, VersionEntry};
use crate::sstable::SstReader;

use super::DbError;

// ------------------------------------------------------------------------------------------------
// Memtable cursor
// ------------------------------------------------------------------------------------------------

/// Forward cursor over a pinned skip-list map.
struct MemCursor {
    map: Arc<MemtableMap>,
    current: Option<(Vec<u8>, VersionEntry)>,
}

impl MemCursor {
    fn new(map: Arc<MemtableMap>) -> Self {
        Self { map, current: None }
    }

    /// Position at the first entry with key ≥ `key`.
    fn seek(&mut self, key: &[u8]) {
        self.current = self
            .map
            .lower_bound(Bound::Included(key))
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    /// Move to the first entry strictly after the current key.
    fn advance(&mut self) {
        if let Some((key, _)) = self.current.take() {
            self.current = self
                .map
                .lower_bound(Bound::Excluded(key.as_slice()))
                .map(|e| (e.key().clone(), e.value().clone()));
        }
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(k, _)| k.as_slice())
    }
}

// ------------------------------------------------------------------------------------------------
// DbIterator
// ------------------------------------------------------------------------------------------------

/// Ordered cursor over the merged, deduplicated, live contents of the
/// store.
///
/// Created unpositioned; call [`DbIterator::seek`] first.
pub struct DbIterator {
    live: MemCursor,

    imm: Option<MemCursor>,

    /// SSTable source groups snapshotted at creation, re-seekable.
    groups: Vec<Vec<Arc<SstReader>>>,

    /// Heap merge across the groups, rebuilt on every seek.
    sst: MergeIterator,

    /// The entry the cursor currently rests on.
    current: Option<(Vec<u8>, Vec<u8>)>,
}

impl DbIterator {
    pub(crate) fn new(
        live: Arc<MemtableMap>,
        immutable: Option<Arc<MemtableMap>>,
        groups: Vec<Vec<Arc<SstReader>>>,
    ) -> Self {
        Self {
            live: MemCursor::new(live),
            imm: immutable.map(MemCursor::new),
            groups,
            sst: MergeIterator::new(Vec::new()),
            current: None,
        }
    }

    /// Position the cursor at the first live record with key ≥ `key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<(), DbError> {
        self.live.seek(key);
        if let Some(imm) = self.imm.as_mut() {
            imm.seek(key);
        }

        let mut chains = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            chains.push(ChainedIterator::seek(group.clone(), key)?);
        }
        self.sst = MergeIterator::new(chains);

        self.step()
    }

    /// Advance to the next live record.
    pub fn next(&mut self) -> Result<(), DbError> {
        self.step()
    }

    /// True while the cursor rests on a record.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key of the current record.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not [`valid`](Self::valid).
    pub fn key(&self) -> &[u8] {
        self.current
            .as_ref()
            .map(|(k, _)| k.as_slice())
            .expect("iterator is not positioned on a record")
    }

    /// Value of the current record.
    ///
    /// # Panics
    ///
    /// Panics when the cursor is not [`valid`](Self::valid).
    pub fn value(&self) -> &[u8] {
        self.current
            .as_ref()
            .map(|(_, v)| v.as_slice())
            .expect("iterator is not positioned on a record")
    }

    /// Emit the smallest current key across all sources, preferring the
    /// newer source on ties, consuming duplicates, and skipping tombstones.
    fn step(&mut self) -> Result<(), DbError> {
        loop {
            // Later assignments take priority on equal keys, so the order
            // here encodes the tie-break: SST < immutable < live.
            let mut winner: Option<(Vec<u8>, Vec<u8>, Op)> = None;

            if let Some(entry) = self.sst.entry() {
                winner = Some((entry.key.clone(), entry.value.clone(), entry.op));
            }
            if let Some((key, entry)) = self.imm.as_ref().and_then(|c| c.current.as_ref()) {
                let wins = winner
                    .as_ref()
                    .is_none_or(|(wk, _, _)| key.as_slice() <= wk.as_slice());
                if wins {
                    winner = Some((key.clone(), entry.value.clone(), entry.op));
                }
            }
            if let Some((key, entry)) = self.live.current.as_ref() {
                let wins = winner
                    .as_ref()
                    .is_none_or(|(wk, _, _)| key.as_slice() <= wk.as_slice());
                if wins {
                    winner = Some((key.clone(), entry.value.clone(), entry.op));
                }
            }

            let Some((key, value, op)) = winner else {
                self.current = None;
                return Ok(());
            };

            // Every source sitting on the emitted key moves past it, which
            // drops the superseded duplicates in the same step.
            if self.live.key() == Some(key.as_slice()) {
                self.live.advance();
            }
            if let Some(imm) = self.imm.as_mut() {
                if imm.key() == Some(key.as_slice()) {
                    imm.advance();
                }
            }
            self.sst.skip_key(&key)?;

            if op == Op::Add {
                self.current = Some((key, value));
                return Ok(());
            }
            // Tombstone: continue to the next key.
        }
    }
}
