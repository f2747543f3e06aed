//! Merge machinery for reading across many sorted runs.
//!
//! Two pieces live here:
//!
//! - [`ChainedIterator`] — presents an ordered group of **non-overlapping**
//!   SSTables as one contiguous sorted stream. Lazy: only one table cursor
//!   is open at a time; when it is exhausted the next table is opened.
//! - [`MergeIterator`] — a binary min-heap of chained iterators ordered by
//!   `(current key ascending, current seq descending)`. Popping always
//!   yields the globally smallest key, and for duplicate keys the newest
//!   version surfaces first, so a consumer that skips repeats of an emitted
//!   key sees exactly the latest version of every key.
//!
//! Both types hold `Arc` handles on their readers, so a compaction that
//! unlinks the underlying files cannot invalidate a live cursor.


use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::sstable::{SstEntry, SstError, SstIterator, SstReader};

// ------------------------------------------------------------------------------------------------
// ChainedIterator
// ------------------------------------------------------------------------------------------------

/// A cursor that concatenates a group of non-overlapping SSTables into one
/// sorted stream.
///
/// The tables must be ordered by `smallest_key` and pairwise disjoint in
/// key range; level ≥ 1 file lists satisfy this by invariant, and level-0
/// groups are built that way by the caller.
pub struct ChainedIterator {
    /// Tables still to be visited, in key order.
    tables: Vec<Arc<SstReader>>,

    /// Index of the next table to open.
    pos: usize,

    /// Cursor into the currently open table.
    current: Option<SstIterator>,
}

impl ChainedIterator {
    /// Create a chained cursor positioned at the first entry with key
    /// ≥ `key` across the group.
    pub fn seek(tables: Vec<Arc<SstReader>>, key: &[u8]) -> Result<Self, SstError> {
        let mut chain = Self {
            tables,
            pos: 0,
            current: None,
        };

        // Skip tables that end before the seek key.
        while chain.pos < chain.tables.len()
            && chain.tables[chain.pos].properties().largest_key.as_slice() < key
        {
            chain.pos += 1;
        }

        if chain.pos < chain.tables.len() {
            let reader = Arc::clone(&chain.tables[chain.pos]);
            chain.pos += 1;
            let iter = SstIterator::seek(reader, key)?;
            if iter.valid() {
                chain.current = Some(iter);
            } else {
                chain.open_next()?;
            }
        }

        Ok(chain)
    }

    /// The entry the cursor is on, or `None` when the chain is exhausted.
    pub fn entry(&self) -> Option<&SstEntry> {
        self.current.as_ref().and_then(|iter| iter.entry())
    }

    /// True while the cursor points at an entry.
    pub fn valid(&self) -> bool {
        self.entry().is_some()
    }

    /// Move to the next entry, rolling over to the next table in the group
    /// when the current one runs out.
    pub fn advance(&mut self) -> Result<(), SstError> {
        if let Some(iter) = self.current.as_mut() {
            iter.advance()?;
            if iter.valid() {
                return Ok(());
            }
        }
        self.open_next()
    }

    /// Open tables from `pos` onward until one yields an entry.
    fn open_next(&mut self) -> Result<(), SstError> {
        self.current = None;
        while self.pos < self.tables.len() {
            let reader = Arc::clone(&self.tables[self.pos]);
            self.pos += 1;
            let iter = SstIterator::seek(reader, &[])?;
            if iter.valid() {
                self.current = Some(iter);
                return Ok(());
            }
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// MergeIterator
// ------------------------------------------------------------------------------------------------

/// Heap wrapper giving [`ChainedIterator`] the ordering the merge needs:
/// smallest current key first, and for equal keys the highest sequence
/// number first.
struct HeapItem(ChainedIterator);

impl HeapItem {
    fn sort_key(&self) -> Option<(&[u8], u64)> {
        self.0.entry().map(|e| (e.key.as_slice(), e.seq))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key (and for
        // ties the newest seq) surfaces at the top. Exhausted cursors sort
        // last; they never enter the heap in the first place.
        match (self.sort_key(), other.sort_key()) {
            (Some((lk, ls)), Some((rk, rs))) => {
                lk.cmp(rk).then_with(|| rs.cmp(&ls)).reverse()
            }
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        }
    }
}

/// A k-way merge over chained iterators.
///
/// `entry()` exposes the smallest current key across every source;
/// `advance()` moves past it, restoring the heap property.
pub struct MergeIterator {
    heap: BinaryHeap<HeapItem>,
    current: Option<HeapItem>,
}

impl MergeIterator {
    /// Build a merge over the given chains. Exhausted chains are dropped.
    pub fn new(chains: Vec<ChainedIterator>) -> Self {
        let mut heap: BinaryHeap<HeapItem> = chains
            .into_iter()
            .filter(ChainedIterator::valid)
            .map(HeapItem)
            .collect();
        let current = heap.pop();
        Self { heap, current }
    }

    /// The smallest current entry across all sources.
    pub fn entry(&self) -> Option<&SstEntry> {
        self.current.as_ref().and_then(|item| item.0.entry())
    }

    /// True while any source still has entries.
    pub fn valid(&self) -> bool {
        self.entry().is_some()
    }

    /// Advance the winning source and re-establish the heap order.
    pub fn advance(&mut self) -> Result<(), SstError> {
        if let Some(mut item) = self.current.take() {
            item.0.advance()?;
            if item.0.valid() {
                self.heap.push(item);
            }
        }
        self.current = self.heap.pop();
        Ok(())
    }

    /// Advance every source past `key`, dropping all duplicates of it.
    pub fn skip_key(&mut self, key: &[u8]) -> Result<(), SstError> {
        while let Some(entry) = self.entry() {
            if entry.key.as_slice() != key {
                break;
            }
            self.advance()?;
        }
        Ok(())
    }
}
