//! SSTable iterators — block-level and table-level cursors.
//!
//! Two cursor types live here:
//!
//! - [`BlockIterator`] — decodes one data block and yields [`SstEntry`]
//!   values; supports `seek_to_first()` and `seek_to(key)`. Seeking is
//!   linear, which is fine because blocks are small (typically 4 KiB).
//! - [`SstIterator`] — a forward cursor over a whole table from a seek key,
//!   loading one block at a time through the block cache and advancing to
//!   the next block when the current one is exhausted.
//!
//! Both treat structural damage (truncated cell, undecodable header) as the
//! end of their input after logging a warning; the point-lookup path, which
//! re-validates checksums on load, is where corruption surfaces as an
//! error.

use std::sync::Arc;

use tracing::warn;

use crate::encoding;
use crate::memtable::Op;

use super::{SstCellHeader, SstError, SstReader};

// ------------------------------------------------------------------------------------------------
// SstEntry
// ------------------------------------------------------------------------------------------------

/// A fully decoded cell from a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SstEntry {
    /// The user key bytes.
    pub key: Vec<u8>,

    /// The value bytes. Empty for tombstones.
    pub value: Vec<u8>,

    /// Insert or tombstone.
    pub op: Op,

    /// Sequence number of this version.
    pub seq: u64,
}

// ------------------------------------------------------------------------------------------------
// BlockIterator
// ------------------------------------------------------------------------------------------------

/// Cursor over the cells of a single data block.
pub struct BlockIterator {
    /// Shared, already-checksummed block payload.
    data: Arc<Vec<u8>>,

    /// Byte offset of the next cell header to decode.
    cursor: usize,
}

impl BlockIterator {
    /// Create an iterator positioned at the first cell.
    pub fn new(data: Arc<Vec<u8>>) -> Self {
        Self { data, cursor: 0 }
    }

    /// Reset to the first cell in the block.
    pub fn seek_to_first(&mut self) {
        self.cursor = 0;
    }

    /// Position the cursor at the first cell whose key is ≥ `search_key`.
    pub fn seek_to(&mut self, search_key: &[u8]) {
        self.cursor = 0;
        while self.cursor < self.data.len() {
            match encoding::decode_from_slice::<SstCellHeader>(&self.data[self.cursor..]) {
                Ok((header, header_len)) => {
                    let key_start = self.cursor + header_len;
                    let key_len = header.key_len as usize;
                    let value_len = header.value_len as usize;

                    if key_start + key_len + value_len > self.data.len() {
                        warn!(cursor = self.cursor, "truncated cell during block seek");
                        self.cursor = self.data.len();
                        return;
                    }

                    if &self.data[key_start..key_start + key_len] >= search_key {
                        return;
                    }

                    self.cursor = key_start + key_len + value_len;
                }
                Err(e) => {
                    warn!(cursor = self.cursor, ?e, "decode error during block seek");
                    self.cursor = self.data.len();
                    return;
                }
            }
        }
    }

    /// Decode and return the next cell, advancing the cursor.
    pub fn next_entry(&mut self) -> Option<SstEntry> {
        if self.cursor >= self.data.len() {
            return None;
        }

        match encoding::decode_from_slice::<SstCellHeader>(&self.data[self.cursor..]) {
            Ok((header, header_len)) => {
                self.cursor += header_len;

                let key_len = header.key_len as usize;
                let value_len = header.value_len as usize;

                if self.cursor + key_len + value_len > self.data.len() {
                    warn!(cursor = self.cursor, "truncated cell in data block");
                    self.cursor = self.data.len();
                    return None;
                }

                let key = self.data[self.cursor..self.cursor + key_len].to_vec();
                self.cursor += key_len;
                let value = self.data[self.cursor..self.cursor + value_len].to_vec();
                self.cursor += value_len;

                Some(SstEntry {
                    key,
                    value,
                    op: header.op,
                    seq: header.seq,
                })
            }
            Err(e) => {
                warn!(cursor = self.cursor, ?e, "undecodable cell in data block");
                self.cursor = self.data.len();
                None
            }
        }
    }
}

impl Iterator for BlockIterator {
    type Item = SstEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry()
    }
}

// ------------------------------------------------------------------------------------------------
// SstIterator
// ------------------------------------------------------------------------------------------------

/// Forward cursor over one whole SSTable.
///
/// Holds an `Arc` on the reader, so it stays valid even after compaction
/// unlinks the underlying file (the mmap keeps the data reachable).
pub struct SstIterator {
    reader: Arc<SstReader>,
    block_idx: usize,
    block_iter: Option<BlockIterator>,
    current: Option<SstEntry>,
}

impl SstIterator {
    /// Create a cursor positioned at the first cell whose key is ≥ `key`.
    ///
    /// Pass an empty key to start at the beginning of the table.
    pub fn seek(reader: Arc<SstReader>, key: &[u8]) -> Result<Self, SstError> {
        let block_idx = reader.find_block_for_key(key).unwrap_or(0);

        let mut iter = Self {
            reader,
            block_idx,
            block_iter: None,
            current: None,
        };

        if iter.block_idx < iter.reader.block_count() {
            let block = iter.reader.load_block(iter.block_idx)?;
            let mut block_iter = BlockIterator::new(block);
            block_iter.seek_to(key);
            iter.block_iter = Some(block_iter);
        }

        iter.advance()?;
        Ok(iter)
    }

    /// The cell the cursor is on, or `None` when exhausted.
    pub fn entry(&self) -> Option<&SstEntry> {
        self.current.as_ref()
    }

    /// True while the cursor points at a cell.
    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Move to the next cell, loading the next block when the current one
    /// runs out.
    pub fn advance(&mut self) -> Result<(), SstError> {
        loop {
            let Some(block_iter) = self.block_iter.as_mut() else {
                self.current = None;
                return Ok(());
            };

            if let Some(entry) = block_iter.next_entry() {
                self.current = Some(entry);
                return Ok(());
            }

            self.block_idx += 1;
            if self.block_idx >= self.reader.block_count() {
                self.block_iter = None;
                self.current = None;
                return Ok(());
            }

            let block = self.reader.load_block(self.block_idx)?;
            let mut next_iter = BlockIterator::new(block);
            next_iter.seek_to_first();
            self.block_iter = Some(next_iter);
        }
    }

    /// The reader this cursor walks.
    pub fn reader(&self) -> &Arc<SstReader> {
        &self.reader
    }
}
