//! Sorted String Table (SSTable) Module
//!
//! Immutable, disk-backed, sorted runs of key-value cells. SSTables are the
//! on-disk half of the LSM tree: memtable flushes produce them at level 0
//! and compaction rewrites them into deeper levels.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [PROPERTIES_LEN_LE][PROPERTIES_BYTES][PROPERTIES_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER_BYTES]
//! ```
//!
//! - **Header** — magic, version, CRC32.
//! - **Data blocks** — runs of cells `{key_len, value_len, op, seq} + key +
//!   value` in key order, capped near the configured block size.
//! - **Bloom block** — serialized bloom filter over all point keys.
//! - **Properties block** — smallest/largest key, entry and tombstone
//!   counts, sequence-number bounds.
//! - **Index block** — one `(first_key, handle)` entry per data block,
//!   enabling binary search for the block that may hold a key.
//! - **Footer** — fixed size; handles for bloom, properties, and index
//!   blocks, plus magic and CRC32. Readers locate it at `len - FOOTER`.
//!
//! # Concurrency model
//!
//! SSTables are immutable, so reads are lock-free: the file is memory
//! mapped and decoded blocks are shared through the (internally
//! synchronized) block cache.
//!
//! # Guarantees
//!
//! - **Integrity** — header, every block, and the footer carry CRC32
//!   checksums; a mismatch surfaces as corruption, never a silent repair.
//! - **Atomicity** — files are written to a `.tmp` path, fsynced, and
//!   renamed into place; a crash cannot publish a partial table.

// ------------------------------------------------------------------------------------------------
// Sub-modules
// ------------------------------------------------------------------------------------------------

pub mod builder;
pub mod cache;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::SstWriter;
pub use cache::BlockCache;
pub use iterator::{BlockIterator, SstEntry, SstIterator};

// ------------------------------------------------------------------------------------------------
// Includes
// ------------------------------------------------------------------------------------------------

use std::{fs::File, io, path::Path, sync::Arc};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;
use tracing::debug;

use crate::encoding::{self, Decode, Encode, EncodingError};
use crate::memtable::{LookupResult, Op};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

pub(crate) const SST_MAGIC: [u8; 4] = *b"SST1";
pub(crate) const SST_VERSION: u32 = 1;
pub(crate) const SST_BLOOM_FP_RATE: f64 = 0.01;
pub(crate) const SST_HDR_SIZE: usize = 12;
pub(crate) const SST_FOOTER_SIZE: usize = 56;
pub(crate) const SST_BLOCK_LEN_SIZE: usize = 4;
pub(crate) const SST_BLOCK_CRC_SIZE: usize = 4;

/// Default target size for one data block (4 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Build the conventional SSTable file name for a file id.
pub fn file_name(file_id: u64) -> String {
    format!("sst-{file_id:06}.sst")
}

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (read, write, build).
#[derive(Debug, Error)]
pub enum SstError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Structural damage: bad magic, impossible offsets, short blocks.
    #[error("Corruption: {0}")]
    Corruption(String),

    /// A block or footer failed its CRC32 check.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

/// File header written at the start of every SSTable.
pub(crate) struct SstHeader {
    /// Magic bytes identifying the format (`b"SST1"`).
    pub(crate) magic: [u8; 4],

    /// Format version.
    pub(crate) version: u32,

    /// CRC32 over `magic || version`.
    pub(crate) crc: u32,
}

/// Handle to a block in the file: where it starts and how many bytes it
/// spans including length prefix and checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// One entry of the index block, mapping a data block's first key to its
/// location.
#[derive(Debug, Clone)]
pub(crate) struct IndexEntry {
    pub(crate) first_key: Vec<u8>,
    pub(crate) handle: BlockHandle,
}

/// Table-level metadata persisted in the properties block.
#[derive(Debug, Clone, PartialEq)]
pub struct SstProperties {
    /// Smallest key present in the table.
    pub smallest_key: Vec<u8>,

    /// Largest key present in the table.
    pub largest_key: Vec<u8>,

    /// Total number of cells (including tombstones).
    pub entry_count: u64,

    /// Number of tombstone cells.
    pub tombstone_count: u64,

    /// Minimum sequence number present.
    pub min_seq: u64,

    /// Maximum sequence number present.
    pub max_seq: u64,
}

/// Fixed-size footer at the end of the file.
pub(crate) struct SstFooter {
    pub(crate) bloom: BlockHandle,
    pub(crate) properties: BlockHandle,
    pub(crate) index: BlockHandle,
    pub(crate) magic: [u8; 4],
    pub(crate) crc: u32,
}

/// Per-cell header preceding the key and value bytes inside a data block.
///
/// Layout: `key_len(4) + value_len(4) + op(1) + seq(8)` = 17 bytes.
pub(crate) struct SstCellHeader {
    pub(crate) key_len: u32,
    pub(crate) value_len: u32,
    pub(crate) op: Op,
    pub(crate) seq: u64,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for SstHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.crc.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for SstHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                crc,
            },
            off,
        ))
    }
}

impl encoding::Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { offset, size }, off))
    }
}

impl encoding::Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.first_key.encode_to(buf)?;
        self.handle.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (first_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (handle, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        Ok((Self { first_key, handle }, off))
    }
}

impl encoding::Encode for SstProperties {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.smallest_key.encode_to(buf)?;
        self.largest_key.encode_to(buf)?;
        self.entry_count.encode_to(buf)?;
        self.tombstone_count.encode_to(buf)?;
        self.min_seq.encode_to(buf)?;
        self.max_seq.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for SstProperties {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (smallest_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (largest_key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (entry_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (tombstone_count, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (min_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (max_seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                smallest_key,
                largest_key,
                entry_count,
                tombstone_count,
                min_seq,
                max_seq,
            },
            off,
        ))
    }
}

impl encoding::Encode for SstFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.bloom.encode_to(buf)?;
        self.properties.encode_to(buf)?;
        self.index.encode_to(buf)?;
        self.magic.encode_to(buf)?;
        self.crc.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for SstFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (bloom, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (properties, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                bloom,
                properties,
                index,
                magic,
                crc,
            },
            off,
        ))
    }
}

impl encoding::Encode for SstCellHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key_len.encode_to(buf)?;
        self.value_len.encode_to(buf)?;
        self.op.encode_to(buf)?;
        self.seq.encode_to(buf)?;
        Ok(())
    }
}

impl encoding::Decode for SstCellHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (value_len, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (op, n) = Op::decode_from(&buf[off..])?;
        off += n;
        let (seq, n) = u64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key_len,
                value_len,
                op,
                seq,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// SstReader
// ------------------------------------------------------------------------------------------------

/// Read-side handle on one SSTable file.
///
/// Opening validates the header and footer, then loads the index, bloom
/// filter, and properties eagerly; data blocks are read lazily through the
/// shared block cache.
#[derive(Debug)]
pub struct SstReader {
    /// File id, doubling as the cache key namespace.
    file_id: u64,

    /// Read-only memory map of the whole file.
    mmap: Mmap,

    /// Decoded index block: one entry per data block, in key order.
    index: Vec<IndexEntry>,

    /// Bloom filter over all point keys in the table.
    bloom: Bloom<[u8]>,

    /// Table-level metadata.
    properties: SstProperties,

    /// Shared cache of decoded data blocks.
    cache: BlockCache,
}

impl SstReader {
    /// Open and validate an SSTable file.
    ///
    /// The `unsafe` mmap is sound here: tables are immutable once renamed
    /// into place and the map is read-only.
    pub fn open(path: impl AsRef<Path>, file_id: u64, cache: BlockCache) -> Result<Self, SstError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < SST_HDR_SIZE + SST_FOOTER_SIZE {
            return Err(SstError::Corruption(format!(
                "file too small ({} bytes)",
                mmap.len()
            )));
        }

        // Header: magic, version, CRC.
        let (header, _) = encoding::decode_from_slice::<SstHeader>(&mmap[..SST_HDR_SIZE])?;
        if header.magic != SST_MAGIC {
            return Err(SstError::Corruption("bad header magic".into()));
        }
        if header.version != SST_VERSION {
            return Err(SstError::Corruption(format!(
                "unsupported version {}",
                header.version
            )));
        }
        let mut hasher = Crc32::new();
        hasher.update(&mmap[..SST_HDR_SIZE - 4]);
        if hasher.finalize() != header.crc {
            return Err(SstError::ChecksumMismatch);
        }

        // Footer: fixed size at the end of the file.
        let footer_start = mmap.len() - SST_FOOTER_SIZE;
        let (footer, _) = encoding::decode_from_slice::<SstFooter>(&mmap[footer_start..])?;
        if footer.magic != SST_MAGIC {
            return Err(SstError::Corruption("bad footer magic".into()));
        }
        let mut hasher = Crc32::new();
        hasher.update(&mmap[footer_start..mmap.len() - 4]);
        if hasher.finalize() != footer.crc {
            return Err(SstError::ChecksumMismatch);
        }

        let bloom_bytes = read_block_bytes(&mmap, &footer.bloom)?;
        let bloom = Bloom::from_slice(&bloom_bytes)
            .map_err(|e| SstError::Corruption(format!("bloom filter: {e}")))?;

        let properties_bytes = read_block_bytes(&mmap, &footer.properties)?;
        let (properties, _) = encoding::decode_from_slice::<SstProperties>(&properties_bytes)?;

        let index_bytes = read_block_bytes(&mmap, &footer.index)?;
        let (index, _) = encoding::decode_vec::<IndexEntry>(&index_bytes)?;

        debug!(
            file_id,
            blocks = index.len(),
            entries = properties.entry_count,
            "SSTable opened"
        );

        Ok(Self {
            file_id,
            mmap,
            index,
            bloom,
            properties,
            cache,
        })
    }

    /// File id of this table.
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// Table-level metadata.
    pub fn properties(&self) -> &SstProperties {
        &self.properties
    }

    /// Total on-disk size in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Number of data blocks.
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// True when `key` falls inside this table's `[smallest, largest]`
    /// range and the bloom filter does not rule it out.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        if key < self.properties.smallest_key.as_slice()
            || key > self.properties.largest_key.as_slice()
        {
            return false;
        }
        self.bloom.check(key)
    }

    /// Point lookup inside this table.
    ///
    /// A tombstone cell reports [`LookupResult::Tombstone`] so the caller
    /// stops consulting older tables.
    pub fn get(&self, key: &[u8]) -> Result<LookupResult, SstError> {
        if !self.may_contain(key) {
            return Ok(LookupResult::Miss);
        }

        let block_idx = match self.find_block_for_key(key) {
            Some(idx) => idx,
            None => return Ok(LookupResult::Miss),
        };

        let block = self.load_block(block_idx)?;
        let mut iter = BlockIterator::new(block);
        iter.seek_to(key);

        match iter.next_entry() {
            Some(entry) if entry.key == key => match entry.op {
                Op::Add => Ok(LookupResult::Value(entry.value)),
                Op::Del => Ok(LookupResult::Tombstone),
            },
            _ => Ok(LookupResult::Miss),
        }
    }

    /// Index of the data block that may contain `key`: the last block whose
    /// first key is ≤ `key`. `None` when `key` sorts before every block.
    pub(crate) fn find_block_for_key(&self, key: &[u8]) -> Option<usize> {
        let pp = self
            .index
            .partition_point(|entry| entry.first_key.as_slice() <= key);
        pp.checked_sub(1)
    }

    /// Load one data block through the cache, verifying its checksum on a
    /// cache miss.
    pub(crate) fn load_block(&self, block_idx: usize) -> Result<Arc<Vec<u8>>, SstError> {
        let handle = self
            .index
            .get(block_idx)
            .ok_or_else(|| SstError::Internal(format!("block index {block_idx} out of range")))?
            .handle
            .clone();

        self.cache
            .get_or_load(self.file_id, handle.offset, || {
                read_block_bytes(&self.mmap, &handle)
            })
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O
// ------------------------------------------------------------------------------------------------

/// Reads a `[len][bytes][crc32]`-framed block from the mmap and verifies
/// its checksum.
pub(crate) fn read_block_bytes(mmap: &Mmap, handle: &BlockHandle) -> Result<Vec<u8>, SstError> {
    let start = handle.offset as usize;
    let size = handle.size as usize;

    if size < SST_BLOCK_LEN_SIZE + SST_BLOCK_CRC_SIZE || start + size > mmap.len() {
        return Err(SstError::Corruption(format!(
            "block handle {start}+{size} outside file of {} bytes",
            mmap.len()
        )));
    }

    let mut len_bytes = [0u8; SST_BLOCK_LEN_SIZE];
    len_bytes.copy_from_slice(&mmap[start..start + SST_BLOCK_LEN_SIZE]);
    let content_len = u32::from_le_bytes(len_bytes) as usize;

    if SST_BLOCK_LEN_SIZE + content_len + SST_BLOCK_CRC_SIZE != size {
        return Err(SstError::Corruption("block length prefix disagrees with handle".into()));
    }

    let content_start = start + SST_BLOCK_LEN_SIZE;
    let content = &mmap[content_start..content_start + content_len];

    let mut checksum_bytes = [0u8; SST_BLOCK_CRC_SIZE];
    checksum_bytes
        .copy_from_slice(&mmap[content_start + content_len..content_start + content_len + 4]);
    let stored_checksum = u32::from_le_bytes(checksum_bytes);

    let mut hasher = Crc32::new();
    hasher.update(content);
    if hasher.finalize() != stored_checksum {
        return Err(SstError::ChecksumMismatch);
    }

    Ok(content.to_vec())
}
