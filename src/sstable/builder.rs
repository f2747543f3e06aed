//! SSTable writer — builds a complete table file from a sorted run.
//!
//! [`SstWriter`] accepts entries already sorted by key (a flushed memtable
//! or the output of a compaction merge) and writes header, data blocks,
//! bloom filter, properties, index, and footer.
//!
//! # Input requirements
//!
//! - Entries **must be sorted by key** and contain **one version per key**
//!   (the merge that produced them already collapsed duplicates).
//!
//! # Atomicity
//!
//! 1. Write everything to `<path>.tmp`.
//! 2. Flush and fsync the file.
//! 3. Rename `<path>.tmp` → `<path>`.
//!
//! A crash cannot publish a partially-written table; leftover `.tmp` files
//! are discarded when the store opens.

use std::{
    fs::{OpenOptions, rename},
    io::{BufWriter, Seek, Write},
    mem,
    path::Path,
};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use tracing::debug;

use crate::encoding::{self, Encode};
use crate::memtable::{Op, VersionEntry};

use super::{
    BlockHandle, IndexEntry, SST_BLOOM_FP_RATE, SST_BLOCK_CRC_SIZE, SST_BLOCK_LEN_SIZE,
    SST_MAGIC, SST_VERSION, SstCellHeader, SstError, SstFooter, SstHeader, SstProperties,
};

// ------------------------------------------------------------------------------------------------
// BuildStats
// ------------------------------------------------------------------------------------------------

/// Metadata accumulated while streaming entries into data blocks; becomes
/// the properties block.
struct BuildStats {
    entry_count: u64,
    tombstone_count: u64,
    min_seq: u64,
    max_seq: u64,
    smallest_key: Option<Vec<u8>>,
    largest_key: Option<Vec<u8>>,
}

impl BuildStats {
    fn new() -> Self {
        Self {
            entry_count: 0,
            tombstone_count: 0,
            min_seq: u64::MAX,
            max_seq: 0,
            smallest_key: None,
            largest_key: None,
        }
    }

    fn track(&mut self, key: &[u8], entry: &VersionEntry) {
        self.entry_count += 1;
        if entry.op == Op::Del {
            self.tombstone_count += 1;
        }
        self.min_seq = self.min_seq.min(entry.seq);
        self.max_seq = self.max_seq.max(entry.seq);

        // Entries arrive sorted: first key = smallest, last key = largest.
        if self.smallest_key.is_none() {
            self.smallest_key = Some(key.to_vec());
        }
        self.largest_key = Some(key.to_vec());
    }

    fn into_properties(self) -> SstProperties {
        SstProperties {
            smallest_key: self.smallest_key.unwrap_or_default(),
            largest_key: self.largest_key.unwrap_or_default(),
            entry_count: self.entry_count,
            tombstone_count: self.tombstone_count,
            min_seq: if self.min_seq == u64::MAX { 0 } else { self.min_seq },
            max_seq: self.max_seq,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

/// Writes a checksummed block: `[len_le (4 B)][data][crc32_le (4 B)]`.
///
/// Returns the handle covering the whole frame.
fn write_checksummed_block(
    writer: &mut (impl Write + Seek),
    data: &[u8],
) -> Result<BlockHandle, SstError> {
    let offset = writer.stream_position()?;
    let len = u32::try_from(data.len())
        .map_err(|_| SstError::Internal(format!("block of {} bytes", data.len())))?;

    let mut hasher = Crc32::new();
    hasher.update(data);
    let checksum = hasher.finalize();

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(data)?;
    writer.write_all(&checksum.to_le_bytes())?;

    Ok(BlockHandle {
        offset,
        size: (SST_BLOCK_LEN_SIZE + data.len() + SST_BLOCK_CRC_SIZE) as u64,
    })
}

/// Writes the file header with its embedded CRC32.
fn write_header(writer: &mut impl Write) -> Result<(), SstError> {
    let mut prefix = Vec::new();
    SST_MAGIC.encode_to(&mut prefix)?;
    SST_VERSION.encode_to(&mut prefix)?;

    let mut hasher = Crc32::new();
    hasher.update(&prefix);
    let header = SstHeader {
        magic: SST_MAGIC,
        version: SST_VERSION,
        crc: hasher.finalize(),
    };

    let header_bytes = encoding::encode_to_vec(&header)?;
    writer.write_all(&header_bytes)?;
    Ok(())
}

/// Flushes the buffered cells as one data block and records its index
/// entry.
fn flush_data_block(
    writer: &mut (impl Write + Seek),
    current_block: &mut Vec<u8>,
    block_first_key: &mut Option<Vec<u8>>,
    index_entries: &mut Vec<IndexEntry>,
) -> Result<(), SstError> {
    let data = mem::take(current_block);
    let handle = write_checksummed_block(writer, &data)?;

    let first_key = block_first_key
        .take()
        .ok_or_else(|| SstError::Internal("data block without a first key".into()))?;

    index_entries.push(IndexEntry { first_key, handle });
    Ok(())
}

/// Writes the footer (with CRC over everything before its own CRC field).
fn write_footer(
    writer: &mut (impl Write + Seek),
    bloom: BlockHandle,
    properties: BlockHandle,
    index: BlockHandle,
) -> Result<(), SstError> {
    let footer = SstFooter {
        bloom,
        properties,
        index,
        magic: SST_MAGIC,
        crc: 0,
    };

    let mut footer_bytes = encoding::encode_to_vec(&footer)?;
    footer_bytes.truncate(footer_bytes.len() - 4);

    let mut hasher = Crc32::new();
    hasher.update(&footer_bytes);
    let crc = hasher.finalize();
    footer_bytes.extend_from_slice(&crc.to_le_bytes());

    writer.write_all(&footer_bytes)?;
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// SstWriter
// ------------------------------------------------------------------------------------------------

/// Builds a complete SSTable file on disk from a sorted run of entries.
pub struct SstWriter<P: AsRef<Path>> {
    path: P,
    block_size: usize,
}

impl<P: AsRef<Path>> SstWriter<P> {
    /// Create a writer targeting the given output path.
    pub fn new(path: P, block_size: usize) -> Self {
        Self { path, block_size }
    }

    /// Consume a sorted run and write a complete table.
    ///
    /// # Errors
    ///
    /// - [`SstError::Internal`] when `entries` is empty.
    /// - I/O and encoding errors from writing.
    pub fn build(self, entries: &[(Vec<u8>, VersionEntry)]) -> Result<(), SstError> {
        if entries.is_empty() {
            return Err(SstError::Internal("cannot build an empty SSTable".into()));
        }

        let final_path = self.path.as_ref();
        let tmp_path = final_path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(&mut file);

        // 1. Header.
        write_header(&mut writer)?;

        // 2. Data blocks + bloom filter + stats.
        let mut bloom = Bloom::<[u8]>::new_for_fp_rate(entries.len(), SST_BLOOM_FP_RATE)
            .map_err(|e| SstError::Internal(e.to_string()))?;
        let mut stats = BuildStats::new();
        let mut index_entries = Vec::new();
        let mut current_block = Vec::<u8>::new();
        let mut block_first_key: Option<Vec<u8>> = None;

        for (key, entry) in entries {
            stats.track(key, entry);
            bloom.set(key);

            if block_first_key.is_none() {
                block_first_key = Some(key.clone());
            }

            let cell = SstCellHeader {
                key_len: key.len() as u32,
                value_len: entry.value.len() as u32,
                op: entry.op,
                seq: entry.seq,
            };
            cell.encode_to(&mut current_block)?;
            current_block.extend_from_slice(key);
            current_block.extend_from_slice(&entry.value);

            if current_block.len() >= self.block_size {
                flush_data_block(
                    &mut writer,
                    &mut current_block,
                    &mut block_first_key,
                    &mut index_entries,
                )?;
            }
        }

        if !current_block.is_empty() {
            flush_data_block(
                &mut writer,
                &mut current_block,
                &mut block_first_key,
                &mut index_entries,
            )?;
        }

        // 3. Bloom block.
        let bloom_handle = write_checksummed_block(&mut writer, &bloom.as_slice().to_vec())?;

        // 4. Properties block.
        let properties = stats.into_properties();
        let properties_bytes = encoding::encode_to_vec(&properties)?;
        let properties_handle = write_checksummed_block(&mut writer, &properties_bytes)?;

        // 5. Index block.
        let mut index_bytes = Vec::new();
        encoding::encode_vec(&index_entries, &mut index_bytes)?;
        let index_handle = write_checksummed_block(&mut writer, &index_bytes)?;

        // 6. Footer.
        write_footer(&mut writer, bloom_handle, properties_handle, index_handle)?;

        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        rename(&tmp_path, final_path)?;

        debug!(
            path = %final_path.display(),
            entries = properties.entry_count,
            blocks = index_entries.len(),
            "SSTable written"
        );
        Ok(())
    }
}
