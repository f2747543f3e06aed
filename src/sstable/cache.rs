//! LRU block cache shared by every SSTable reader of a store.
//!
//! Decoded data blocks are cached under `(file_id, block_offset)` with the
//! block's byte length as its weight, so the configured capacity bounds the
//! cache in bytes. The cache is internally synchronized and safe under
//! concurrent readers.

use std::sync::Arc;

use moka::sync::Cache;

use super::SstError;

/// Shared, bounded cache of decoded SSTable data blocks.
///
/// Cloning is cheap and shares the underlying cache.
#[derive(Clone)]
pub struct BlockCache {
    inner: Cache<(u64, u64), Arc<Vec<u8>>>,
}

impl BlockCache {
    /// Create a cache bounded to `capacity_bytes` of block payload.
    pub fn new(capacity_bytes: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_key: &(u64, u64), block: &Arc<Vec<u8>>| {
                u32::try_from(block.len()).unwrap_or(u32::MAX)
            })
            .build();
        Self { inner }
    }

    /// Fetch the block at `(file_id, offset)`, invoking `load` on a miss.
    ///
    /// A failed load is not cached; the next access retries.
    pub fn get_or_load<F>(&self, file_id: u64, offset: u64, load: F) -> Result<Arc<Vec<u8>>, SstError>
    where
        F: FnOnce() -> Result<Vec<u8>, SstError>,
    {
        if let Some(block) = self.inner.get(&(file_id, offset)) {
            return Ok(block);
        }

        let block = Arc::new(load()?);
        self.inner.insert((file_id, offset), Arc::clone(&block));
        Ok(block)
    }

    /// Number of cached blocks (approximate, for diagnostics).
    pub fn entry_count(&self) -> u64 {
        // Maintenance is otherwise deferred; run it so the count reflects
        // recent inserts.
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}
