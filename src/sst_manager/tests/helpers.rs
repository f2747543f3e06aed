use std::path::Path;
use std::sync::Arc;

use crate::manifest::Manifest;
use crate::memtable::{FrozenMemtable, Memtable, MemtableRecord};
use crate::sst_manager::{SstManager, SstManagerOptions};
use crate::wal::Wal;
use tracing_subscriber::EnvFilter;

/// Initialize a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small-file options so a handful of keys exercises multiple levels.
pub fn small_options() -> SstManagerOptions {
    SstManagerOptions {
        max_levels: 4,
        level0_compaction_trigger: 3,
        level_base_bytes: 4 * 1024,
        level_multiplier: 4,
        max_table_size: 2 * 1024,
        block_size: 512,
    }
}

/// Open a manager (and its manifest) rooted at `dir`.
pub fn open_manager(dir: &Path, opts: SstManagerOptions) -> (SstManager, Arc<Manifest>) {
    init_tracing();
    let manifest = Arc::new(Manifest::open(dir).unwrap());
    let manager =
        SstManager::open(dir, 1024 * 1024, opts, Arc::clone(&manifest)).unwrap();
    (manager, manifest)
}

/// Build a frozen memtable holding `(key, value)` pairs, using the given
/// WAL segment number.
pub fn frozen_from_pairs(dir: &Path, wal_seq: u64, pairs: &[(&[u8], &[u8])]) -> FrozenMemtable {
    let wal_path = dir.join(Wal::<MemtableRecord>::file_name(wal_seq));
    let memtable = Memtable::open(wal_path, 64 * 1024 * 1024).unwrap();
    for (key, value) in pairs {
        memtable.add(key, value).unwrap();
    }
    memtable.into_frozen()
}

/// Build a frozen memtable containing tombstones for the given keys.
pub fn frozen_with_tombstones(
    dir: &Path,
    wal_seq: u64,
    pairs: &[(&[u8], &[u8])],
    tombstones: &[&[u8]],
) -> FrozenMemtable {
    let wal_path = dir.join(Wal::<MemtableRecord>::file_name(wal_seq));
    let memtable = Memtable::open(wal_path, 64 * 1024 * 1024).unwrap();
    for (key, value) in pairs {
        memtable.add(key, value).unwrap();
    }
    for key in tombstones {
        memtable.remove(key).unwrap();
    }
    memtable.into_frozen()
}
