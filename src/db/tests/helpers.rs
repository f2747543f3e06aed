use std::path::Path;

use crate::db::{Db, DbConfig};
use tracing_subscriber::EnvFilter;

/// Initialize a tracing subscriber controlled by `RUST_LOG`.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config large enough that nothing is flushed to SSTables.
pub fn memtable_only_config() -> DbConfig {
    init_tracing();
    DbConfig {
        write_buffer_size: 64 * 1024 * 1024,
        ..DbConfig::default()
    }
}

/// Small write buffer that triggers flushes and compactions quickly.
pub fn small_buffer_config() -> DbConfig {
    init_tracing();
    DbConfig {
        write_buffer_size: 4 * 1024,
        block_size: 512,
        max_levels: 4,
        level0_compaction_trigger: 4,
        level_base_bytes: 32 * 1024,
        level_multiplier: 4,
        max_table_size: 16 * 1024,
        ..DbConfig::default()
    }
}

/// Open a store with the small-buffer config.
pub fn open_small(dir: &Path) -> Db {
    Db::open_with(dir, small_buffer_config()).expect("open")
}

/// Insert `count` formatted key/value pairs.
pub fn fill(db: &Db, count: usize) {
    for i in 0..count {
        let key = format!("key-{i:06}");
        let value = format!("val-{i:06}");
        db.add(key.as_bytes(), value.as_bytes()).expect("add");
    }
}

/// Collect every key an iterator yields from a seek at the given key.
pub fn collect_keys(db: &Db, seek: &[u8]) -> Vec<Vec<u8>> {
    let mut iter = db.iterator().expect("iterator");
    iter.seek(seek).expect("seek");
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next().expect("next");
    }
    keys
}
