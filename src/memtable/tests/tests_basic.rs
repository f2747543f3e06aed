#[cfg(test)]
mod tests {
    use crate::memtable::{LookupResult, Memtable, MemtableError};
    use crate::wal::Wal;
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn open_memtable(tmp: &TempDir, buffer: usize) -> Memtable {
        init_tracing();
        let path = tmp
            .path()
            .join(Wal::<crate::memtable::MemtableRecord>::file_name(1));
        Memtable::open(path, buffer).unwrap()
    }

    #[test]
    fn test_add_then_get() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        mem.add(b"alpha", b"1").unwrap();
        mem.add(b"beta", b"2").unwrap();

        assert_eq!(mem.get(b"alpha"), LookupResult::Value(b"1".to_vec()));
        assert_eq!(mem.get(b"beta"), LookupResult::Value(b"2".to_vec()));
        assert_eq!(mem.get(b"gamma"), LookupResult::Miss);
        assert_eq!(mem.len(), 2);
    }

    #[test]
    fn test_overwrite_keeps_latest_and_key_count() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        mem.add(b"k", b"A").unwrap();
        mem.add(b"k", b"B").unwrap();

        assert_eq!(mem.get(b"k"), LookupResult::Value(b"B".to_vec()));
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.add_count(), 2);
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        mem.add(b"k", b"v").unwrap();
        mem.remove(b"k").unwrap();

        assert_eq!(mem.get(b"k"), LookupResult::Tombstone);
        // The tombstone stays in the map; it must shadow older layers.
        assert_eq!(mem.len(), 1);
        assert_eq!(mem.del_count(), 1);
    }

    #[test]
    fn test_remove_then_add_resurrects() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        mem.add(b"k", b"A").unwrap();
        mem.remove(b"k").unwrap();
        mem.add(b"k", b"C").unwrap();

        assert_eq!(mem.get(b"k"), LookupResult::Value(b"C".to_vec()));
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        mem.add(b"a", b"1").unwrap();
        let first = mem.max_seq();
        mem.remove(b"a").unwrap();
        assert!(mem.max_seq() > first);
    }

    #[test]
    fn test_needs_flush_after_threshold() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 256);

        assert!(!mem.needs_flush());
        for i in 0..8 {
            let key = format!("key-{i}");
            mem.add(key.as_bytes(), &[b'x'; 64]).unwrap();
        }
        assert!(mem.needs_flush());
    }

    #[test]
    fn test_empty_key_and_value_rejected() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        assert!(matches!(
            mem.add(b"", b"v"),
            Err(MemtableError::InvalidArgument(_))
        ));
        assert!(matches!(
            mem.add(b"k", b""),
            Err(MemtableError::InvalidArgument(_))
        ));
        assert!(matches!(
            mem.remove(b""),
            Err(MemtableError::InvalidArgument(_))
        ));

        // Rejected mutations must have no effect.
        assert!(mem.is_empty());
        assert_eq!(mem.add_count(), 0);
    }

    #[test]
    fn test_oversized_key_rejected() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        let huge = vec![b'k'; crate::memtable::MAX_KEY_LEN + 1];
        assert!(matches!(
            mem.add(&huge, b"v"),
            Err(MemtableError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_frozen_serves_reads_in_order() {
        let tmp = TempDir::new().unwrap();
        let mem = open_memtable(&tmp, 64 * 1024);

        mem.add(b"b", b"2").unwrap();
        mem.add(b"a", b"1").unwrap();
        mem.remove(b"c").unwrap();

        let frozen = mem.into_frozen();
        assert_eq!(frozen.get(b"a"), LookupResult::Value(b"1".to_vec()));
        assert_eq!(frozen.get(b"c"), LookupResult::Tombstone);
        assert_eq!(frozen.get(b"d"), LookupResult::Miss);

        let keys: Vec<_> = frozen.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
