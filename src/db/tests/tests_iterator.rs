#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::db::tests::helpers::*;
    use crate::db::Db;
    use tempfile::TempDir;

    #[test]
    fn test_full_scan_is_sorted_complete_and_duplicate_free() {
        let tmp = TempDir::new().unwrap();
        let db = open_small(tmp.path());

        // Enough volume for several flushes and at least one compaction,
        // so the scan crosses memtable, level 0, and deeper levels.
        fill(&db, 3000);
        assert!(db.level_file_counts().iter().skip(1).sum::<usize>() > 0);

        let keys = collect_keys(&db, b"");
        assert_eq!(keys.len(), 3000);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(key, format!("key-{i:06}").as_bytes());
        }
        for window in keys.windows(2) {
            assert!(window[0] < window[1]);
        }

        db.close().unwrap();
    }

    #[test]
    fn test_seek_starts_mid_range() {
        let tmp = TempDir::new().unwrap();
        let db = open_small(tmp.path());
        fill(&db, 500);

        let keys = collect_keys(&db, b"key-000250");
        assert_eq!(keys.len(), 250);
        assert_eq!(keys[0], b"key-000250".to_vec());

        // Seeking between two keys lands on the next one.
        let keys = collect_keys(&db, b"key-000250!");
        assert_eq!(keys[0], b"key-000251".to_vec());

        db.close().unwrap();
    }

    #[test]
    fn test_iterator_skips_tombstones() {
        let tmp = TempDir::new().unwrap();
        let db = open_small(tmp.path());
        fill(&db, 300);
        for i in (0..300).step_by(2) {
            let key = format!("key-{i:06}");
            db.remove(key.as_bytes()).unwrap();
        }

        let keys = collect_keys(&db, b"");
        assert_eq!(keys.len(), 150);
        for key in &keys {
            let i: usize = std::str::from_utf8(key)
                .unwrap()
                .trim_start_matches("key-")
                .parse()
                .unwrap();
            assert_eq!(i % 2, 1, "deleted key {i} leaked into the scan");
        }

        db.close().unwrap();
    }

    #[test]
    fn test_iterator_prefers_memtable_over_sst_versions() {
        let tmp = TempDir::new().unwrap();
        let db = open_small(tmp.path());

        fill(&db, 200); // pushed to SSTables by the small buffer
        db.add(b"key-000100", b"rewritten").unwrap(); // lives in memtable

        let mut iter = db.iterator().unwrap();
        iter.seek(b"key-000100").unwrap();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"key-000100");
        assert_eq!(iter.value(), b"rewritten");

        iter.next().unwrap();
        assert_eq!(iter.key(), b"key-000101");
        assert_eq!(iter.value(), b"val-000101");

        db.close().unwrap();
    }

    #[test]
    fn test_iterator_survives_memtable_reset() {
        let tmp = TempDir::new().unwrap();
        let db = open_small(tmp.path());

        fill(&db, 200);
        let seeded: HashSet<Vec<u8>> = (0..200)
            .map(|i| format!("key-{i:06}").into_bytes())
            .collect();

        let mut iter = db.iterator().unwrap();
        iter.seek(b"").unwrap();

        // Force several flush/reset cycles while the iterator is live.
        for i in 10_000..10_400 {
            let key = format!("key-{i:06}");
            db.add(key.as_bytes(), b"later-write").unwrap();
        }

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push(iter.key().to_vec());
            iter.next().unwrap();
        }

        // Strictly sorted, no duplicates, and every key present at the
        // seek point is still yielded exactly once.
        for window in seen.windows(2) {
            assert!(window[0] < window[1]);
        }
        let seen_set: HashSet<Vec<u8>> = seen.iter().cloned().collect();
        for key in &seeded {
            assert!(seen_set.contains(key), "reset dropped {key:?} from the scan");
        }

        db.close().unwrap();
    }

    #[test]
    fn test_empty_store_iterator_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open_with(tmp.path(), memtable_only_config()).unwrap();

        let mut iter = db.iterator().unwrap();
        iter.seek(b"").unwrap();
        assert!(!iter.valid());

        db.close().unwrap();
    }
}
