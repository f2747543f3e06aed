#[cfg(test)]
mod tests {
    use crate::db::tests::helpers::*;
    use crate::db::{Db, DbError};
    use tempfile::TempDir;

    #[test]
    fn test_add_get_and_missing_key() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open_with(tmp.path(), memtable_only_config()).unwrap();

        db.add(b"key-0", b"val-0").unwrap();
        db.add(b"key-1", b"val-1").unwrap();

        assert_eq!(db.get(b"key-0").unwrap(), Some(b"val-0".to_vec()));
        assert_eq!(db.get(b"key-1").unwrap(), Some(b"val-1".to_vec()));
        assert_eq!(db.get(b"key-2").unwrap(), None);

        db.close().unwrap();
    }

    #[test]
    fn test_read_your_write_through_overwrites() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open_with(tmp.path(), memtable_only_config()).unwrap();

        db.add(b"k", b"A").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"A".to_vec()));
        db.add(b"k", b"B").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"B".to_vec()));
        db.remove(b"k").unwrap();
        assert_eq!(db.get(b"k").unwrap(), None);
        db.add(b"k", b"C").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"C".to_vec()));

        db.close().unwrap();
    }

    #[test]
    fn test_tombstone_shadows_flushed_value() {
        let tmp = TempDir::new().unwrap();
        let db = open_small(tmp.path());

        // Push the original value down into the SSTables, then delete.
        fill(&db, 400);
        assert!(db.level_file_counts().iter().sum::<usize>() > 0);

        db.remove(b"key-000123").unwrap();
        assert_eq!(db.get(b"key-000123").unwrap(), None);

        // Another burst of writes moves the tombstone on disk too.
        for i in 1000..1400 {
            let key = format!("key-{i:06}");
            db.add(key.as_bytes(), b"filler-value").unwrap();
        }
        assert_eq!(db.get(b"key-000123").unwrap(), None);
        assert_eq!(db.get(b"key-000124").unwrap(), Some(b"val-000124".to_vec()));

        db.close().unwrap();
    }

    #[test]
    fn test_get_returns_latest_surviving_version() {
        let tmp = TempDir::new().unwrap();
        let db = open_small(tmp.path());

        for round in 0..5 {
            for i in 0..200 {
                let key = format!("key-{i:06}");
                let value = format!("round-{round}");
                db.add(key.as_bytes(), value.as_bytes()).unwrap();
            }
        }

        // Many superseded versions now live in deeper files; every lookup
        // must resolve to the round-4 value.
        for i in (0..200).step_by(17) {
            let key = format!("key-{i:06}");
            assert_eq!(db.get(key.as_bytes()).unwrap(), Some(b"round-4".to_vec()));
        }

        db.close().unwrap();
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open_with(tmp.path(), memtable_only_config()).unwrap();

        assert!(matches!(
            db.add(b"", b"v"),
            Err(DbError::InvalidArgument(_))
        ));
        assert!(matches!(
            db.add(b"k", b""),
            Err(DbError::InvalidArgument(_))
        ));
        assert!(matches!(db.remove(b""), Err(DbError::InvalidArgument(_))));

        // No partial effect.
        assert_eq!(db.get(b"k").unwrap(), None);

        db.close().unwrap();
    }

    #[test]
    fn test_open_ex_sets_cache_size() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open_ex(tmp.path(), 512 * 1024).unwrap();
        db.add(b"k", b"v").unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        db.close().unwrap();
    }

    #[test]
    fn test_telemetry_accumulates() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open_with(tmp.path(), memtable_only_config()).unwrap();

        db.telemetry()
            .add_write_cost(std::time::Duration::from_millis(5));
        db.telemetry()
            .add_write_cost(std::time::Duration::from_millis(7));
        db.telemetry()
            .add_read_cost(std::time::Duration::from_millis(3));

        assert_eq!(
            db.telemetry().write_cost(),
            std::time::Duration::from_millis(12)
        );
        assert_eq!(
            db.telemetry().read_cost(),
            std::time::Duration::from_millis(3)
        );

        db.close().unwrap();
    }
}
