#[cfg(test)]
mod tests {
    use crate::manifest::{Manifest, ManifestError, ManifestTableEntry};
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[test]
    fn test_fresh_manifest_defaults() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        let manifest = Manifest::open(tmp.path()).unwrap();
        assert_eq!(manifest.active_wal().unwrap(), 1);
        assert_eq!(manifest.last_seq().unwrap(), 0);
        assert!(manifest.tables().unwrap().is_empty());
        assert_eq!(manifest.allocate_file_id().unwrap(), 1);
    }

    #[test]
    fn test_events_replay_after_reopen() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        {
            let manifest = Manifest::open(tmp.path()).unwrap();
            manifest.set_active_wal(3).unwrap();
            manifest.update_seq(99).unwrap();
            manifest.add_table(1, 0).unwrap();
            manifest.add_table(2, 1).unwrap();
            manifest.remove_table(1).unwrap();
            manifest.sync().unwrap();
        }

        let manifest = Manifest::open(tmp.path()).unwrap();
        assert_eq!(manifest.active_wal().unwrap(), 3);
        assert_eq!(manifest.last_seq().unwrap(), 99);
        assert_eq!(
            manifest.tables().unwrap(),
            vec![ManifestTableEntry { id: 2, level: 1 }]
        );
        // Allocation resumes above every id the log has seen.
        assert_eq!(manifest.allocate_file_id().unwrap(), 3);
    }

    #[test]
    fn test_checkpoint_then_reopen() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        {
            let manifest = Manifest::open(tmp.path()).unwrap();
            manifest.add_table(5, 0).unwrap();
            manifest.update_seq(10).unwrap();
            manifest.checkpoint().unwrap();
            // Post-checkpoint events replay on top of the snapshot.
            manifest.add_table(6, 1).unwrap();
            manifest.sync().unwrap();
        }

        let manifest = Manifest::open(tmp.path()).unwrap();
        let mut tables = manifest.tables().unwrap();
        tables.sort_by_key(|t| t.id);
        assert_eq!(
            tables,
            vec![
                ManifestTableEntry { id: 5, level: 0 },
                ManifestTableEntry { id: 6, level: 1 },
            ]
        );
        assert_eq!(manifest.last_seq().unwrap(), 10);
    }

    #[test]
    fn test_seq_never_moves_backwards() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        let manifest = Manifest::open(tmp.path()).unwrap();
        manifest.update_seq(50).unwrap();
        manifest.update_seq(20).unwrap();
        assert_eq!(manifest.last_seq().unwrap(), 50);
    }

    #[test]
    fn test_corrupted_snapshot_is_an_error() {
        init_tracing();
        let tmp = TempDir::new().unwrap();

        {
            let manifest = Manifest::open(tmp.path()).unwrap();
            manifest.add_table(1, 0).unwrap();
            manifest.checkpoint().unwrap();
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(tmp.path().join("MANIFEST"))
            .unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&[0xFF, 0xFF]).unwrap();
        drop(file);

        let err = Manifest::open(tmp.path()).unwrap_err();
        assert!(matches!(err, ManifestError::SnapshotChecksumMismatch));
    }
}
