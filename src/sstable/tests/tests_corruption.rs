#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};

    use crate::memtable::{Op, VersionEntry};
    use crate::sstable::{self, BlockCache, SstError, SstReader, SstWriter};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn write_table(dir: &TempDir, file_id: u64) -> std::path::PathBuf {
        init_tracing();
        let entries: Vec<(Vec<u8>, VersionEntry)> = (0..50)
            .map(|i| {
                (
                    format!("key-{i:03}").into_bytes(),
                    VersionEntry {
                        value: format!("value-{i:03}").into_bytes(),
                        op: Op::Add,
                        seq: i as u64 + 1,
                    },
                )
            })
            .collect();
        let path = dir.path().join(sstable::file_name(file_id));
        SstWriter::new(&path, 512).build(&entries).unwrap();
        path
    }

    fn corrupt_at(path: &std::path::Path, offset: u64) {
        let mut file = OpenOptions::new().write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[0xFF, 0xFF, 0xFF]).unwrap();
    }

    #[test]
    fn test_bad_header_magic_rejects_open() {
        let tmp = TempDir::new().unwrap();
        let path = write_table(&tmp, 1);
        corrupt_at(&path, 0);

        let err = SstReader::open(&path, 1, BlockCache::new(1024)).unwrap_err();
        assert!(matches!(err, SstError::Corruption(_)));
    }

    #[test]
    fn test_corrupted_data_block_fails_lookup() {
        let tmp = TempDir::new().unwrap();
        let path = write_table(&tmp, 1);
        // Damage the first data block's payload, just past the header and
        // the block's length prefix.
        corrupt_at(&path, 12 + 4 + 10);

        let reader = SstReader::open(&path, 1, BlockCache::new(1024 * 1024)).unwrap();
        let err = reader.get(b"key-001").unwrap_err();
        assert!(matches!(err, SstError::ChecksumMismatch));
    }

    #[test]
    fn test_corrupted_footer_rejects_open() {
        let tmp = TempDir::new().unwrap();
        let path = write_table(&tmp, 1);
        let len = std::fs::metadata(&path).unwrap().len();
        corrupt_at(&path, len - 10);

        let err = SstReader::open(&path, 1, BlockCache::new(1024)).unwrap_err();
        assert!(matches!(
            err,
            SstError::ChecksumMismatch | SstError::Corruption(_)
        ));
    }

    #[test]
    fn test_truncated_file_rejects_open() {
        let tmp = TempDir::new().unwrap();
        let path = write_table(&tmp, 1);
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(20).unwrap();
        drop(file);

        let err = SstReader::open(&path, 1, BlockCache::new(1024)).unwrap_err();
        assert!(matches!(
            err,
            SstError::Corruption(_) | SstError::ChecksumMismatch | SstError::Encoding(_)
        ));
    }
}
