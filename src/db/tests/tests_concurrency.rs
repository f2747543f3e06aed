#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use crate::db::tests::helpers::*;
    use crate::db::{Db, DbConfig};
    use rand::Rng;
    use tempfile::TempDir;

    fn concurrent_config() -> DbConfig {
        init_tracing();
        DbConfig {
            write_buffer_size: 64 * 1024,
            level_base_bytes: 256 * 1024,
            level_multiplier: 4,
            max_levels: 4,
            ..DbConfig::default()
        }
    }

    #[test]
    fn test_disjoint_writers_with_racing_readers() {
        const WRITERS: usize = 4;
        const READERS: usize = 4;
        const KEYS_PER_WRITER: usize = 2500;

        let tmp = TempDir::new().unwrap();
        let db = Arc::new(Db::open_with(tmp.path(), concurrent_config()).unwrap());

        let mut handles = Vec::new();

        for w in 0..WRITERS {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                for i in 0..KEYS_PER_WRITER {
                    let key = format!("w{w}-key-{i:05}");
                    let value = format!("w{w}-val-{i:05}");
                    db.add(key.as_bytes(), value.as_bytes()).unwrap();
                }
            }));
        }

        let bad_observations = Arc::new(AtomicUsize::new(0));
        for _ in 0..READERS {
            let db = Arc::clone(&db);
            let bad = Arc::clone(&bad_observations);
            handles.push(thread::spawn(move || {
                let mut rng = rand::rng();
                for _ in 0..2000 {
                    let w = rng.random_range(0..WRITERS);
                    let i = rng.random_range(0..KEYS_PER_WRITER);
                    let key = format!("w{w}-key-{i:05}");
                    let expected = format!("w{w}-val-{i:05}");
                    // Either not written yet, or exactly the value the
                    // writer will have stored. Anything else is a lost or
                    // torn write.
                    match db.get(key.as_bytes()).unwrap() {
                        None => {}
                        Some(v) if v == expected.as_bytes() => {}
                        Some(_) => {
                            bad.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }));
        }

        // Every spawned thread is joined before asserting.
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(bad_observations.load(Ordering::Relaxed), 0);

        // Final count: all writer keys present with correct values.
        let mut present = 0;
        for w in 0..WRITERS {
            for i in 0..KEYS_PER_WRITER {
                let key = format!("w{w}-key-{i:05}");
                if db.get(key.as_bytes()).unwrap().is_some() {
                    present += 1;
                }
            }
        }
        assert_eq!(present, WRITERS * KEYS_PER_WRITER);
    }

    #[test]
    fn test_half_write_half_read_workload_terminates() {
        const TOTAL_THREADS: usize = 32;
        const WRITE_PCT: usize = 50;
        const OPS_PER_THREAD: usize = 400;

        // Integer split of the thread count by write percentage.
        let writer_threads = TOTAL_THREADS * WRITE_PCT / 100;
        let reader_threads = TOTAL_THREADS - writer_threads;
        assert_eq!(writer_threads, reader_threads);

        let tmp = TempDir::new().unwrap();
        let db = Arc::new(Db::open_with(tmp.path(), concurrent_config()).unwrap());

        let mut handles = Vec::new();
        for t in 0..writer_threads {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                for i in 0..OPS_PER_THREAD {
                    let key = format!("t{t}-{i:04}");
                    db.add(key.as_bytes(), b"payload").unwrap();
                }
            }));
        }
        for _ in 0..reader_threads {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                let mut rng = rand::rng();
                for _ in 0..OPS_PER_THREAD {
                    let t = rng.random_range(0..writer_threads.max(1));
                    let i = rng.random_range(0..OPS_PER_THREAD);
                    let key = format!("t{t}-{i:04}");
                    let _ = db.get(key.as_bytes()).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        for t in 0..writer_threads {
            let key = format!("t{t}-{:04}", OPS_PER_THREAD - 1);
            assert_eq!(db.get(key.as_bytes()).unwrap(), Some(b"payload".to_vec()));
        }
    }

    #[test]
    fn test_single_key_mutations_serialize() {
        let tmp = TempDir::new().unwrap();
        let db = Arc::new(Db::open_with(tmp.path(), memtable_only_config()).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let db = Arc::clone(&db);
            handles.push(thread::spawn(move || {
                for i in 0..500 {
                    let value = format!("t{t}-{i}");
                    db.add(b"contended", value.as_bytes()).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // The surviving value is whatever mutation completed last; it must
        // be one of the values actually written, never a torn mix.
        let value = db.get(b"contended").unwrap().expect("key must exist");
        let text = String::from_utf8(value).unwrap();
        assert!(text.starts_with('t') && text.contains('-'));
    }
}
