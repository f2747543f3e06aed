//! Mixed read/write workload benchmark.
//!
//! Drives one shared store from `T` threads split by an integer write
//! percentage `w`: `round(N * w / 100)` operations are writes, the rest
//! reads, and the thread pool is partitioned the same way. Keys are either
//! sequential per thread or drawn at random from the written range.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use rand::Rng;
use stratumdb::db::{Db, DbConfig};
use tempfile::TempDir;

const VALUE: &[u8] = b"benchmark-value-payload-0123456789";

struct WorkloadSpec {
    total_ops: usize,
    write_pct: usize,
    threads: usize,
    random_keys: bool,
}

fn bench_config() -> DbConfig {
    DbConfig {
        write_buffer_size: 512 * 1024,
        ..DbConfig::default()
    }
}

fn run_workload(db: &Arc<Db>, spec: &WorkloadSpec) {
    let write_ops = (spec.total_ops * spec.write_pct + 50) / 100;
    let read_ops = spec.total_ops - write_ops;
    let writer_threads = (spec.threads * spec.write_pct + 50) / 100;
    let reader_threads = spec.threads - writer_threads;

    let per_writer = if writer_threads > 0 { write_ops / writer_threads } else { 0 };
    let per_reader = if reader_threads > 0 { read_ops / reader_threads } else { 0 };

    let mut handles = Vec::with_capacity(spec.threads);

    for t in 0..writer_threads {
        let db = Arc::clone(db);
        let random_keys = spec.random_keys;
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            let started = Instant::now();
            for i in 0..per_writer {
                let n = if random_keys {
                    rng.random_range(0..per_writer.max(1))
                } else {
                    i
                };
                let key = format!("bench-{t:02}-{n:08}");
                db.add(key.as_bytes(), VALUE).expect("add");
            }
            db.telemetry().add_write_cost(started.elapsed());
        }));
    }

    for _ in 0..reader_threads {
        let db = Arc::clone(db);
        let writers = writer_threads.max(1);
        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();
            let started = Instant::now();
            for _ in 0..per_reader {
                let t = rng.random_range(0..writers);
                let n = rng.random_range(0..per_writer.max(1));
                let key = format!("bench-{t:02}-{n:08}");
                let _ = db.get(key.as_bytes()).expect("get");
            }
            db.telemetry().add_read_cost(started.elapsed());
        }));
    }

    // Join every spawned thread before reporting.
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }
}

fn mixed_workloads(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_workload");
    group.sample_size(10);

    for (name, write_pct) in [("write_heavy_80", 80), ("balanced_50", 50), ("read_heavy_20", 20)] {
        group.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let dir = TempDir::new().expect("tempdir");
                    let db =
                        Arc::new(Db::open_with(dir.path(), bench_config()).expect("open"));
                    // Seed so read-heavy runs have something to find.
                    for i in 0..2_000usize {
                        let key = format!("bench-00-{i:08}");
                        db.add(key.as_bytes(), VALUE).expect("seed");
                    }
                    (dir, db)
                },
                |(dir, db)| {
                    run_workload(
                        &db,
                        &WorkloadSpec {
                            total_ops: 8_000,
                            write_pct,
                            threads: 8,
                            random_keys: true,
                        },
                    );
                    drop(db);
                    drop(dir);
                },
                criterion::BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, mixed_workloads);
criterion_main!(benches);
