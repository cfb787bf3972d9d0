//! Throughput Benchmark for RaptorKV
//!
//! Measures the command layer end to end (dispatch, encoding, meta
//! bookkeeping, engine) under a few representative workloads.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use raptorkv::storage::{ScanOptions, Storage, StorageEngine};
use raptorkv::{CommandHandler, Session};
use std::sync::Arc;
use std::time::Duration;

fn cmd(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::from(p.to_string())).collect()
}

fn setup() -> (CommandHandler, Session) {
    let handler = CommandHandler::new(Arc::new(StorageEngine::new()));
    let session = handler.session();
    (handler, session)
}

/// Benchmark string commands
fn bench_strings(c: &mut Criterion) {
    let (handler, mut session) = setup();
    for i in 0..100_000 {
        handler.execute(&mut session, &cmd(&["SET", &format!("key:{}", i), "value"]));
    }

    let mut group = c.benchmark_group("string");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("new:{}", i);
            black_box(handler.execute(&mut session, &cmd(&["SET", &key, "small_value"])));
            i += 1;
        });
    });

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(handler.execute(&mut session, &cmd(&["GET", &key])));
            i += 1;
        });
    });

    group.bench_function("incr_single_counter", |b| {
        b.iter(|| black_box(handler.execute(&mut session, &cmd(&["INCR", "counter"]))));
    });

    group.finish();
}

/// Benchmark collection writes: every one is a meta read, a member lookup and
/// a batch commit
fn bench_collections(c: &mut Criterion) {
    let (handler, mut session) = setup();

    let mut group = c.benchmark_group("collections");
    group.throughput(Throughput::Elements(1));

    group.bench_function("sadd_new_member", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let member = format!("m{}", i);
            black_box(handler.execute(&mut session, &cmd(&["SADD", "set", &member])));
            i += 1;
        });
    });

    group.bench_function("hset_1000_fields", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let field = format!("f{}", i % 1000);
            black_box(handler.execute(&mut session, &cmd(&["HSET", "hash", &field, "v"])));
            i += 1;
        });
    });

    group.bench_function("zadd_rescore", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let score = (i % 100).to_string();
            let member = format!("m{}", i % 1000);
            black_box(handler.execute(&mut session, &cmd(&["ZADD", "zset", &score, &member])));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark prefix scans over a large set
fn bench_scan(c: &mut Criterion) {
    let (handler, mut session) = setup();
    for chunk in 0..10 {
        let mut args = vec!["SADD".to_string(), "big".to_string()];
        args.extend((0..1_000).map(|i| format!("member:{}:{}", chunk, i)));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        handler.execute(&mut session, &cmd(&args));
    }

    let mut group = c.benchmark_group("scan");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("smembers_10k", |b| {
        b.iter(|| black_box(handler.execute(&mut session, &cmd(&["SMEMBERS", "big"]))));
    });

    group.bench_function("engine_prefix_scan_10k", |b| {
        let store = handler.store();
        let prefix = raptorkv::encoding::collection_prefix(raptorkv::encoding::KeyType::Set, b"big");
        b.iter(|| {
            let mut n = 0usize;
            store
                .scan(&prefix, ScanOptions::keys_only(), &mut |_, _| n += 1)
                .unwrap();
            black_box(n)
        });
    });

    group.finish();
}

/// Benchmark concurrent SADD on one key (lock stripe contention)
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_sadd_same_key", |b| {
        b.iter(|| {
            let (handler, _) = setup();
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let handler = handler.clone();
                    thread::spawn(move || {
                        let mut session = handler.session();
                        for i in 0..2_500 {
                            let member = format!("{}:{}", t, i);
                            handler.execute(&mut session, &cmd(&["SADD", "s", &member]));
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(handler.store().len().unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_strings,
    bench_collections,
    bench_scan,
    bench_concurrent,
);

criterion_main!(benches);
