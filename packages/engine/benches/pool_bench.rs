// packages/engine/benches/pool_bench.rs
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::*;
use robosim_engine::runtime::{ContextPool, ContextPoolConfig, HeadlessBackend};

fn pool(max_contexts: usize) -> ContextPool {
    ContextPool::with_config(
        Arc::new(HeadlessBackend::new()),
        ContextPoolConfig {
            max_contexts,
            ..Default::default()
        },
    )
    .expect("pool config rejected in benchmark")
}

fn uncontended_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("acquire_release");

    let pool = pool(4);
    group.bench_function("uncontended", |b| {
        b.iter(|| {
            let handle = pool.acquire().expect("acquire failed in benchmark");
            pool.release(black_box(handle))
                .expect("release failed in benchmark");
        });
    });

    group.bench_function("lease_guard", |b| {
        b.iter(|| {
            let lease = pool.lease().expect("lease failed in benchmark");
            black_box(lease.slot());
        });
    });

    group.finish();
}

fn contended_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended");
    group.sample_size(20);

    for threads in [2usize, 8, 16] {
        group.throughput(Throughput::Elements((threads * 100) as u64));
        group.bench_with_input(BenchmarkId::new("4_contexts", threads), &threads, |b, &threads| {
            let pool = pool(4);
            b.iter(|| {
                thread::scope(|s| {
                    for _ in 0..threads {
                        s.spawn(|| {
                            for _ in 0..100 {
                                let lease = pool.lease().expect("lease failed in benchmark");
                                black_box(lease.slot());
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

criterion_group!(benches, uncontended_benchmark, contended_benchmark);
criterion_main!(benches);
