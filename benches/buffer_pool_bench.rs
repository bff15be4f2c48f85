use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use karstdb::storage::buffer::{BufferPool, BufferPoolInstance, ParallelBufferPool};

// Create temporary db for benchmarking
fn create_bench_buffer_pool(pool_size: usize) -> Arc<BufferPoolInstance> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolInstance::new(pool_size, path).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn create_bench_parallel_pool(num_instances: usize, pool_size: usize) -> Arc<ParallelBufferPool> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(ParallelBufferPool::new(num_instances, pool_size, path).unwrap());

    std::mem::forget(temp_file);

    buffer_pool
}

fn buffer_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    for size in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("sequential_access", size), size, |b, &size| {
            let buffer_pool = create_bench_buffer_pool(size);

            let mut page_ids = Vec::new();
            for i in 0..size {
                let (page, page_id) = buffer_pool.new_page().unwrap();
                {
                    let mut page_guard = page.write();
                    page_guard.data[0] = (i % 256) as u8;
                }
                buffer_pool.unpin_page(page_id, true).unwrap();
                page_ids.push(page_id);
            }

            b.iter(|| {
                for &page_id in &page_ids {
                    let page = buffer_pool.fetch_page(page_id).unwrap();
                    {
                        let _page_guard = page.read();
                    }
                    buffer_pool.unpin_page(page_id, false).unwrap();
                }
            });
        });
    }

    // random access with more pages than frames, to exercise eviction
    group.bench_function("random_access_with_eviction", |b| {
        let buffer_pool = create_bench_buffer_pool(64);
        let mut page_ids = Vec::new();
        for _ in 0..256 {
            let (_, page_id) = buffer_pool.new_page().unwrap();
            buffer_pool.unpin_page(page_id, true).unwrap();
            page_ids.push(page_id);
        }

        let mut rng = StdRng::seed_from_u64(42);
        b.iter(|| {
            let page_id = page_ids[rng.gen_range(0..page_ids.len())];
            let page = buffer_pool.fetch_page(page_id).unwrap();
            {
                let _page_guard = page.read();
            }
            buffer_pool.unpin_page(page_id, false).unwrap();
        });
    });

    group.finish();
}

fn parallel_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ParallelBufferPool");

    for instances in [1usize, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("concurrent_fetch", instances),
            instances,
            |b, &instances| {
                let buffer_pool = create_bench_parallel_pool(instances, 64);
                let mut page_ids = Vec::new();
                for _ in 0..instances * 64 {
                    let (_, page_id) = buffer_pool.new_page().unwrap();
                    buffer_pool.unpin_page(page_id, false).unwrap();
                    page_ids.push(page_id);
                }

                b.iter(|| {
                    std::thread::scope(|scope| {
                        for chunk in page_ids.chunks(page_ids.len() / 4 + 1) {
                            let buffer_pool = buffer_pool.clone();
                            scope.spawn(move || {
                                for &page_id in chunk {
                                    let page = buffer_pool.fetch_page(page_id).unwrap();
                                    {
                                        let _page_guard = page.read();
                                    }
                                    buffer_pool.unpin_page(page_id, false).unwrap();
                                }
                            });
                        }
                    });
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, buffer_pool_benchmark, parallel_pool_benchmark);
criterion_main!(benches);
