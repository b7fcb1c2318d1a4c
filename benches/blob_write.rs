use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;
use vfs_content_store::{ContentStoreBuilder, ProjectContext, PublishTag, ResourceId};

/// Benchmark offline blob writes by payload size
fn bench_offline_writes(c: &mut Criterion) {
    let sizes = vec![1024, 64 * 1024, 1024 * 1024, 8 * 1024 * 1024];

    let temp_dir = TempDir::new().unwrap();
    let store = ContentStoreBuilder::new()
        .path(temp_dir.path().join("bench.db"))
        .build()
        .unwrap();

    let mut group = c.benchmark_group("offline_writes");

    for size in sizes {
        group.throughput(Throughput::Bytes(size as u64));
        let payload = vec![0xA5u8; size];
        let id = ResourceId::new();

        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                store.write_offline_content(id, black_box(payload)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark streaming reads by payload size
fn bench_streaming_reads(c: &mut Criterion) {
    let sizes = vec![64 * 1024, 1024 * 1024, 8 * 1024 * 1024];

    let temp_dir = TempDir::new().unwrap();
    let store = ContentStoreBuilder::new()
        .path(temp_dir.path().join("bench.db"))
        .build()
        .unwrap();

    let mut group = c.benchmark_group("streaming_reads");

    for size in sizes {
        group.throughput(Throughput::Bytes(size as u64));
        let id = ResourceId::new();
        store.write_offline_content(id, &vec![0x5Au8; size]).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut out = Vec::with_capacity(size);
            b.iter(|| {
                out.clear();
                store
                    .read_content_to(id, ProjectContext::Offline, &mut out)
                    .unwrap();
                black_box(&out);
            });
        });
    }

    group.finish();
}

/// Benchmark publishes that archive the prior version
fn bench_publish_with_history(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = ContentStoreBuilder::new()
        .path(temp_dir.path().join("publish.db"))
        .max_versions(5)
        .prune_on_publish(true)
        .build()
        .unwrap();

    let payload = vec![0x42u8; 64 * 1024];
    let id = ResourceId::new();
    let mut tag = PublishTag::FIRST;

    c.bench_function("publish_with_history_64k", |b| {
        b.iter(|| {
            store.publish(id, black_box(&payload), tag).unwrap();
            tag = tag.next().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_offline_writes,
    bench_streaming_reads,
    bench_publish_with_history
);
criterion_main!(benches);
