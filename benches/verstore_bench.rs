use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use verstore::storage::backend::{Backend, BackendConfig};
use verstore::storage::{FsContentStore, MemoryContentStore, MetadataIndex};
use verstore::store::VersionedFileStore;

fn open_index(dir: &TempDir) -> Arc<MetadataIndex> {
    let backend = Backend::new(BackendConfig {
        data_dir: dir.path().join("metadata"),
        ..BackendConfig::default()
    })
    .unwrap();
    Arc::new(MetadataIndex::new(backend))
}

fn memory_store(dir: &TempDir) -> VersionedFileStore {
    VersionedFileStore::new(open_index(dir), Arc::new(MemoryContentStore::new()))
}

fn fs_store(dir: &TempDir) -> VersionedFileStore {
    let content = FsContentStore::open(dir.path().join("blobs")).unwrap();
    VersionedFileStore::new(open_index(dir), Arc::new(content))
}

// ============================================================================
// Benchmark: Save Operations
// ============================================================================

fn bench_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_operations");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(10));

    // Metadata cost alone: new versions of one name
    let dir = TempDir::new().unwrap();
    let store = memory_store(&dir);
    group.bench_function("save_same_name_memory", |b| {
        b.iter(|| {
            let mut reader: &[u8] = b"payload";
            black_box(store.save("bench/same.bin", &mut reader, None).unwrap())
        })
    });

    // Full path through the filesystem with varying payload sizes
    for size in [1_024usize, 65_536, 1_048_576] {
        let dir = TempDir::new().unwrap();
        let store = fs_store(&dir);
        let payload = vec![0xabu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("save_fs_payload", size), &size, |b, _| {
            b.iter(|| {
                let mut reader: &[u8] = &payload;
                black_box(store.save("bench/sized.bin", &mut reader, None).unwrap())
            })
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Fetch Operations
// ============================================================================

fn bench_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch_operations");
    group.sample_size(100);

    let dir = TempDir::new().unwrap();
    let store = fs_store(&dir);
    for _ in 0..100 {
        let mut reader: &[u8] = &[7u8; 4096];
        store.save("bench/fetch.bin", &mut reader, None).unwrap();
    }

    group.bench_function("fetch_latest", |b| {
        b.iter(|| {
            let fetched = store.fetch("bench/fetch.bin", None).unwrap();
            black_box(fetched.blob.into_bytes().unwrap())
        })
    });

    group.bench_function("fetch_pinned_version", |b| {
        b.iter(|| {
            let fetched = store.fetch("bench/fetch.bin", Some(50)).unwrap();
            black_box(fetched.blob.into_bytes().unwrap())
        })
    });

    group.finish();
}

// ============================================================================
// Benchmark: Listing
// ============================================================================

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_operations");

    for files in [10usize, 100, 1000] {
        let dir = TempDir::new().unwrap();
        let store = memory_store(&dir);
        for i in 0..files {
            for _ in 0..3 {
                let mut reader: &[u8] = b"x";
                store.save(&format!("bench/file{}", i), &mut reader, None).unwrap();
            }
        }

        group.throughput(Throughput::Elements(files as u64));
        group.bench_with_input(BenchmarkId::new("list_files", files), &files, |b, _| {
            b.iter(|| black_box(store.list().unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_save, bench_fetch, bench_list);

criterion_main!(benches);
