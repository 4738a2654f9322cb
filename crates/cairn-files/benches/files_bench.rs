//! Throughput benchmarks for cairn-files.
//!
//! Run with: `cargo bench -p cairn-files`

use cairn_files::{ChunkPlanner, ContentDigest, HashAlgorithm, Hasher};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rand::RngCore;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::hint::black_box;

// ============================================================================
// Hashing
// ============================================================================

fn bench_one_shot_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("one_shot_hash");
    let mut rng = SmallRng::seed_from_u64(7);

    for size in [4 * 1024, 256 * 1024, 4 * 1024 * 1024] {
        let mut data = vec![0u8; size];
        rng.fill_bytes(&mut data);

        group.throughput(Throughput::Bytes(size as u64));
        for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            group.bench_with_input(
                BenchmarkId::new(algorithm.as_str(), size),
                &data,
                |b, data| b.iter(|| ContentDigest::of(algorithm, black_box(data))),
            );
        }
    }

    group.finish();
}

fn bench_incremental_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_hash");
    let data = vec![0x5Au8; 4 * 1024 * 1024];
    group.throughput(Throughput::Bytes(data.len() as u64));

    for piece in [1024, 64 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(piece), &piece, |b, &piece| {
            b.iter(|| {
                let mut hasher = Hasher::default();
                for part in data.chunks(piece) {
                    hasher.update(black_box(part));
                }
                hasher.finalize()
            })
        });
    }

    group.finish();
}

// ============================================================================
// Chunking
// ============================================================================

fn bench_stream_chunker(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_chunker");
    let data = vec![0xA5u8; 16 * 1024 * 1024];
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_size in [256 * 1024, 1024 * 1024, 8 * 1024 * 1024] {
        let planner = ChunkPlanner::new(chunk_size).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &planner,
            |b, planner| {
                b.iter(|| {
                    let mut chunker = planner.stream(&data[..]);
                    let mut count = 0u64;
                    while let Some(chunk) = chunker.next_chunk().unwrap() {
                        count += chunk.range.length;
                    }
                    count
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_one_shot_hash,
    bench_incremental_hash,
    bench_stream_chunker
);
criterion_main!(benches);
