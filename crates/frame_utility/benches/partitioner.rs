use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rayon::prelude::*;

use frame_utility::{GrowableSequence, Partitioner, PartitionerConfig};

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("partitioned_sum");
    let partitioner = Partitioner::new(PartitionerConfig::default()).unwrap();

    for len in [1usize << 10, 1 << 14, 1 << 18] {
        let seq = (0..len as u64).collect::<GrowableSequence<_>>();
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(
            criterion::BenchmarkId::new("sequential", len),
            &seq,
            |b, seq| {
                b.iter(|| black_box(seq.iter().map(|x| x.wrapping_mul(3)).sum::<u64>()));
            },
        );

        group.bench_with_input(
            criterion::BenchmarkId::new("partitioner", len),
            &seq,
            |b, seq| {
                b.iter(|| {
                    let total = Arc::new(AtomicU64::new(0));
                    let t = total.clone();
                    partitioner
                        .for_each_chunk(seq, move |chunk| {
                            let s = chunk.iter().map(|x| x.wrapping_mul(3)).sum::<u64>();
                            t.fetch_add(s, Ordering::Relaxed);
                        })
                        .unwrap();
                    black_box(total.load(Ordering::Relaxed));
                });
            },
        );

        group.bench_with_input(
            criterion::BenchmarkId::new("rayon_par_iter", len),
            &seq,
            |b, seq| {
                b.iter(|| {
                    black_box(
                        seq.as_slice()
                            .par_iter()
                            .map(|x| x.wrapping_mul(3))
                            .sum::<u64>(),
                    )
                });
            },
        );
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
