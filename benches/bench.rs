use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use flate2::write::GzEncoder;
use flate2::Compression;
use pgz::ParGzWriterBuilder;
use std::io::Write;

/// Deterministic, moderately compressible filler text, repeated to the
/// requested size.
fn sample_data(size: usize) -> Vec<u8> {
    const LINE: &[u8] = b"the quick brown fox jumps over the lazy dog\n";
    let mut buf = Vec::with_capacity(size);
    while buf.len() < size {
        buf.extend_from_slice(LINE);
    }
    buf.truncate(size);
    buf
}

fn compress_parallel(data: &[u8], num_threads: usize, blocksize: usize, level: u32) {
    let mut out = Vec::with_capacity(data.len());
    let mut writer = ParGzWriterBuilder::new()
        .thread(num_threads)
        .blocksize(blocksize)
        .compression_level(Compression::new(level))
        .build(&mut out);
    writer.write_all(data).unwrap();
    writer.close().unwrap();
}

fn compress_single_threaded(data: &[u8], level: u32) {
    let mut out = Vec::with_capacity(data.len());
    let mut encoder = GzEncoder::new(&mut out, Compression::new(level));
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap();
}

fn criterion_benchmark(c: &mut Criterion) {
    let data = sample_data(16 * 1024 * 1024);
    let blocksize = 1024 * 1024;
    let level = 6;

    let mut group = c.benchmark_group("Compression");
    for num_threads in [1usize, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("pgz", num_threads),
            &num_threads,
            |b, &num_threads| {
                b.iter(|| compress_parallel(&data, num_threads, blocksize, level));
            },
        );
    }
    group.bench_function("flate2 (single-threaded)", |b| {
        b.iter(|| compress_single_threaded(&data, level));
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
