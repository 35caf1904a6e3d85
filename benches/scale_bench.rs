//! Benchmarks for the hot audio-path primitives: Q15 scaling and the
//! ring buffer hand-off.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use undertone::audio::ring_buffer::PcmRingBuffer;
use undertone::audio::volume::{apply_scale, apply_scale_bytes, scale_factor};

fn bench_apply_scale(c: &mut Criterion) {
    let factor = scale_factor(0.3);
    let samples: Vec<i16> = (0..4096).map(|i| (i % 32_768) as i16).collect();

    c.bench_function("apply_scale_4096_samples", |b| {
        b.iter(|| {
            let mut work = samples.clone();
            apply_scale(black_box(&mut work), black_box(factor));
            work
        })
    });

    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    c.bench_function("apply_scale_bytes_8192_bytes", |b| {
        b.iter(|| {
            let mut work = bytes.clone();
            apply_scale_bytes(black_box(&mut work), black_box(factor));
            work
        })
    });
}

fn bench_ring_roundtrip(c: &mut Criterion) {
    let timeout = Duration::from_millis(10);
    c.bench_function("ring_write_read_4096_bytes", |b| {
        let (mut producer, mut consumer) = PcmRingBuffer::with_capacity(8192);
        let chunk = vec![0x5Au8; 4096];
        let mut out = vec![0u8; 4096];
        b.iter(|| {
            producer.write(black_box(&chunk), timeout);
            consumer.read(black_box(&mut out), timeout)
        })
    });
}

criterion_group!(benches, bench_apply_scale, bench_ring_roundtrip);
criterion_main!(benches);
