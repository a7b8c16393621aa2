// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use wtm::ConversionParams;

fn params() -> ConversionParams {
    ConversionParams {
        mult: 357_913_941,
        shift: 30,
        tsc_remainder_length: 34,
        tsc_remainder_bitmask: (1u64 << 34) - 1,
        nsecs_per_tsc_modulus: ((1u64 << 34) as u128 * 357_913_941u128 >> 30) as u64,
        tsc_ticks_per_sec: 3_000_000_000,
    }
}

fn ticks_to_nanos(c: &mut Criterion) {
    let params = params();
    c.bench_function("ticks_to_nanos", |b| {
        b.iter(|| params.ticks_to_nanos(black_box(123_456_789)))
    });
}

fn raw_tsc_read(c: &mut Criterion) {
    c.bench_function("read_tsc", |b| b.iter(wtm::read_tsc));
}

criterion_group!(benches, ticks_to_nanos, raw_tsc_read);
criterion_main!(benches);
