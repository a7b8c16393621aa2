// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

use wtm::ConversionParams;

fn worked_example_params() -> ConversionParams {
    // tsc_per_sec = 3_000_000_000, modulus = 10s, from the library's worked example.
    ConversionParams {
        mult: 357_913_941,
        shift: 30,
        tsc_remainder_length: 34,
        tsc_remainder_bitmask: (1u64 << 34) - 1,
        nsecs_per_tsc_modulus: ((1u64 << 34) as u128 * 357_913_941u128 >> 30) as u64,
        tsc_ticks_per_sec: 3_000_000_000,
    }
}

#[test]
fn zero_ticks_is_zero_nanos() {
    let params = worked_example_params();
    assert_eq!(params.ticks_to_nanos(0), 0);
}

#[test]
fn one_second_of_ticks_is_within_tolerance_of_one_second() {
    let params = worked_example_params();
    let ns = params.ticks_to_nanos(params.tsc_ticks_per_sec);
    assert!((ns as i64 - 1_000_000_000i64).abs() <= 2);
}

#[quickcheck_macros::quickcheck]
fn converting_whole_seconds_is_linear_within_a_modulus(k: u8) -> bool {
    let params = worked_example_params();
    // Stay within the 10-second modulus horizon the parameters were built for.
    let k = (k % 10) as u64;
    let ticks = params.tsc_ticks_per_sec * k;
    let ns = params.ticks_to_nanos(ticks);
    let expected = k * 1_000_000_000;
    (ns as i64 - expected as i64).abs() <= (k as i64 + 1)
}
