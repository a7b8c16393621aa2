// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Smoke tests for the two top-level reliability evaluations' skew-length
//! reporting, run against whatever CPUs this machine actually permits.
//!
//! The single-permitted-CPU boundary case and the synthetic decreasing-step
//! / stuck-counter / poorly-interleaved streams from spec.md §8 are
//! unit-tested directly against `reliability.rs`'s inner functions and the
//! analyzers in `carousel.rs`/`probe_analysis.rs`, since those don't need
//! real hardware affinity to exercise.

#[test]
fn serial_reliability_reports_a_skew_length() {
    let result = wtm::eval_reliability_serial()
        .expect("serial reliability evaluation should succeed on this machine");
    let _ = result.skew_length;
}

#[test]
fn concurrent_reliability_reports_a_skew_length() {
    let result = wtm::eval_reliability_concurrent()
        .expect("concurrent reliability evaluation should succeed on this machine");
    let _ = result.skew_length;
}
