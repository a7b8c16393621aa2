// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Compile-time configuration constants.
//!
//! Values are carried over from the original C implementation's
//! configuration header. They govern how much sampling work the reliability
//! and calibration operations do and what statistical thresholds they hold
//! themselves to; none of them are meant to be tuned at runtime.

/// Round trips across CPUs when calculating an enclosing TSC skew range,
/// serial path.
pub const CALC_TSC_RANGE_ROUND_COUNT: u64 = 100;

/// Round trips across CPUs when evaluating TSC monotonicity, serial path.
pub const EVAL_TSC_MONOTCTY_ROUND_COUNT: u64 = 100;

/// Seconds a concurrent probe worker is allowed to run before the lifecycle
/// controller cancels it.
pub const TSC_PROBE_WAIT_TIME_SECS: u64 = 300;

/// Seconds between successive non-blocking join attempts while waiting for
/// probe workers to finish.
pub const TSC_PROBE_COMPLETION_CHECK_PERIOD_SECS: u64 = 1;

/// Seconds to wait for cancelled probe workers to finish before giving up
/// and detaching them. Must be strictly greater than
/// [`TSC_PROBE_COMPLETION_CHECK_PERIOD_SECS`].
pub const TSC_PROBE_WAIT_AFTER_CANCEL_SECS: u64 = 10;

/// Minimum number of independent skew-range estimations a probe sequence
/// must yield for the combined skew range to be trusted.
pub const TSC_DELTA_RANGE_COUNT_THRESHOLD: u64 = 10;

/// Probes collected per CPU when calculating the enclosing TSC skew range,
/// concurrent path.
pub const CALC_TSC_RANGE_PROBES_COUNT: u64 = 1000;

/// Probes collected per CPU when evaluating TSC monotonicity, concurrent
/// path.
pub const EVAL_TSC_MONOTCTY_PROBES_COUNT: u64 = 1000;

/// Minimum number of non-overlapping full loops required for a positive
/// monotonicity verdict to be considered statistically significant.
pub const FULL_LOOP_COUNT_THRESHOLD: u64 = 10;

/// Number of ticks-per-second samples to take when calibrating.
pub const TSC_PER_SEC_SAMPLE_COUNT: usize = 30;

/// System-time window (microseconds) matched against TSC change when taking
/// one ticks-per-second sample.
pub const TIME_PERIOD_TO_MATCH_WITH_TSC_USECS: u64 = 500_000;

/// Time horizon (seconds) used to derive the multiply-shift conversion
/// parameters. Larger values trade accuracy near the horizon for a wider
/// accurate range; see the conversion-parameter builder.
pub const TIME_CONVERSION_MODULUS_SECS: u64 = 10;
