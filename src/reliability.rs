// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! The three public top-level operations.
//!
//! Each acquires a process-state snapshot, drives its sub-algorithms, and
//! restores the snapshot on every exit path — including error paths, so a
//! failed evaluation never leaves the calling thread pinned somewhere it
//! didn't start.

use tracing::{debug, instrument, warn};

use crate::calibrate;
use crate::carousel::{self, SkewRange};
use crate::config;
use crate::conversion::ConversionParams;
use crate::error::WtmError;
use crate::platform;
use crate::probe_analysis;
use crate::probes;

/// Result of a reliability evaluation: how wide the skew between CPUs can
/// be, and whether TSC values stayed non-decreasing.
#[derive(Debug, Clone, Copy)]
pub struct ReliabilityResult {
    pub skew_length: u64,
    pub is_monotonic: bool,
}

/// Evaluates TSC reliability by serially migrating one thread across every
/// permitted CPU ("CPU-Switching").
#[instrument(skip_all)]
pub fn eval_reliability_serial() -> Result<ReliabilityResult, WtmError> {
    debug!("starting serial (CPU-Switching) reliability evaluation");
    let state = platform::snapshot()?;
    let result = eval_reliability_serial_inner(&state);
    if let Err(e) = platform::restore(&state) {
        warn!(error = %e, "failed to restore affinity after serial reliability evaluation");
        return Err(WtmError::generic(format!(
            "reliability was evaluated but affinity could not be restored: {}",
            e
        )));
    }
    result
}

fn eval_reliability_serial_inner(state: &platform::ProcessState) -> Result<ReliabilityResult, WtmError> {
    let permitted = platform::cpus_in_set(&state.initial_cpu_set, state.num_cpus);
    if permitted.len() <= 1 {
        return Ok(ReliabilityResult {
            skew_length: 0,
            is_monotonic: true,
        });
    }

    let base = permitted[0];
    let mut enclosing: Option<SkewRange> = None;
    for &other in &permitted[1..] {
        let carousel = carousel::run_carousel(
            &[base, other],
            config::CALC_TSC_RANGE_ROUND_COUNT,
            state.cache_line_size,
        )?;
        let range: SkewRange = carousel::analyze_skew_serial(
            carousel.samples[0].as_slice(),
            carousel.samples[1].as_slice(),
            config::CALC_TSC_RANGE_ROUND_COUNT,
        )?;
        enclosing = Some(match enclosing {
            None => range,
            Some(e) => e.envelope(range),
        });
    }
    // The reported length is the width of the range enclosing every
    // permitted CPU's skew against the base, not the widest single pair.
    let max_skew_length = enclosing.map_or(0, |e| (e.max - e.min) as u64);

    let monotonicity_carousel = carousel::run_carousel(
        &permitted,
        config::EVAL_TSC_MONOTCTY_ROUND_COUNT,
        state.cache_line_size,
    )?;
    let is_monotonic = carousel::is_carousel_monotonic(&monotonicity_carousel);
    if !is_monotonic {
        warn!("serial carousel observed a non-monotonic TSC sequence");
    }

    Ok(ReliabilityResult {
        skew_length: max_skew_length,
        is_monotonic,
    })
}

/// Evaluates TSC reliability with one worker per permitted CPU,
/// concurrently, ordered by a CAS sequence counter ("CAS-Ordered Probes").
#[instrument(skip_all)]
pub fn eval_reliability_concurrent() -> Result<ReliabilityResult, WtmError> {
    debug!("starting concurrent (CAS-Ordered Probes) reliability evaluation");
    let state = platform::snapshot()?;
    let result = eval_reliability_concurrent_inner(&state);
    if let Err(e) = platform::restore(&state) {
        warn!(error = %e, "failed to restore affinity after concurrent reliability evaluation");
        return Err(WtmError::generic(format!(
            "reliability was evaluated but affinity could not be restored: {}",
            e
        )));
    }
    result
}

fn eval_reliability_concurrent_inner(
    state: &platform::ProcessState,
) -> Result<ReliabilityResult, WtmError> {
    let permitted = platform::cpus_in_set(&state.initial_cpu_set, state.num_cpus);
    if permitted.len() <= 1 {
        return Ok(ReliabilityResult {
            skew_length: 0,
            is_monotonic: true,
        });
    }

    let base = permitted[0];
    let mut enclosing: Option<SkewRange> = None;
    for &other in &permitted[1..] {
        let probes = probes::collect(
            &[base, other],
            config::CALC_TSC_RANGE_PROBES_COUNT,
            state.cache_line_size,
        )?;
        let range = probe_analysis::analyze_skew_concurrent(&probes[0], &probes[1])?;
        enclosing = Some(match enclosing {
            None => range,
            Some(e) => e.envelope(range),
        });
    }
    // As in the serial path above: the enclosing range across every
    // permitted CPU, not the widest single pair.
    let max_skew_length = enclosing.map_or(0, |e| (e.max - e.min) as u64);

    let monotonicity_probes = probes::collect(
        &permitted,
        config::EVAL_TSC_MONOTCTY_PROBES_COUNT,
        state.cache_line_size,
    )?;
    let monotonicity = probe_analysis::check_monotonic_concurrent(&monotonicity_probes);
    if monotonicity.is_monotonic && monotonicity.full_loop_count < config::FULL_LOOP_COUNT_THRESHOLD {
        return Err(WtmError::poor_statistics(format!(
            "only {} of {} required full loops were found in the probe stream",
            monotonicity.full_loop_count,
            config::FULL_LOOP_COUNT_THRESHOLD
        )));
    }
    if !monotonicity.is_monotonic {
        warn!("concurrent probe stream observed a non-monotonic TSC sequence");
    }

    Ok(ReliabilityResult {
        skew_length: max_skew_length,
        is_monotonic: monotonicity.is_monotonic,
    })
}

/// Result of TSC-to-nanoseconds calibration.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationResult {
    pub params: ConversionParams,
    pub secs_before_wrap: u64,
}

/// Measures TSC ticks per second and builds the multiply-shift conversion
/// parameters, plus an estimate of how long until the counter wraps.
#[instrument(skip_all)]
pub fn get_conversion_params() -> Result<CalibrationResult, WtmError> {
    debug!("starting TSC-to-nanoseconds calibration");
    let state = platform::snapshot()?;

    let mut samples = Vec::with_capacity(config::TSC_PER_SEC_SAMPLE_COUNT);
    for _ in 0..config::TSC_PER_SEC_SAMPLE_COUNT {
        samples.push(calibrate::measure_ticks_per_sec(
            config::TIME_PERIOD_TO_MATCH_WITH_TSC_USECS,
        )?);
    }
    let tsc_per_sec = calibrate::outlier_filtered_average(&samples)?;
    debug!(tsc_per_sec, "averaged ticks-per-second samples");
    let params = calibrate::build_conversion_params(tsc_per_sec, config::TIME_CONVERSION_MODULUS_SECS)?;

    let permitted = platform::cpus_in_set(&state.initial_cpu_set, state.num_cpus);
    let secs_before_wrap = calibrate::estimate_wrap_time_secs(&permitted, &params)?;
    debug!(secs_before_wrap, "estimated TSC wrap time");

    platform::restore(&state)?;

    Ok(CalibrationResult {
        params,
        secs_before_wrap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A `ProcessState` confined to a single CPU, so the `permitted.len() <=
    /// 1` early-return path can be exercised without depending on how many
    /// CPUs the test machine actually has.
    fn single_cpu_state() -> platform::ProcessState {
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe { libc::CPU_SET(0, &mut set) };
        platform::ProcessState {
            num_cpus: 1,
            initial_cpu: 0,
            initial_cpu_set: set,
            cache_line_size: 64,
        }
    }

    #[test]
    fn serial_eval_on_a_single_permitted_cpu_is_trivially_reliable() {
        let state = single_cpu_state();
        let result = eval_reliability_serial_inner(&state).unwrap();
        assert_eq!(result.skew_length, 0);
        assert!(result.is_monotonic);
    }

    #[test]
    fn concurrent_eval_on_a_single_permitted_cpu_is_trivially_reliable() {
        let state = single_cpu_state();
        let result = eval_reliability_concurrent_inner(&state).unwrap();
        assert_eq!(result.skew_length, 0);
        assert!(result.is_monotonic);
    }
}
