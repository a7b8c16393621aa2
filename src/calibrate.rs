// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Ticks-per-second measurement, outlier filtering, conversion-parameter
//! construction, and wrap-time estimation.

use std::time::Instant;

use tracing::debug;

use crate::conversion::ConversionParams;
use crate::error::WtmError;
use crate::platform;
use crate::tsc::read_tsc;

/// Measures how many TSC ticks occur during a `window_usecs`-microsecond
/// span of system time.
///
/// System time is read immediately before and after each TSC read so the
/// asymmetric gap between a time read and a TSC read stays statistically
/// comparable across both ends of the measurement.
pub fn measure_ticks_per_sec(window_usecs: u64) -> Result<u64, WtmError> {
    let t0 = Instant::now();
    let x0 = read_tsc();

    let (x1, elapsed_ns) = loop {
        let t1 = Instant::now();
        let x1 = read_tsc();
        let elapsed_ns = t1.saturating_duration_since(t0).as_nanos() as u64;
        if elapsed_ns >= window_usecs * 1000 {
            break (x1, elapsed_ns);
        }
    };

    if x1 <= x0 {
        return Err(WtmError::inconsistency(
            "TSC did not advance across the calibration window",
        ));
    }
    let delta = x1 - x0;
    if delta > u64::MAX / 1_000_000_000 {
        return Err(WtmError::inconsistency(
            "TSC delta during calibration window is too large to convert without overflow",
        ));
    }

    let tsc_per_sec = delta * 1_000_000_000 / elapsed_ns;
    debug!(delta, elapsed_ns, tsc_per_sec, "took one ticks-per-second sample");
    Ok(tsc_per_sec)
}

/// Takes [`config::TSC_PER_SEC_SAMPLE_COUNT`] ticks-per-second samples,
/// filters outliers with Welford's incremental mean/variance, and averages
/// the rest.
///
/// Welford's recurrence avoids summing large tick-per-second values
/// directly (each is on the order of 10^9-10^10, so a naive running sum
/// across dozens of samples would lose precision well before overflowing).
/// Samples farther than one standard deviation from the mean are dropped;
/// the retained samples are averaged by shifting them down by the minimum
/// retained value first, so the summation itself never approaches u64's
/// range either.
pub fn outlier_filtered_average(samples: &[u64]) -> Result<u64, WtmError> {
    if samples.is_empty() {
        return Err(WtmError::generic("no ticks-per-second samples to average"));
    }
    if samples.len() == 1 {
        return Ok(samples[0]);
    }

    let mut mean = 0f64;
    let mut m2 = 0f64;
    for (i, &s) in samples.iter().enumerate() {
        let n = (i + 1) as f64;
        let delta = s as f64 - mean;
        mean += delta / n;
        let delta2 = s as f64 - mean;
        m2 += delta * delta2;
    }
    let variance = m2 / (samples.len() - 1) as f64;
    let std_dev = variance.sqrt();

    let retained: Vec<u64> = samples
        .iter()
        .copied()
        .filter(|&s| (s as f64 - mean).abs() <= std_dev)
        .collect();
    let retained: &[u64] = if retained.is_empty() { samples } else { &retained };

    let min_sample = *retained.iter().min().unwrap();
    let shifted_sum: u64 = retained.iter().map(|&s| s - min_sample).sum();
    debug!(
        total = samples.len(),
        retained = retained.len(),
        discarded = samples.len() - retained.len(),
        "filtered ticks-per-second outliers"
    );
    Ok(shifted_sum / retained.len() as u64 + min_sample)
}

/// Builds multiply-shift conversion parameters for `tsc_per_sec` ticks per
/// second, accurate over a `modulus_secs`-second time horizon.
///
/// See the module-level formula: a tick count is split into a whole-modulus
/// part (converted by table lookup) and a remainder (converted by the same
/// multiply-shift as the table entries, so accuracy is uniform across a
/// modulus boundary).
pub fn build_conversion_params(
    tsc_per_sec: u64,
    modulus_secs: u64,
) -> Result<ConversionParams, WtmError> {
    let tsc_worth_of_modulus = modulus_secs
        .checked_mul(tsc_per_sec)
        .ok_or_else(|| WtmError::generic("modulus_secs * tsc_per_sec overflows u64"))?;
    if tsc_worth_of_modulus == 0 {
        return Err(WtmError::generic("tsc_per_sec must be positive"));
    }

    let mult_bound = u64::MAX / tsc_worth_of_modulus;
    let factor_bound = (mult_bound as u128 * tsc_per_sec as u128 / 1_000_000_000u128) as u64;

    let shift = highest_pow2_leq(factor_bound);
    let factor = 1u64 << shift;
    let mult = (factor as u128 * 1_000_000_000u128 / tsc_per_sec as u128) as u64;

    let tsc_remainder_length = highest_pow2_leq(tsc_worth_of_modulus);
    let tsc_modulus = 1u64 << tsc_remainder_length;
    let tsc_remainder_bitmask = tsc_modulus - 1;
    let nsecs_per_tsc_modulus = ((tsc_modulus as u128 * mult as u128) >> shift) as u64;

    Ok(ConversionParams {
        mult,
        shift,
        tsc_remainder_length,
        tsc_remainder_bitmask,
        nsecs_per_tsc_modulus,
        tsc_ticks_per_sec: tsc_per_sec,
    })
}

/// The exponent of the largest power of two not exceeding `n` (0 if `n` is
/// 0).
fn highest_pow2_leq(n: u64) -> u32 {
    if n == 0 {
        0
    } else {
        63 - n.leading_zeros()
    }
}

/// Estimates seconds until the fastest observed per-CPU TSC would overflow
/// `u64`, restoring affinity afterwards regardless of outcome.
pub fn estimate_wrap_time_secs(
    permitted_cpus: &[usize],
    params: &ConversionParams,
) -> Result<u64, WtmError> {
    let state = platform::snapshot()?;
    let result = (|| {
        let mut max_tsc = 0u64;
        for &cpu_id in permitted_cpus {
            platform::pin(cpu_id)?;
            max_tsc = max_tsc.max(read_tsc());
        }
        let remaining_ticks = u64::MAX - max_tsc;
        Ok(params.ticks_to_nanos(remaining_ticks) / 1_000_000_000)
    })();
    platform::restore(&state)?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_params_match_worked_example() {
        let params = build_conversion_params(3_000_000_000, 10).unwrap();
        assert_eq!(params.shift, 30);
        assert_eq!(params.mult, 357_913_941);
        assert_eq!(params.tsc_remainder_length, 34);
        assert_eq!(params.tsc_remainder_bitmask, (1u64 << 34) - 1);
    }

    #[test]
    fn average_discards_the_extreme_outlier() {
        let samples = [
            2_999_999_000u64,
            3_000_000_000,
            3_000_001_000,
            3_000_000_500,
            3_000_000_500,
            9_999_999_999,
            3_000_000_200,
        ];
        let avg = outlier_filtered_average(&samples).unwrap();
        assert!(avg >= 2_999_999_000 && avg <= 3_000_001_000);
    }

    #[test]
    fn highest_pow2_leq_matches_examples() {
        assert_eq!(highest_pow2_leq(1_844_674_407), 30);
        assert_eq!(highest_pow2_leq(30_000_000_000), 34);
        assert_eq!(highest_pow2_leq(1), 0);
    }
}
