// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! The carousel sampler ("CPU-Switching") and its two serial analyzers.
//!
//! A single thread visits a fixed list of CPUs in order, reading the TSC
//! after each migration. Run with two CPUs (base + one other) the recorded
//! samples bound the skew between them; run with every permitted CPU they
//! give a monotonicity verdict over the whole visit order.

use tracing::{debug, enabled, trace, Level};

use crate::buffers::CacheAlignedBuffer;
use crate::error::WtmError;
use crate::platform;
use crate::tsc::read_tsc;

/// Samples from a carousel visiting `cpu_order.len()` CPUs for `rounds`
/// rounds, one cache-line-aligned buffer per visited CPU. CPU 0's buffer has
/// one extra element: a closing sample taken after the last round, strictly
/// after every other sample.
pub struct CarouselSamples {
    pub cpu_order: Vec<usize>,
    pub samples: Vec<CacheAlignedBuffer>,
}

/// Runs the carousel: for each round, pin to each CPU in `cpu_order` in turn
/// and record a TSC reading, then take one closing reading back on the
/// first CPU.
pub fn run_carousel(
    cpu_order: &[usize],
    rounds: u64,
    cache_line_size: usize,
) -> Result<CarouselSamples, WtmError> {
    debug!(cpus = ?cpu_order, rounds, "starting carousel sampling");
    let t = cpu_order.len();
    let mut samples: Vec<CacheAlignedBuffer> = (0..t)
        .map(|c| {
            let len = if c == 0 { rounds as usize + 1 } else { rounds as usize };
            CacheAlignedBuffer::new(len, cache_line_size)
        })
        .collect::<Result<_, _>>()?;

    for round in 0..rounds as usize {
        for (c, &cpu_id) in cpu_order.iter().enumerate() {
            platform::pin(cpu_id)?;
            samples[c].as_mut_slice()[round] = read_tsc();
        }
    }

    platform::pin(cpu_order[0])?;
    let closing_idx = rounds as usize;
    samples[0].as_mut_slice()[closing_idx] = read_tsc();

    if enabled!(Level::TRACE) {
        for (&cpu_id, buf) in cpu_order.iter().zip(&samples) {
            trace!(cpu_id, samples = ?buf.as_slice(), "carousel samples");
        }
    }

    Ok(CarouselSamples {
        cpu_order: cpu_order.to_vec(),
        samples,
    })
}

/// An inclusive bound on `TSC(other) - TSC(base)` at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkewRange {
    pub min: i64,
    pub max: i64,
}

impl SkewRange {
    pub(crate) fn intersect(self, other: SkewRange) -> Option<SkewRange> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if min > max {
            None
        } else {
            Some(SkewRange { min, max })
        }
    }

    /// The smallest range enclosing both `self` and `other` — unlike
    /// [`SkewRange::intersect`], which narrows a single pair's bound across
    /// repeated measurements, this widens across *different* CPU pairs so
    /// the reported length covers every permitted CPU's skew against the
    /// base, not just the widest single pair's own width.
    pub(crate) fn envelope(self, other: SkewRange) -> SkewRange {
        SkewRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Analyzes a two-CPU carousel (`base` has `rounds + 1` samples, `other` has
/// `rounds`) and bounds the skew `TSC(other) - TSC(base)`.
pub fn analyze_skew_serial(
    base: &[u64],
    other: &[u64],
    rounds: u64,
) -> Result<SkewRange, WtmError> {
    let rounds = rounds as usize;
    assert_eq!(base.len(), rounds + 1);
    assert_eq!(other.len(), rounds);

    check_same_cpu_monotonic(base, "base")?;
    check_same_cpu_monotonic(other, "other")?;
    check_not_stuck(base, "base")?;
    check_not_stuck(other, "other")?;

    let mut running: Option<SkewRange> = None;
    for i in 0..rounds {
        let t1 = base[i];
        let t2 = base[i + 1];
        let big_t = other[i];

        let d_t1 = signed_diff(big_t, t1)?;
        let d_t2 = signed_diff(big_t, t2)?;
        let round_range = SkewRange {
            min: d_t2,
            max: d_t1,
        };

        running = Some(match running {
            None => round_range,
            Some(r) => r.intersect(round_range).ok_or_else(|| {
                WtmError::inconsistency(
                    "skew-range intersection across carousel rounds was empty",
                )
            })?,
        });
    }

    running.ok_or_else(|| WtmError::generic("carousel produced no rounds"))
}

/// `other - base` as an `i64`, failing if the magnitude would not fit
/// (a sign that one of the TSCs wrapped).
pub(crate) fn signed_diff(a: u64, b: u64) -> Result<i64, WtmError> {
    let (diff, negative) = if a >= b { (a - b, false) } else { (b - a, true) };
    if diff > i64::MAX as u64 {
        return Err(WtmError::inconsistency(
            "TSC difference between two samples exceeds the representable range; a wrap is suspected",
        ));
    }
    let diff = diff as i64;
    Ok(if negative { -diff } else { diff })
}

fn check_same_cpu_monotonic(samples: &[u64], label: &str) -> Result<(), WtmError> {
    for w in samples.windows(2) {
        if w[1] < w[0] {
            return Err(WtmError::inconsistency(format!(
                "TSC samples on the {} CPU are not monotonically non-decreasing; a wrap is suspected",
                label
            )));
        }
    }
    Ok(())
}

fn check_not_stuck(samples: &[u64], label: &str) -> Result<(), WtmError> {
    if let (Some(&first), Some(&last)) = (samples.first(), samples.last()) {
        if samples.len() > 1 && first == last {
            return Err(WtmError::inconsistency(format!(
                "first and last TSC samples on the {} CPU are equal; the counter appears stuck",
                label
            )));
        }
    }
    Ok(())
}

/// Walks the carousel in round-major, CPU-index-inner order (plus the
/// closing sample) and reports whether the sequence is non-decreasing.
///
/// A negative result is data, not a failure: it's reported to the caller as
/// `is_monotonic = false` rather than as an error, since a single observed
/// decrease may just mean the counter wrapped.
pub fn is_carousel_monotonic(carousel: &CarouselSamples) -> bool {
    let t = carousel.samples.len();
    let rounds = if t == 0 { 0 } else { carousel.samples[0].len() - 1 };

    let mut prev: Option<u64> = None;
    for r in 0..rounds {
        for c in 0..t {
            let val = carousel.samples[c].as_slice()[r];
            if let Some(p) = prev {
                if val < p {
                    return false;
                }
            }
            prev = Some(val);
        }
    }
    // Closing sample on CPU 0.
    if let Some(&closing) = carousel.samples[0].as_slice().last() {
        if let Some(p) = prev {
            if closing < p {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_matches_worked_example() {
        // From the concrete-scenario example: base = [100,130,160,190],
        // other = [115,146,177], N=3.
        let base = [100u64, 130, 160, 190];
        let other = [115u64, 146, 177];
        let range = analyze_skew_serial(&base, &other, 3).unwrap();
        assert_eq!(range, SkewRange { min: -13, max: 15 });
        assert_eq!(range.max - range.min, 28);
    }

    #[test]
    fn stuck_counter_is_inconsistency() {
        let base = [100u64, 100, 100, 100];
        let other = [100u64, 100, 100];
        let err = analyze_skew_serial(&base, &other, 3).unwrap_err();
        assert!(matches!(err, WtmError::TscInconsistency(_)));
    }

    fn buffer_from(values: &[u64]) -> CacheAlignedBuffer {
        let mut buf = CacheAlignedBuffer::new(values.len(), 64).unwrap();
        buf.as_mut_slice().copy_from_slice(values);
        buf
    }

    #[test]
    fn single_cpu_carousel_is_trivially_monotonic() {
        let carousel = CarouselSamples {
            cpu_order: vec![0],
            samples: vec![buffer_from(&[10, 20, 30, 40])],
        };
        assert!(is_carousel_monotonic(&carousel));
    }

    #[test]
    fn a_single_decrease_is_detected_but_not_fatal() {
        let carousel = CarouselSamples {
            cpu_order: vec![0, 1],
            samples: vec![buffer_from(&[10, 20, 15]), buffer_from(&[12, 30])],
        };
        assert!(!is_carousel_monotonic(&carousel));
    }
}
