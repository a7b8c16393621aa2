// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Skew and monotonicity analysis over the globally-ordered concurrent
//! probe stream.

use crate::carousel::{signed_diff, SkewRange};
use crate::config;
use crate::error::WtmError;
use crate::probes::Probe;

/// Bounds the skew `TSC(other) - TSC(base)` from two CPUs' CAS-ordered
/// probe arrays, each sorted by `seq_num`.
///
/// Consecutive pairs of base probes define windows in the global order;
/// "other" probes whose `seq_num` falls strictly inside a window bound the
/// skew for that window. Windows with no "other" probes contribute nothing.
/// Too few contributing windows means the two streams didn't interleave
/// well enough to trust the result, which is reported as poor statistics
/// rather than folded silently into a wide (and misleadingly confident)
/// range.
pub fn analyze_skew_concurrent(base: &[Probe], other: &[Probe]) -> Result<SkewRange, WtmError> {
    let mut running: Option<SkewRange> = None;
    let mut contributing_windows = 0u64;
    let mut other_idx = 0usize;

    for w in base.windows(2) {
        let (p1, p2) = (w[0], w[1]);

        while other_idx < other.len() && other[other_idx].seq_num < p1.seq_num {
            other_idx += 1;
        }
        let window_start = other_idx;
        let mut window_end = other_idx;
        while window_end < other.len() && other[window_end].seq_num < p2.seq_num {
            window_end += 1;
        }
        if window_end == window_start {
            continue;
        }
        let sub = &other[window_start..window_end];
        other_idx = window_end;

        let t1 = p1.tsc_val;
        let t2 = p2.tsc_val;
        let big_t1 = sub.first().unwrap().tsc_val;
        let big_t2 = sub.last().unwrap().tsc_val;

        let t_delta = signed_diff(t2, t1)?;
        let big_t_delta = signed_diff(big_t2, big_t1)?;
        if t_delta < big_t_delta {
            return Err(WtmError::inconsistency(
                "elapsed TSC on the base CPU was smaller than on the other CPU over the same window; \
                 time appears to flow at different rates",
            ));
        }

        let upper = signed_diff(big_t1, t1)?;
        let lower = signed_diff(big_t2, t2)?;
        if lower > upper {
            return Err(WtmError::inconsistency(
                "derived skew bounds are inverted",
            ));
        }
        let window_range = SkewRange { min: lower, max: upper };
        contributing_windows += 1;

        running = Some(match running {
            None => window_range,
            Some(r) => r.intersect(window_range).ok_or_else(|| {
                WtmError::inconsistency("skew-range intersection across probe windows was empty")
            })?,
        });
    }

    if contributing_windows < config::TSC_DELTA_RANGE_COUNT_THRESHOLD {
        return Err(WtmError::poor_statistics(format!(
            "only {} of {} required interleaved windows were found",
            contributing_windows,
            config::TSC_DELTA_RANGE_COUNT_THRESHOLD
        )));
    }

    running.ok_or_else(|| WtmError::generic("base CPU produced no windows"))
}

/// Merges per-CPU probe arrays into one stream ordered by `seq_num`,
/// tagging each probe with the index of the CPU array it came from.
fn merge_by_seq_num(per_cpu: &[Vec<Probe>]) -> Vec<(usize, Probe)> {
    let total: usize = per_cpu.iter().map(|v| v.len()).sum();
    let mut merged: Vec<Option<(usize, Probe)>> = vec![None; total];
    for (cpu_idx, probes) in per_cpu.iter().enumerate() {
        for &p in probes {
            merged[p.seq_num as usize] = Some((cpu_idx, p));
        }
    }
    merged
        .into_iter()
        .map(|slot| slot.expect("seq_num values must partition 0..total exactly once"))
        .collect()
}

/// Result of walking the concurrent probe stream for monotonicity.
pub struct ConcurrentMonotonicity {
    pub is_monotonic: bool,
    pub full_loop_count: u64,
}

/// Walks the globally-ordered probe stream and reports whether TSC values
/// never decrease, plus how many non-overlapping "full loops" (a
/// consecutive run starting and ending on the origin CPU and touching
/// every permitted CPU in between) were found.
///
/// Loops are required to start on whichever CPU produced `seq_num = 0` (the
/// original library's choice); a generalization that accepts any starting
/// CPU would be strictly more permissive and equally sound, but isn't what
/// this counts.
pub fn check_monotonic_concurrent(per_cpu: &[Vec<Probe>]) -> ConcurrentMonotonicity {
    let stream = merge_by_seq_num(per_cpu);
    let num_cpus = per_cpu.len();

    let mut is_monotonic = true;
    let mut prev_tsc: Option<u64> = None;
    for &(_, probe) in &stream {
        if let Some(p) = prev_tsc {
            if probe.tsc_val < p {
                is_monotonic = false;
            }
        }
        prev_tsc = Some(probe.tsc_val);
    }

    let origin_cpu = stream.first().map(|&(cpu, _)| cpu);
    let mut full_loop_count = 0u64;
    if let Some(origin_cpu) = origin_cpu {
        let mut visited: Vec<bool> = vec![false; num_cpus];
        let mut in_progress = false;
        for &(cpu_idx, _) in &stream {
            if cpu_idx == origin_cpu {
                if in_progress && visited.iter().all(|&v| v) {
                    full_loop_count += 1;
                }
                visited.iter_mut().for_each(|v| *v = false);
                visited[cpu_idx] = true;
                in_progress = true;
            } else if in_progress {
                visited[cpu_idx] = true;
            }
        }
    }

    ConcurrentMonotonicity {
        is_monotonic,
        full_loop_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(tsc_val: u64, seq_num: u64) -> Probe {
        Probe { tsc_val, seq_num }
    }

    #[test]
    fn full_loop_counting_over_three_cpus() {
        // CPU order per seq_num: 0,1,2,0,1,2,0 -> two complete loops (0..3, 3..6),
        // with a trailing partial loop that doesn't count.
        let per_cpu = vec![
            vec![probe(100, 0), probe(103, 3), probe(106, 6)],
            vec![probe(101, 1), probe(104, 4)],
            vec![probe(102, 2), probe(105, 5)],
        ];
        let result = check_monotonic_concurrent(&per_cpu);
        assert!(result.is_monotonic);
        assert_eq!(result.full_loop_count, 2);
    }

    #[test]
    fn a_decrease_anywhere_in_the_stream_is_detected() {
        let per_cpu = vec![vec![probe(100, 0), probe(90, 1)]];
        let result = check_monotonic_concurrent(&per_cpu);
        assert!(!result.is_monotonic);
    }

    #[test]
    fn non_interleaved_stream_is_poor_statistics() {
        // All of "other"'s probes come after all of "base"'s: no windows
        // ever contain an "other" probe.
        let base: Vec<Probe> = (0..20).map(|i| probe(1000 + i, i)).collect();
        let other: Vec<Probe> = (20..40).map(|i| probe(1000 + i, i)).collect();
        let err = analyze_skew_concurrent(&base, &other).unwrap_err();
        assert!(matches!(err, WtmError::PoorStatistics(_)));
    }
}
