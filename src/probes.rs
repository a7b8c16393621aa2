// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Concurrent probe workers and their lifecycle controller.
//!
//! Each permitted CPU runs one worker that samples the TSC under a shared,
//! CAS-ordered sequence counter, producing a single total order across all
//! workers that reflects the real time order in which the TSC was read.
//!
//! Rust threads cannot be preemptively cancelled the way `pthread_cancel`
//! cancels a thread at an arbitrary instruction. Workers here are instead
//! cooperatively cancelled: each one checks a shared [`AtomicBool`] once per
//! probe iteration. A worker stuck in a kernel call rather than spinning in
//! its sampling loop won't observe the flag until it returns from that
//! call — the same situation the original library handles by detaching
//! threads that don't respond to cancellation within a budget.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, enabled, trace, Level};

use crate::config;
use crate::error::ErrorDetail;
use crate::error::WtmError;
use crate::platform;
use crate::tsc::read_tsc;

/// A single TSC reading tagged with its position in the global order.
#[derive(Debug, Clone, Copy)]
pub struct Probe {
    pub tsc_val: u64,
    pub seq_num: u64,
}

/// Pads a single atomic out to a full cache line, so two of these never
/// false-share regardless of struct layout. Same idiom as `tscns`'s
/// `Sequence` wrapper around its optimistic-lock counter.
#[repr(align(64))]
struct Aligned(AtomicU64);

struct Shared {
    ready_count: Aligned,
    total_workers: u64,
    seq_counter: Aligned,
    cancel: AtomicBool,
}

/// Collects `probes_per_worker` CAS-ordered probes on each of `cpu_ids`.
///
/// Each worker writes into its own pair of cache-line-aligned buffers
/// (`cache_line_size` bytes), so no two workers' sample writes ever share a
/// cache line. Returns one probe vector per CPU, in `cpu_ids` order, on
/// success.
pub fn collect(
    cpu_ids: &[usize],
    probes_per_worker: u64,
    cache_line_size: usize,
) -> Result<Vec<Vec<Probe>>, WtmError> {
    let num_workers = cpu_ids.len() as u64;
    num_workers
        .checked_mul(probes_per_worker)
        .ok_or_else(|| WtmError::generic("num_workers * probes_per_worker overflows"))?;

    debug!(cpus = ?cpu_ids, probes_per_worker, "starting concurrent probe collection");
    let shared = Arc::new(Shared {
        ready_count: Aligned(AtomicU64::new(0)),
        total_workers: num_workers,
        seq_counter: Aligned(AtomicU64::new(0)),
        cancel: AtomicBool::new(false),
    });

    let mut handles: Vec<Option<JoinHandle<Result<Vec<Probe>, WtmError>>>> = Vec::new();
    let mut started = 0usize;
    let mut start_failure: Option<WtmError> = None;

    for &cpu_id in cpu_ids {
        let shared = Arc::clone(&shared);
        let builder = std::thread::Builder::new().name(format!("wtm-probe-cpu{}", cpu_id));
        match builder.spawn(move || probe_worker(cpu_id, probes_per_worker, cache_line_size, shared)) {
            Ok(handle) => {
                handles.push(Some(handle));
                started += 1;
            }
            Err(e) => {
                start_failure = Some(WtmError::generic(format!(
                    "couldn't start probe worker for CPU {}: {}",
                    cpu_id, e
                )));
                break;
            }
        }
    }

    let mut detail = ErrorDetail::new();
    if let Some(e) = start_failure {
        detail.push(format!(
            "only {} of {} probe workers were started: {}",
            started, num_workers, e
        ));
        shared.cancel.store(true, Ordering::SeqCst);
    }

    let wait_budget = Duration::from_secs(config::TSC_PROBE_WAIT_TIME_SECS);
    let check_period = Duration::from_secs(config::TSC_PROBE_COMPLETION_CHECK_PERIOD_SECS);
    let after_cancel_budget = Duration::from_secs(config::TSC_PROBE_WAIT_AFTER_CANCEL_SECS);

    let mut results: Vec<Option<Result<Vec<Probe>, WtmError>>> =
        (0..handles.len()).map(|_| None).collect();

    join_with_timeout(&mut handles, &mut results, wait_budget, check_period);

    let still_running = handles.iter().any(Option::is_some);
    if still_running {
        if !shared.cancel.swap(true, Ordering::SeqCst) {
            detail.push("some probe workers exceeded the wait budget and were cancelled");
        }
        join_with_timeout(&mut handles, &mut results, after_cancel_budget, check_period);
    }

    let mut detached = 0;
    for (slot, handle) in handles.into_iter().enumerate() {
        if let Some(h) = handle {
            drop(h);
            detached += 1;
            results[slot] = Some(Err(WtmError::generic("probe worker detached after cancellation")));
        }
    }
    if detached > 0 {
        detail.push(format!("{} probe worker(s) had to be detached", detached));
    }

    let mut ok_results = Vec::with_capacity(results.len());
    for r in results {
        match r.expect("every slot is filled by join_with_timeout or the detach loop") {
            Ok(probes) => ok_results.push(probes),
            Err(e) => detail.push(e.to_string()),
        }
    }

    if !detail.is_empty() {
        return Err(WtmError::generic(detail.to_string()));
    }

    if enabled!(Level::TRACE) {
        for (&cpu_id, probes) in cpu_ids.iter().zip(&ok_results) {
            let seq_nums: Vec<u64> = probes.iter().map(|p| p.seq_num).collect();
            trace!(cpu_id, ?seq_nums, "probe sequence");
        }
    }

    Ok(ok_results)
}

fn join_with_timeout(
    handles: &mut [Option<JoinHandle<Result<Vec<Probe>, WtmError>>>],
    results: &mut [Option<Result<Vec<Probe>, WtmError>>],
    budget: Duration,
    check_period: Duration,
) {
    let deadline = Instant::now() + budget;
    loop {
        let mut all_done = true;
        for (slot, handle) in handles.iter_mut().enumerate() {
            if let Some(h) = handle {
                if h.is_finished() {
                    let h = handle.take().unwrap();
                    let joined = h.join().unwrap_or_else(|_| {
                        Err(WtmError::generic("probe worker panicked"))
                    });
                    results[slot] = Some(joined);
                } else {
                    all_done = false;
                }
            }
        }
        if all_done || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(check_period.min(deadline.saturating_duration_since(Instant::now())));
    }
}

fn probe_worker(
    cpu_id: usize,
    probes_per_worker: u64,
    cache_line_size: usize,
    shared: Arc<Shared>,
) -> Result<Vec<Probe>, WtmError> {
    platform::pin(cpu_id)
        .map_err(|e| WtmError::generic(format!("probe worker on CPU {} couldn't pin: {}", cpu_id, e)))?;

    shared.ready_count.0.fetch_add(1, Ordering::AcqRel);
    while shared.ready_count.0.load(Ordering::Acquire) != shared.total_workers {
        std::hint::spin_loop();
    }

    // Pre-allocated, cache-line-aligned: the hot loop below never allocates
    // and never touches a cache line another worker might write to.
    let mut bufs = crate::buffers::allocate_sample_buffers(2, probes_per_worker as usize, cache_line_size)
        .map_err(|e| WtmError::generic(format!("probe worker on CPU {} couldn't allocate sample buffers: {}", cpu_id, e)))?;
    let (seq_nums, tsc_vals) = bufs.split_at_mut(1);
    let (seq_nums, tsc_vals) = (&mut seq_nums[0], &mut tsc_vals[0]);
    let mut collected = 0usize;

    for _ in 0..probes_per_worker {
        if shared.cancel.load(Ordering::Relaxed) {
            break;
        }
        loop {
            let s = shared.seq_counter.0.load(Ordering::Acquire);
            std::sync::atomic::fence(Ordering::SeqCst);
            let t = read_tsc();
            if shared
                .seq_counter
                .0
                .compare_exchange(s, s + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                tsc_vals.as_mut_slice()[collected] = t;
                seq_nums.as_mut_slice()[collected] = s;
                collected += 1;
                break;
            }
        }
    }

    let probes = tsc_vals.as_slice()[..collected]
        .iter()
        .zip(seq_nums.as_slice()[..collected].iter())
        .map(|(&tsc_val, &seq_num)| Probe { tsc_val, seq_num })
        .collect();

    Ok(probes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_nums_partition_the_full_range() {
        // Run on CPU 0 for every worker: affinity collisions don't matter
        // for checking the sequencing invariant itself.
        let cpu_ids = vec![0, 0, 0];
        let probes = collect(&cpu_ids, 50, 64).expect("collection should succeed");
        let mut all_seq: Vec<u64> = probes.iter().flatten().map(|p| p.seq_num).collect();
        all_seq.sort_unstable();
        let expected: Vec<u64> = (0..(3 * 50)).collect();
        assert_eq!(all_seq, expected);

        for per_cpu in &probes {
            for w in per_cpu.windows(2) {
                assert!(w[1].seq_num > w[0].seq_num);
            }
        }
    }
}
