// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Platform probe and affinity controller.
//!
//! Every top-level operation starts by taking a [`ProcessState`] snapshot
//! and ends by [`restore`]ing it, regardless of how it exits. The snapshot
//! is the only thing the core holds onto across a call that isn't freed as
//! soon as it's produced.

use libc::{cpu_set_t, sched_getcpu, sched_setaffinity, CPU_ISSET, CPU_SET, CPU_ZERO};
use std::mem::{size_of, zeroed};

use crate::error::WtmError;

/// Hardware/OS/process state captured at the start of a top-level operation.
pub struct ProcessState {
    /// Number of configured logical CPUs (some may be offline).
    pub num_cpus: usize,
    /// CPU the calling thread was executing on when the snapshot was taken.
    pub initial_cpu: usize,
    /// CPU set the calling thread was confined to when the snapshot was taken.
    pub initial_cpu_set: cpu_set_t,
    /// L1 data cache line size, in bytes.
    pub cache_line_size: usize,
}

/// Captures [`ProcessState`]. Fails with a generic error if any of the
/// underlying OS lookups fail.
pub fn snapshot() -> Result<ProcessState, WtmError> {
    let num_cpus = num_configured_cpus()?;

    let initial_cpu = unsafe { sched_getcpu() };
    if initial_cpu < 0 {
        return Err(WtmError::generic(format!(
            "couldn't get ID of the current CPU: {}",
            std::io::Error::last_os_error()
        )));
    }

    let mut initial_cpu_set: cpu_set_t = unsafe { zeroed() };
    if unsafe {
        libc::sched_getaffinity(
            0,
            size_of::<cpu_set_t>(),
            &mut initial_cpu_set as *mut _,
        )
    } != 0
    {
        return Err(WtmError::generic(format!(
            "couldn't get CPU affinity of the current thread: {}",
            std::io::Error::last_os_error()
        )));
    }

    let cache_line_size = cache_line_size()?;

    Ok(ProcessState {
        num_cpus,
        initial_cpu: initial_cpu as usize,
        initial_cpu_set,
        cache_line_size,
    })
}

/// Confines the calling thread to exactly one CPU.
pub fn pin(cpu_id: usize) -> Result<(), WtmError> {
    let mut set: cpu_set_t = unsafe { zeroed() };
    unsafe {
        CPU_ZERO(&mut set);
        CPU_SET(cpu_id, &mut set);
    }
    if unsafe { sched_setaffinity(0, size_of::<cpu_set_t>(), &set as *const _) } != 0 {
        return Err(WtmError::generic(format!(
            "couldn't pin the current thread to CPU {}: {}",
            cpu_id,
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// Reverts affinity to what [`ProcessState`] recorded.
///
/// This happens in two steps: first pin to the saved initial CPU, then
/// widen to the saved permitted set. The second step alone would not
/// reliably put the thread back on the initial CPU — the permitted set
/// generally contains more than one CPU, and nothing stops the scheduler
/// from picking a different member of it the moment affinity widens. Doing
/// the narrow pin first makes it likely (not guaranteed) that the thread
/// stays on the initial CPU once the set widens, which matters because the
/// caller's data may still be warm in that CPU's cache.
pub fn restore(state: &ProcessState) -> Result<(), WtmError> {
    pin(state.initial_cpu).map_err(|e| {
        WtmError::generic(format!("couldn't return to the initial CPU: {}", e))
    })?;

    if unsafe {
        sched_setaffinity(
            0,
            size_of::<cpu_set_t>(),
            &state.initial_cpu_set as *const _,
        )
    } != 0
    {
        return Err(WtmError::generic(format!(
            "couldn't restore CPU affinity of the current thread: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

/// CPU indices set in `cpu_set`, in ascending order.
pub fn cpus_in_set(cpu_set: &cpu_set_t, num_cpus: usize) -> Vec<usize> {
    (0..num_cpus)
        .filter(|&cpu_id| unsafe { CPU_ISSET(cpu_id, cpu_set) })
        .collect()
}

fn num_configured_cpus() -> Result<usize, WtmError> {
    let n = unsafe { libc::get_nprocs_conf() };
    if n <= 0 {
        return Err(WtmError::generic("couldn't determine configured CPU count"));
    }
    Ok(n as usize)
}

fn cache_line_size() -> Result<usize, WtmError> {
    let n = unsafe { libc::sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE) };
    if n <= 0 {
        return Err(WtmError::generic("sysconf() couldn't report cache line size"));
    }
    Ok(n as usize)
}
