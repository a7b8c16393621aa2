// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Cheap OS-reported hints about TSC stability.
//!
//! [`Clock::new`](crate::Clock::new) uses these to decide whether it can
//! skip straight to calibration or must first pay for the full
//! CPU-Switching reliability evaluation. Grounded on the teacher's own
//! `is_tsc_stable`/`is_tsc_percpu_stable`
//! (`examples/lun3x-minstant/src/tsc_now.rs`): if the kernel already reports
//! the counter as a usable clocksource, or the CPU advertises the flags that
//! make per-CPU offsets safe to assume, trust that instead of running a
//! multi-second carousel first.

use std::io::BufRead;

/// True if either OS-reported hint indicates the TSC is likely stable
/// across CPUs.
pub(crate) fn quick_stability_hint() -> bool {
    is_tsc_stable() || is_tsc_percpu_stable()
}

fn is_tsc_stable() -> bool {
    std::fs::read_to_string("/sys/devices/system/clocksource/clocksource0/available_clocksource")
        .map(|s| s.contains("tsc"))
        .unwrap_or(false)
}

fn is_tsc_percpu_stable() -> bool {
    let f = || {
        let cpuinfo = std::fs::File::open("/proc/cpuinfo").ok()?;
        let mut cpuinfo = std::io::BufReader::new(cpuinfo);
        let mut buf = String::with_capacity(1024);
        loop {
            if cpuinfo.read_line(&mut buf).ok()? == 0 {
                break;
            }
            if buf.starts_with("flags") {
                break;
            }
            buf.clear();
        }
        Some(buf.contains("constant_tsc") && buf.contains("nonstop_tsc") && buf.contains("rdtscp"))
    };
    f().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sysfs_entries_report_false_instead_of_panicking() {
        // On a machine without these files (containers, CI runners) both
        // hints should simply report false.
        let _ = quick_stability_hint();
    }
}
