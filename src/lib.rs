// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! Evaluates whether a machine's hardware time-stamp counter (TSC) can be
//! trusted as a cross-CPU time source, and calibrates it to nanoseconds.
//!
//! Two independent methods establish reliability: serially migrating one
//! thread across every permitted CPU ([`eval_reliability_serial`]), and
//! running one CAS-ordered worker per CPU concurrently
//! ([`eval_reliability_concurrent`]). Both report a bound on inter-CPU skew
//! and a monotonicity verdict. [`get_conversion_params`] measures ticks per
//! second and builds multiply-shift parameters so tick deltas can be turned
//! into nanoseconds without a division on the hot path; [`Clock`] wraps
//! that into a small convenience type.
//!
//! This crate does not register itself as a system-wide clock source, does
//! not persist calibration across processes, and does not claim the
//! counter is reliable on any given machine — only that it can tell you,
//! with bounds.

#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod buffers;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod calibrate;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod carousel;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod clock;
pub mod config;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod fastcheck;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod conversion;
mod error;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod platform;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod probe_analysis;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod probes;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod reliability;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
mod tsc;

#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub use clock::Clock;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub use conversion::ConversionParams;
pub use error::WtmError;
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub use reliability::{
    eval_reliability_concurrent, eval_reliability_serial, get_conversion_params,
    CalibrationResult, ReliabilityResult,
};
#[cfg(all(
    not(target_os = "wasi"),
    any(target_arch = "x86", target_arch = "x86_64")
))]
pub use tsc::{read_tsc, read_tsc_with_cpuid};
