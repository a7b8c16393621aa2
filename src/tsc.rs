// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! The TSC read primitive.
//!
//! Reading the counter itself is a single hardware instruction; the only
//! subtlety is ordering it against surrounding code. `rdtscp` (used by
//! [`tsc_with_cpuid`]) is itself serializing with respect to prior
//! instructions, which is what the concurrent probe worker relies on to
//! order the read after the preceding atomic load of the sequence counter.

#[cfg(target_arch = "x86")]
use core::arch::x86::{__rdtscp, _rdtsc};
#[cfg(target_arch = "x86_64")]
use core::arch::x86_64::{__rdtscp, _rdtsc};
use std::mem::MaybeUninit;

/// Reads the TSC. Non-blocking, side-effect-free.
#[inline]
pub fn read_tsc() -> u64 {
    unsafe { _rdtsc() }
}

/// Reads the TSC together with the CPU index encoded in `IA32_TSC_AUX`.
///
/// `rdtscp` waits for all prior instructions to complete before reading,
/// which is what gives the reliability evaluators a full barrier between a
/// preceding atomic load and this read without a separate fence instruction.
#[inline]
pub fn read_tsc_with_cpuid() -> (u64, usize) {
    let mut aux = MaybeUninit::<u32>::uninit();
    let tsc = unsafe { __rdtscp(aux.as_mut_ptr()) };
    let aux = unsafe { aux.assume_init() };
    // Linux encodes IA32_TSC_AUX as [ node id : 31..12 ][ cpu id : 11..0 ].
    (tsc, (aux & 0xfff) as usize)
}
