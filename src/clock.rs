// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

//! A small ergonomic wrapper over calibration, in the spirit of the
//! `Instant`/`Anchor` pair this crate's ancestor exposed.

use tracing::debug;

use crate::conversion::ConversionParams;
use crate::error::WtmError;
use crate::fastcheck;
use crate::reliability;
use crate::tsc::read_tsc;

/// A calibrated TSC-to-nanoseconds converter.
///
/// Building one runs the full calibration operation once; after that,
/// every method is pure arithmetic over a raw TSC reading.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    params: ConversionParams,
}

impl Clock {
    /// Runs calibration and returns a [`Clock`] ready to convert ticks.
    ///
    /// First checks the cheap OS-reported hints
    /// ([`fastcheck::quick_stability_hint`]); if neither suggests the TSC is
    /// stable, the full serial reliability evaluation runs first as an
    /// authoritative check, and a non-monotonic verdict fails the whole
    /// call rather than quietly building a [`Clock`] over an unreliable
    /// counter.
    pub fn new() -> Result<Clock, WtmError> {
        if fastcheck::quick_stability_hint() {
            debug!("OS-reported hint suggests the TSC is stable; skipping the carousel check");
        } else {
            debug!("no OS-reported stability hint; running the serial reliability evaluation first");
            let result = reliability::eval_reliability_serial()?;
            if !result.is_monotonic {
                return Err(WtmError::inconsistency(
                    "TSC was not monotonic across permitted CPUs during the pre-calibration check",
                ));
            }
        }

        let calibration = reliability::get_conversion_params()?;
        Ok(Clock {
            params: calibration.params,
        })
    }

    /// A raw TSC reading, suitable for passing to [`Clock::ticks_to_nanos`]
    /// or [`Clock::elapsed_nanos`] later.
    #[inline]
    pub fn raw_tsc(&self) -> u64 {
        read_tsc()
    }

    /// Converts a tick delta into nanoseconds.
    #[inline]
    pub fn ticks_to_nanos(&self, delta: u64) -> u64 {
        self.params.ticks_to_nanos(delta)
    }

    /// Nanoseconds elapsed since a TSC reading taken earlier on the same
    /// CPU. `earlier_tsc` must be a value this `Clock` (or one built from
    /// the same calibration) previously returned from [`Clock::raw_tsc`].
    #[inline]
    pub fn elapsed_nanos(&self, earlier_tsc: u64) -> u64 {
        let now = self.raw_tsc();
        self.ticks_to_nanos(now.saturating_sub(earlier_tsc))
    }

    /// The conversion parameters this clock was calibrated with.
    pub fn params(&self) -> ConversionParams {
        self.params
    }
}
