// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Prints TSC reliability verdicts and conversion parameters for this machine.
#[derive(Parser)]
struct Args {
    /// Skip the serial (CPU-Switching) reliability evaluation.
    #[clap(long)]
    skip_serial: bool,
    /// Skip the concurrent (CAS-Ordered Probes) reliability evaluation.
    #[clap(long)]
    skip_concurrent: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if !args.skip_serial {
        match wtm::eval_reliability_serial() {
            Ok(r) => println!(
                "serial:     skew_length={} is_monotonic={}",
                r.skew_length, r.is_monotonic
            ),
            Err(e) => println!("serial:     failed: {}", e),
        }
    }

    if !args.skip_concurrent {
        match wtm::eval_reliability_concurrent() {
            Ok(r) => println!(
                "concurrent: skew_length={} is_monotonic={}",
                r.skew_length, r.is_monotonic
            ),
            Err(e) => println!("concurrent: failed: {}", e),
        }
    }

    match wtm::get_conversion_params() {
        Ok(c) => println!(
            "calibration: ticks_per_sec={} mult={} shift={} secs_before_wrap={}",
            c.params.tsc_ticks_per_sec, c.params.mult, c.params.shift, c.secs_before_wrap
        ),
        Err(e) => println!("calibration: failed: {}", e),
    }
}
