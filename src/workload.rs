//! A dummy CPU-bound payload used by the simulation driver and integration
//! tests.
//!
//! `original_source/src/load_balancer.c`'s simulated tasks carry a
//! `workload` field spent in `usleep`, which occupies a thread but never
//! moves `/proc/stat`'s counters. Since the whole point of this system is
//! to react to actual CPU utilization, the simulation driver instead spins
//! on trivial arithmetic for the requested duration.

use std::time::{Duration, Instant};

/// Returns a closure that busy-loops for approximately `duration` before
/// returning, implementing `task::Runnable` via the blanket closure impl.
pub fn cpu_burn(duration: Duration) -> impl FnOnce() + Send + 'static {
    move || {
        let deadline = Instant::now() + duration;
        let mut accumulator: u64 = 0;
        while Instant::now() < deadline {
            accumulator = accumulator.wrapping_add(1);
        }
        std::hint::black_box(accumulator);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cpu_burn_runs_for_roughly_the_requested_duration() {
        let started = Instant::now();
        cpu_burn(Duration::from_millis(20))();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
