//! Deadline sleeps that keep watching the running flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest single sleep, bounds how late a stop request is noticed
const MAX_NAP: Duration = Duration::from_millis(50);

/// Sleep until `deadline` or until `running` is cleared.
///
/// Returns whether the loop should keep running.
pub(crate) fn sleep_until(deadline: Instant, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(MAX_NAP));
    }
}

/// Interval for a rate in Hz, `None` for non-positive or non-finite rates.
pub(crate) fn period(rate: f32) -> Option<Duration> {
    if rate > 0.0 && rate.is_finite() {
        Some(Duration::from_secs_f64(1.0 / f64::from(rate)))
    } else {
        None
    }
}
