//! Single-slot, latest-value handoff between the capture and transmit loops.
//!
//! Publishing overwrites any value the emitter has not picked up yet. The
//! emitter always works on the newest colors; anything published while it
//! was busy and then overwritten is never transmitted.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::color::ColorVector;

/// Seed for the inter-arrival estimate before two publishes have been seen.
pub const DEFAULT_DT: Duration = Duration::from_millis(100);

/// Weight of a new interval measurement in the exponential filter.
const DT_FILTER_GAIN: f64 = 0.1;

/// Exponentially smoothed interval between publishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DtEstimator {
    dt: f64,
}

impl Default for DtEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_DT)
    }
}

impl DtEstimator {
    #[must_use]
    pub fn new(seed: Duration) -> Self {
        Self {
            dt: seed.as_secs_f64(),
        }
    }

    /// `dt = 0.1 * interval + 0.9 * dt`
    pub fn observe(&mut self, interval: Duration) {
        self.dt = DT_FILTER_GAIN * interval.as_secs_f64() + (1.0 - DT_FILTER_GAIN) * self.dt;
    }

    #[must_use]
    pub fn dt(&self) -> Duration {
        Duration::from_secs_f64(self.dt.max(0.0))
    }
}

/// A published vector together with the current inter-arrival estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub colors: ColorVector,
    pub dt: Duration,
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<ColorVector>,
    last_publish: Option<Instant>,
    dt: DtEstimator,
}

#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Mailbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `colors`, replacing any unread value, and wake the emitter.
    pub fn publish(&self, colors: ColorVector) {
        let now = Instant::now();
        let mut slot = self.slot.lock().unwrap();
        if let Some(last) = slot.last_publish.replace(now) {
            slot.dt.observe(now.duration_since(last));
        }
        slot.pending = Some(colors);
        drop(slot);
        self.ready.notify_one();
    }

    /// Remove the pending value, if any.
    pub fn take(&self) -> Option<Delivery> {
        let mut slot = self.slot.lock().unwrap();
        let dt = slot.dt.dt();
        slot.pending.take().map(|colors| Delivery { colors, dt })
    }

    /// Wait up to `timeout` for a value and remove it.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Delivery> {
        let slot = self.slot.lock().unwrap();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| s.pending.is_none())
            .unwrap();
        let dt = slot.dt.dt();
        slot.pending.take().map(|colors| Delivery { colors, dt })
    }

    /// Whether a value is waiting. Used by the emitter to abandon stale work.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.slot.lock().unwrap().pending.is_some()
    }

    /// Current inter-arrival estimate.
    #[must_use]
    pub fn dt(&self) -> Duration {
        self.slot.lock().unwrap().dt.dt()
    }

    /// Drop any pending value and reset timing.
    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Slot::default();
    }
}
