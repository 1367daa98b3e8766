//! Transmit loop: takes the newest color vector from the mailbox and writes it
//! to the transport, optionally interpolating from the previously sent vector.
//!
//! With `fps.interpolation = n > 0` every delivery is spread over `n + 1`
//! sends, `n` intermediate vectors and then the target itself, evenly paced
//! across the estimated interval between deliveries. A newer delivery
//! preempts the remaining sends; interpolation then restarts from whatever
//! was last written so the output never jumps backwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::color::{lerp, splat, Color, ColorVector};
use crate::config::ConfigStore;
use crate::mailbox::{Delivery, Mailbox};
use crate::pacing::sleep_until;
use crate::transport::Transport;

/// How long the loop blocks on the mailbox before re-checking the running flag
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// The last color vector actually written to the transport.
///
/// Shared with the sampler, which compares it against the check window for
/// white balance.
#[derive(Debug, Default)]
pub struct LastSent {
    slot: Mutex<Option<ColorVector>>,
}

impl LastSent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the last sent vector without copying it.
    pub fn read<R>(&self, f: impl FnOnce(Option<&[Color]>) -> R) -> R {
        f(self.slot.lock().unwrap().as_deref())
    }

    #[must_use]
    pub fn get(&self) -> Option<ColorVector> {
        self.slot.lock().unwrap().clone()
    }

    pub fn store(&self, colors: &[Color]) {
        let mut slot = self.slot.lock().unwrap();
        let existing = slot.get_or_insert_with(Vec::new);
        existing.clear();
        existing.extend_from_slice(colors);
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap() = None;
    }
}

/// How a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Preempted,
    Stopped,
}

pub struct Emitter {
    transport: Box<dyn Transport>,
    config: Arc<ConfigStore>,
    mailbox: Arc<Mailbox>,
    last_sent: Arc<LastSent>,
    /// Last vector written by this emitter
    current: Option<ColorVector>,
}

impl Emitter {
    /// `transport` must already be connected.
    pub fn new(
        transport: Box<dyn Transport>,
        config: Arc<ConfigStore>,
        mailbox: Arc<Mailbox>,
        last_sent: Arc<LastSent>,
    ) -> Self {
        Self {
            transport,
            config,
            mailbox,
            last_sent,
            current: None,
        }
    }

    /// Transmit deliveries until `running` is cleared, then shut down.
    pub fn run(&mut self, running: &AtomicBool) {
        info!("Emitter started on {} transport", self.transport.name());
        while running.load(Ordering::Acquire) {
            if let Some(delivery) = self.mailbox.wait_timeout(IDLE_WAIT) {
                self.deliver(delivery, running);
            }
        }
        self.shutdown();
    }

    /// Transmit one delivery and any that preempt it.
    pub fn deliver(&mut self, mut delivery: Delivery, running: &AtomicBool) {
        loop {
            match self.transmit(&delivery, running) {
                Outcome::Done | Outcome::Stopped => return,
                Outcome::Preempted => match self.mailbox.take() {
                    Some(next) => {
                        trace!("Delivery preempted, restarting toward newer target");
                        delivery = next;
                    }
                    None => return,
                },
            }
        }
    }

    fn transmit(&mut self, delivery: &Delivery, running: &AtomicBool) -> Outcome {
        let target = &delivery.colors;
        let steps = self.config.read(|c| c.fps.interpolation);

        let start = self
            .current
            .as_ref()
            .filter(|current| steps > 0 && current.len() == target.len())
            .cloned();
        let Some(start) = start else {
            if !running.load(Ordering::Acquire) {
                return Outcome::Stopped;
            }
            if self.mailbox.has_pending() {
                return Outcome::Preempted;
            }
            self.send(target);
            return Outcome::Done;
        };

        let sends = steps + 1;
        let slot = delivery.dt / sends;
        let t0 = Instant::now();
        let mut frame: ColorVector = Vec::with_capacity(target.len());

        for k in 1..=sends {
            if !running.load(Ordering::Acquire) {
                return Outcome::Stopped;
            }
            if self.mailbox.has_pending() {
                return Outcome::Preempted;
            }

            if k == sends {
                self.send(target);
                break;
            }

            #[allow(clippy::cast_precision_loss)]
            let t = k as f32 / sends as f32;
            frame.clear();
            frame.extend(start.iter().zip(target).map(|(&a, &b)| lerp(a, b, t)));
            self.send(&frame);

            let deadline = t0 + slot * k;
            let now = Instant::now();
            if now > deadline {
                warn!(
                    "Emitter behind schedule by {:?} at step {k}/{sends} (slot {slot:?})",
                    now - deadline
                );
            }
            if !sleep_until(deadline, running) {
                return Outcome::Stopped;
            }
        }
        Outcome::Done
    }

    /// Write one vector. Failures are logged and the vector is dropped.
    fn send(&mut self, colors: &[Color]) {
        match self.transport.send(colors) {
            Ok(_) => {
                let current = self.current.get_or_insert_with(Vec::new);
                current.clear();
                current.extend_from_slice(colors);
                self.last_sent.store(colors);
            }
            Err(e) => warn!("{} send failed: {e}", self.transport.name()),
        }
    }

    /// Blank the LEDs and disconnect.
    ///
    /// LEDs this emitter never wrote to are left alone.
    pub fn shutdown(&mut self) {
        if let Some(len) = self.current.as_ref().map(Vec::len).filter(|&n| n > 0) {
            debug!("Blanking {len} LEDs");
            self.send(&vec![splat(0.0); len]);
        }
        self.transport.disconnect();
        self.current = None;
        self.last_sent.clear();
        info!("Emitter stopped");
    }
}
