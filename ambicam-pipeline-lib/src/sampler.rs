//! Capture loop: frame in, corrected color vector out.
//!
//! Per tick: grab a frame, sample every LED position (through the blur kernel
//! when enabled), update and apply the white-balance correction, apply the
//! channel weights, smooth against the previous output and publish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, trace};
use rgb::ComponentMap;

use crate::color::{self, Color, ColorVector};
use crate::config::{ColorSettings, Config, ConfigStore, CorrectionOrder};
use crate::emitter::LastSent;
use crate::frame::{Blur, Frame};
use crate::geometry::{GeometryCache, LedIndexMap};
use crate::mailbox::Mailbox;
use crate::pacing::{period, sleep_until};
use crate::source::FrameSource;
use crate::white_balance::{Observation, WhiteBalance};

/// Pause after a failed frame read when capture pacing is off
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Channel values are kept in the 8-bit range after each correction stage.
fn clamp_channels(c: Color) -> Color {
    c.map(|v| v.clamp(0.0, 255.0))
}

/// Per-channel gain from the color settings: weights scaled so the largest
/// is 1, times brightness. `None` when all weights are zero.
fn weight_gain(colors: &ColorSettings) -> Option<Color> {
    let max = colors.red.max(colors.green).max(colors.blue);
    if !(max > 0.0) {
        return None;
    }
    Some(color::scale(
        Color {
            r: colors.red,
            g: colors.green,
            b: colors.blue,
        },
        colors.brightness / max,
    ))
}

pub struct Sampler {
    source: Box<dyn FrameSource>,
    config: Arc<ConfigStore>,
    mailbox: Arc<Mailbox>,
    last_sent: Arc<LastSent>,
    geometry: GeometryCache,
    blur: Option<Blur>,
    white_balance: WhiteBalance,
    previous: Option<ColorVector>,
}

impl Sampler {
    pub fn new(
        source: Box<dyn FrameSource>,
        config: Arc<ConfigStore>,
        mailbox: Arc<Mailbox>,
        last_sent: Arc<LastSent>,
    ) -> Self {
        let capacity = config.read(|c| c.colors.queue_size);
        Self {
            source,
            config,
            mailbox,
            last_sent,
            geometry: GeometryCache::new(),
            blur: None,
            white_balance: WhiteBalance::new(capacity),
            previous: None,
        }
    }

    #[must_use]
    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Open the frame source.
    pub fn connect(&mut self) -> bool {
        info!("Connecting {} frame source", self.source.name());
        self.source.connect()
    }

    /// Current white-balance correction.
    #[must_use]
    pub fn correction(&self) -> Color {
        self.white_balance.correction()
    }

    /// Capture and process one frame. `None` if the source had no frame.
    pub fn tick(&mut self) -> Option<ColorVector> {
        // Generation first: a concurrent geometry change then costs one rebuild
        let generation = self.config.geometry_generation();
        let config = self.config.snapshot();
        let map = self.geometry.get(&config, generation);

        let Some(frame) = self.source.get_frame() else {
            debug!("No frame from {}, skipping tick", self.source.name());
            return None;
        };
        Some(self.process(&frame, &config, &map))
    }

    /// Turn a frame into a color vector for `map`.
    pub fn process(&mut self, frame: &Frame, config: &Config, map: &LedIndexMap) -> ColorVector {
        let kernel = (config.blur > 0).then_some(config.blur | 1);
        if self.blur.as_ref().map(Blur::size) != kernel {
            self.blur = Blur::new(config.blur);
        }
        let blur = self.blur.as_ref();
        let mut colors = frame.sample_all(map.points(), blur);

        let has_checks = !map.checks().is_empty();
        if has_checks {
            self.update_white_balance(frame, config, map);
        } else if self.white_balance.history_len() > 0 {
            debug!("No check LEDs in layout, dropping white-balance estimate");
            self.white_balance.reset();
        }
        let wb = (config.auto_wb && has_checks).then(|| self.white_balance.correction());
        let gain = weight_gain(&config.colors);

        let stages: [Option<Color>; 2] = match config.correction_order {
            CorrectionOrder::WbFirst => [wb, gain],
            CorrectionOrder::WeightsFirst => [gain, wb],
        };
        for factor in stages.into_iter().flatten() {
            for c in &mut colors {
                *c = clamp_channels(color::mul(*c, factor));
            }
        }

        let alpha = config.smoothing;
        if alpha > 0.0 {
            if let Some(previous) = self.previous.as_ref().filter(|p| p.len() == colors.len()) {
                for (c, &p) in colors.iter_mut().zip(previous) {
                    *c = color::blend(p, *c, alpha);
                }
            }
        }

        self.previous = Some(colors.clone());
        colors
    }

    fn update_white_balance(&mut self, frame: &Frame, config: &Config, map: &LedIndexMap) {
        self.white_balance.set_capacity(config.colors.queue_size);
        let blur = self.blur.as_ref();
        let observation = self.last_sent.read(|sent| {
            let sent = sent.filter(|s| s.len() == map.len())?;
            let pairs = map
                .checks()
                .iter()
                .map(|check| (sent[check.led], frame.sample(check.point, blur)));
            Some(self.white_balance.observe(pairs))
        });
        match observation {
            Some(Observation::Accepted { weight }) => trace!(
                "White balance updated (weight {weight:.0}): {:?}",
                self.white_balance.correction()
            ),
            Some(_) => {}
            None => trace!("White balance skipped, no matching sent vector"),
        }
    }

    /// Capture and publish until `running` is cleared.
    ///
    /// `first_frame` fires after the first successful publish.
    pub fn run(&mut self, running: &AtomicBool, mut first_frame: Option<oneshot::Sender<()>>) {
        info!("Sampler started on {} source", self.source.name());
        let mut ticks: u64 = 0;
        let mut skipped: u64 = 0;

        while running.load(Ordering::Acquire) {
            let started = Instant::now();
            let pace = period(self.config.read(|c| c.fps.capture));

            if let Some(colors) = self.tick() {
                ticks += 1;
                self.mailbox.publish(colors);
                if let Some(tx) = first_frame.take() {
                    // Receiver may already have given up waiting
                    let _ = tx.send(());
                }
            } else {
                skipped += 1;
                if pace.is_none() && !sleep_until(started + RETRY_DELAY, running) {
                    break;
                }
            }

            if let Some(pace) = pace {
                if !sleep_until(started + pace, running) {
                    break;
                }
            }
        }
        info!("Sampler stopping after {ticks} frames ({skipped} skipped)");
        self.teardown();
    }

    /// Release the source and forget all per-run state.
    pub fn teardown(&mut self) {
        self.source.disconnect();
        self.geometry.clear();
        self.previous = None;
        self.white_balance.reset();
        self.mailbox.clear();
    }
}
