//! Camera-less variant: soft colored dots drifting around the LED ring.
//!
//! Each dot starts as a run of one random color about 60 LEDs wide, then every
//! tick bleeds into its neighbours and fades. Dead dots are replaced, and
//! overlapping dots add up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::color::{lerp, max_channel, scale, splat, Color, ColorVector};
use crate::config::ConfigStore;
use crate::mailbox::Mailbox;
use crate::pacing::sleep_until;

const MAX_DOTS: usize = 10;
const DOT_WIDTH: f64 = 60.0;
const BLUR_FACTOR: f32 = 0.8;
const FADE_FACTOR: f32 = 0.995;
/// Dots whose brightest pixel drops below this are removed
const DEAD_BELOW: f32 = 10.0;
const TICK: Duration = Duration::from_millis(30);

/// Sample from N(mean, std_dev) with the Box-Muller transform.
fn gaussian(rng: &mut impl Rng, mean: f64, std_dev: f64) -> f64 {
    // 1 - [0, 1) keeps ln() away from zero
    let u1 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    mean + std_dev * (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Add two colors, scaling the sum down if any channel would exceed 255.
fn add_saturating(a: Color, b: Color) -> Color {
    let sum = Color {
        r: a.r + b.r,
        g: a.g + b.g,
        b: a.b + b.b,
    };
    let max = max_channel(sum);
    if max > 255.0 {
        scale(sum, 255.0 / max)
    } else {
        sum
    }
}

/// One dot on a ring of LEDs. Only pixels the dot has reached are `Some`.
#[derive(Debug, Clone)]
struct Dot {
    pixels: Vec<Option<Color>>,
}

impl Dot {
    fn new(ring: usize, pos: usize, width: usize, color: Color) -> Self {
        let mut pixels = vec![None; ring];
        let half = width / 2;
        for offset in 0..2 * half {
            pixels[(pos + ring - half % ring + offset) % ring] = Some(color);
        }
        let mut dot = Self { pixels };
        dot.blur();
        dot
    }

    fn get(&self, i: usize) -> Color {
        self.pixels[i].unwrap_or_default()
    }

    /// Pull each lit pixel's direct neighbours toward its color.
    fn blur(&mut self) {
        let ring = self.pixels.len();
        let lit: Vec<(usize, Color)> = self
            .pixels
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.map(|c| (i, c)))
            .collect();
        for (pos, color) in lit {
            for neighbour in [(pos + ring - 1) % ring, (pos + 1) % ring] {
                self.pixels[neighbour] = Some(lerp(self.get(neighbour), color, BLUR_FACTOR));
            }
        }
    }

    fn fade(&mut self) {
        for c in self.pixels.iter_mut().flatten() {
            *c = scale(*c, FADE_FACTOR);
        }
    }

    fn is_dead(&self) -> bool {
        self.pixels
            .iter()
            .flatten()
            .map(|&c| max_channel(c))
            .fold(0.0, f32::max)
            < DEAD_BELOW
    }
}

pub struct RainbowGenerator {
    rng: StdRng,
    led_count: usize,
    dots: Vec<Dot>,
}

impl RainbowGenerator {
    #[must_use]
    pub fn new(led_count: usize) -> Self {
        Self::with_rng(led_count, StdRng::from_entropy())
    }

    /// Deterministic generator for reproducible output.
    #[must_use]
    pub fn with_seed(led_count: usize, seed: u64) -> Self {
        Self::with_rng(led_count, StdRng::seed_from_u64(seed))
    }

    fn with_rng(led_count: usize, rng: StdRng) -> Self {
        let mut generator = Self {
            rng,
            led_count: 0,
            dots: Vec::new(),
        };
        generator.reset(led_count);
        generator
    }

    #[must_use]
    pub fn led_count(&self) -> usize {
        self.led_count
    }

    #[must_use]
    pub fn dot_count(&self) -> usize {
        self.dots.len()
    }

    /// Start over on a ring of `led_count` LEDs with a full set of dots.
    pub fn reset(&mut self, led_count: usize) {
        self.led_count = led_count;
        self.dots.clear();
        if led_count == 0 {
            return;
        }
        for _ in 0..MAX_DOTS {
            self.spawn();
        }
    }

    fn spawn(&mut self) {
        let pos = self.rng.gen_range(0..self.led_count);
        let color = Color {
            r: f32::from(self.rng.gen::<u8>()),
            g: f32::from(self.rng.gen::<u8>()),
            b: f32::from(self.rng.gen::<u8>()),
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let width = gaussian(&mut self.rng, DOT_WIDTH, DOT_WIDTH.sqrt()).max(0.0) as usize;
        self.dots.push(Dot::new(self.led_count, pos, width, color));
    }

    /// Advance one step and return the combined ring.
    pub fn tick(&mut self) -> ColorVector {
        if self.led_count == 0 {
            return Vec::new();
        }
        if self.dots.len() < MAX_DOTS {
            self.spawn();
        }
        for dot in &mut self.dots {
            dot.blur();
            dot.fade();
        }
        self.dots.retain(|dot| !dot.is_dead());

        let mut ring = vec![splat(0.0); self.led_count];
        for dot in &self.dots {
            for (i, c) in ring.iter_mut().enumerate() {
                if dot.pixels[i].is_some() {
                    *c = add_saturating(*c, dot.get(i));
                }
            }
        }
        ring
    }

    /// Publish a frame every ~30 ms until `running` is cleared.
    ///
    /// Follows LED count changes from `config`. `first_frame` fires after the
    /// first publish.
    pub fn run(
        &mut self,
        config: &ConfigStore,
        mailbox: &Mailbox,
        running: &AtomicBool,
        mut first_frame: Option<oneshot::Sender<()>>,
    ) {
        info!("Rainbow generator started with {} LEDs", self.led_count);
        while running.load(Ordering::Acquire) {
            let started = Instant::now();
            let led_count = config.read(|c| c.led_count());
            if led_count != self.led_count {
                debug!("LED count changed {} -> {led_count}, respawning dots", self.led_count);
                self.reset(led_count);
            }

            let colors = self.tick();
            if !colors.is_empty() {
                mailbox.publish(colors);
                if let Some(tx) = first_frame.take() {
                    let _ = tx.send(());
                }
            }

            if !sleep_until(started + TICK, running) {
                break;
            }
        }
        mailbox.clear();
        info!("Rainbow generator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_spreads_and_dies() {
        let mut dot = Dot::new(100, 50, 4, splat(200.0));
        // Four lit pixels plus one blurred neighbour on each side
        let lit = dot.pixels.iter().filter(|p| p.is_some()).count();
        assert_eq!(lit, 6);
        assert!((dot.get(47).r - 160.0).abs() < 1e-3);

        dot.blur();
        assert_eq!(dot.pixels.iter().filter(|p| p.is_some()).count(), 8);

        let mut ticks = 0;
        while !dot.is_dead() {
            dot.blur();
            dot.fade();
            ticks += 1;
            assert!(ticks < 2000, "dot never faded out");
        }
        // 200 * 0.995^n < 10 needs n > 597
        assert!(ticks > 590, "died after {ticks} ticks");
    }

    #[test]
    fn test_dot_wraps_around_ring() {
        let dot = Dot::new(10, 0, 4, splat(100.0));
        assert!(dot.pixels[9].is_some());
        assert!(dot.pixels[8].is_some());
        assert!(dot.pixels[1].is_some());
    }

    #[test]
    fn test_add_saturating_rescales() {
        let sum = add_saturating(
            Color {
                r: 200.0,
                g: 100.0,
                b: 0.0,
            },
            Color {
                r: 310.0,
                g: 0.0,
                b: 0.0,
            },
        );
        assert!((sum.r - 255.0).abs() < 1e-3);
        assert!((sum.g - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_ticks_stay_in_range() {
        let mut generator = RainbowGenerator::with_seed(88, 7);
        assert_eq!(generator.dot_count(), MAX_DOTS);
        for _ in 0..300 {
            let ring = generator.tick();
            assert_eq!(ring.len(), 88);
            assert!(ring.iter().all(|c| {
                [c.r, c.g, c.b]
                    .iter()
                    .all(|v| (0.0..=255.0 + 1e-3).contains(v))
            }));
            assert!(generator.dot_count() <= MAX_DOTS);
        }
    }

    #[test]
    fn test_seeded_output_is_reproducible() {
        let mut a = RainbowGenerator::with_seed(30, 42);
        let mut b = RainbowGenerator::with_seed(30, 42);
        for _ in 0..5 {
            assert_eq!(a.tick(), b.tick());
        }
    }

    #[test]
    fn test_empty_ring() {
        let mut generator = RainbowGenerator::with_seed(0, 1);
        assert_eq!(generator.dot_count(), 0);
        assert!(generator.tick().is_empty());
        generator.reset(12);
        assert_eq!(generator.tick().len(), 12);
    }

    #[test]
    fn test_gaussian_mean() {
        let mut rng = StdRng::seed_from_u64(3);
        let n = 5000;
        let mean: f64 = (0..n).map(|_| gaussian(&mut rng, 60.0, 7.7)).sum::<f64>() / f64::from(n);
        assert!((mean - 60.0).abs() < 0.5, "mean {mean}");
    }
}
