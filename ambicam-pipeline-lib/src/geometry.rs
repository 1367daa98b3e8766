//! Mapping from the LED layout to camera pixel coordinates.

use std::sync::Arc;

use log::debug;

use crate::config::{Config, LedSegment, Rect};

/// Pixel coordinate in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// Check-window position paired with the LED it observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckPoint {
    /// Global LED index (position in the color vector)
    pub led: usize,
    pub point: Point,
}

/// Sample coordinates for every LED, plus the check subset used for white balance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LedIndexMap {
    points: Vec<Point>,
    checks: Vec<CheckPoint>,
}

impl LedIndexMap {
    /// One coordinate per LED, in LED order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    #[must_use]
    pub fn checks(&self) -> &[CheckPoint] {
        &self.checks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// `n` evenly spaced values from `start` to `end`, both inclusive.
///
/// With `n == 1` the single value is `start`.
fn linspace(start: f64, end: f64, n: usize) -> impl Iterator<Item = f64> {
    #[allow(clippy::cast_precision_loss)] // LED counts are small
    let step = if n > 1 {
        (end - start) / (n - 1) as f64
    } else {
        0.0
    };
    #[allow(clippy::cast_precision_loss)]
    (0..n).map(move |i| start + step * i as f64)
}

/// Truncate a non-negative pixel position.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_pixel(v: f64) -> u32 {
    v.max(0.0) as u32
}

/// Build the LED index map for a window, check window and layout.
///
/// Runs on the top and bottom edges are spread along X between
/// `left + from * (right - left)` and `left + to * (right - left)` at the
/// edge's Y; left and right runs are spread along Y the same way.
#[must_use]
pub fn build_led_index_map(window: &Rect, check_window: &Rect, layout: &[LedSegment]) -> LedIndexMap {
    let total: usize = layout.iter().map(|s| s.count).sum();
    let mut points = Vec::with_capacity(total);
    let mut checks = Vec::new();

    for segment in layout {
        let (lo, hi) = if segment.side.is_horizontal() {
            (f64::from(window.left), f64::from(window.right))
        } else {
            (f64::from(window.top), f64::from(window.bottom))
        };
        let span = hi - lo;
        let start = lo + f64::from(segment.from) * span;
        let end = lo + f64::from(segment.to) * span;
        let edge = window.edge(segment.side);
        let check_edge = check_window.edge(segment.side);

        for along in linspace(start, end, segment.count) {
            let along = to_pixel(along);
            let (point, check_point) = if segment.side.is_horizontal() {
                (
                    Point { x: along, y: edge },
                    Point {
                        x: along,
                        y: check_edge,
                    },
                )
            } else {
                (
                    Point { x: edge, y: along },
                    Point {
                        x: check_edge,
                        y: along,
                    },
                )
            };
            if segment.check {
                checks.push(CheckPoint {
                    led: points.len(),
                    point: check_point,
                });
            }
            points.push(point);
        }
    }

    LedIndexMap { points, checks }
}

/// Lazily built [`LedIndexMap`], rebuilt when the config's geometry generation moves.
#[derive(Debug, Default)]
pub struct GeometryCache {
    cached: Option<(u64, Arc<LedIndexMap>)>,
}

impl GeometryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The map for `config` at `generation`, building it if stale.
    pub fn get(&mut self, config: &Config, generation: u64) -> Arc<LedIndexMap> {
        match &self.cached {
            Some((cached_generation, map)) if *cached_generation == generation => map.clone(),
            _ => {
                let map = Arc::new(build_led_index_map(
                    &config.window,
                    &config.check_window,
                    &config.leds,
                ));
                debug!(
                    "Built LED index map: {} LEDs, {} check points (generation {generation})",
                    map.len(),
                    map.checks().len()
                );
                self.cached = Some((generation, map.clone()));
                map
            }
        }
    }

    /// Drop the cached map.
    pub fn clear(&mut self) {
        self.cached = None;
    }
}
