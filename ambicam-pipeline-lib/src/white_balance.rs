//! Automatic white-balance estimation.
//!
//! The camera sees the LEDs' own light spill in the check window. Comparing
//! the colors that were sent with the colors that come back gives a
//! per-channel correction for the camera's color cast. Individual estimates
//! are noisy, so they are collected in a weighted rolling history and the
//! applied correction is the weighted mean of that history.

use std::collections::VecDeque;

use log::{debug, trace};

use crate::color::{self, Color};

/// New estimates whose weight falls below this fraction of the heaviest
/// estimate in the history are ignored.
const MIN_RELATIVE_WEIGHT: f64 = 0.2;

/// Outcome of feeding one set of check samples to the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Estimate added to the history and the correction recomputed
    Accepted { weight: f64 },
    /// Estimate too weak compared to the history
    Rejected { weight: f64 },
    /// No usable estimate (dark or empty samples)
    Degenerate,
}

#[derive(Debug, Clone)]
pub struct WhiteBalance {
    correction: Color,
    history: VecDeque<(Color, f64)>,
    capacity: usize,
}

impl WhiteBalance {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            correction: color::splat(1.0),
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Current multiplicative correction. Its largest channel is exactly 1.
    #[must_use]
    pub fn correction(&self) -> Color {
        self.correction
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Change the history capacity, evicting the oldest entries if needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    /// Forget all estimates and return to the neutral correction.
    pub fn reset(&mut self) {
        self.history.clear();
        self.correction = color::splat(1.0);
    }

    /// Feed pairs of (sent color, seen color) for every check point.
    pub fn observe(&mut self, pairs: impl IntoIterator<Item = (Color, Color)>) -> Observation {
        let mut total_weight = 0.0f64;
        let mut sent_acc = [0.0f64; 3];
        let mut seen_acc = [0.0f64; 3];

        for (sent, seen) in pairs {
            let weight = f64::from(color::channel_sum(sent)) * f64::from(color::channel_sum(seen));
            if weight <= 0.0 || !weight.is_finite() {
                continue;
            }
            total_weight += weight;
            for (acc, v) in sent_acc.iter_mut().zip([sent.r, sent.g, sent.b]) {
                *acc += weight * f64::from(v);
            }
            for (acc, v) in seen_acc.iter_mut().zip([seen.r, seen.g, seen.b]) {
                *acc += weight * f64::from(v);
            }
        }

        if total_weight <= 0.0 {
            trace!("White balance: no usable check samples");
            return Observation::Degenerate;
        }

        // The common 1/total_weight of both averages cancels in the ratio
        if seen_acc.iter().any(|&v| v == 0.0) {
            trace!("White balance: seen average has a zero channel");
            return Observation::Degenerate;
        }
        let mut factor = [0.0f64; 3];
        for ((f, sent), seen) in factor.iter_mut().zip(sent_acc).zip(seen_acc) {
            *f = sent / seen;
        }
        let Some(factor) = normalize(factor) else {
            return Observation::Degenerate;
        };

        let heaviest = self.history.iter().map(|&(_, w)| w).fold(0.0f64, f64::max);
        if !self.history.is_empty() && total_weight / heaviest <= MIN_RELATIVE_WEIGHT {
            debug!(
                "White balance: rejecting estimate with weight {total_weight:.0} (history max {heaviest:.0})"
            );
            return Observation::Rejected {
                weight: total_weight,
            };
        }

        self.history.push_back((factor, total_weight));
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
        self.recompute();
        trace!(
            "White balance: factor {factor:?}, correction {:?}",
            self.correction
        );
        Observation::Accepted {
            weight: total_weight,
        }
    }

    fn recompute(&mut self) {
        let mut acc = [0.0f64; 3];
        let mut total = 0.0f64;
        for &(factor, weight) in &self.history {
            total += weight;
            for (a, v) in acc.iter_mut().zip([factor.r, factor.g, factor.b]) {
                *a += weight * f64::from(v);
            }
        }
        if total <= 0.0 {
            return;
        }
        for a in &mut acc {
            *a /= total;
        }
        if let Some(correction) = normalize(acc) {
            self.correction = correction;
        }
    }
}

/// Scale so the largest channel is exactly 1. `None` if all channels are zero.
#[allow(clippy::cast_possible_truncation)]
fn normalize(v: [f64; 3]) -> Option<Color> {
    let max = v[0].max(v[1]).max(v[2]);
    if !(max > 0.0) || !max.is_finite() {
        return None;
    }
    let mut c = Color {
        r: (v[0] / max) as f32,
        g: (v[1] / max) as f32,
        b: (v[2] / max) as f32,
    };
    // Pin the maximum channel so rounding can't leave it at 0.99999994
    for (ch, raw) in [(&mut c.r, v[0]), (&mut c.g, v[1]), (&mut c.b, v[2])] {
        if raw == max {
            *ch = 1.0;
        }
    }
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb(r: f32, g: f32, b: f32) -> Color {
        Color { r, g, b }
    }

    fn assert_max_is_one(c: Color) {
        assert!(
            (color::max_channel(c) - 1.0).abs() < f32::EPSILON,
            "max channel of {c:?} is not 1"
        );
    }

    #[test]
    fn test_default_is_neutral() {
        let wb = WhiteBalance::new(10);
        assert_eq!(wb.correction(), rgb(1.0, 1.0, 1.0));
        assert_eq!(wb.history_len(), 0);
    }

    #[test]
    fn test_blue_cast_is_corrected() {
        let mut wb = WhiteBalance::new(10);
        // Sent neutral white, camera sees it with a blue cast
        let outcome = wb.observe([(rgb(200.0, 200.0, 200.0), rgb(100.0, 100.0, 200.0))]);
        assert!(matches!(outcome, Observation::Accepted { .. }));

        let c = wb.correction();
        assert_max_is_one(c);
        assert!((c.r - 1.0).abs() < 1e-6);
        assert!((c.g - 1.0).abs() < 1e-6);
        assert!((c.b - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dark_points_discarded() {
        let mut wb = WhiteBalance::new(10);
        let outcome = wb.observe([
            (rgb(0.0, 0.0, 0.0), rgb(50.0, 50.0, 50.0)),
            (rgb(10.0, 10.0, 10.0), rgb(0.0, 0.0, 0.0)),
        ]);
        assert_eq!(outcome, Observation::Degenerate);
        assert_eq!(wb.correction(), rgb(1.0, 1.0, 1.0));
        assert_eq!(wb.history_len(), 0);
    }

    #[test]
    fn test_zero_seen_channel_is_degenerate() {
        let mut wb = WhiteBalance::new(10);
        let outcome = wb.observe([(rgb(100.0, 100.0, 100.0), rgb(100.0, 0.0, 100.0))]);
        assert_eq!(outcome, Observation::Degenerate);
        assert_eq!(wb.history_len(), 0);
    }

    #[test]
    fn test_weak_estimate_rejected() {
        let mut wb = WhiteBalance::new(10);
        wb.observe([(rgb(200.0, 200.0, 200.0), rgb(200.0, 200.0, 100.0))]);
        let before = wb.correction();

        // Weight is 30 * 25 = 750, far below 20% of 600 * 500
        let outcome = wb.observe([(rgb(10.0, 10.0, 10.0), rgb(5.0, 10.0, 10.0))]);
        assert!(matches!(outcome, Observation::Rejected { .. }));
        assert_eq!(wb.correction(), before);
        assert_eq!(wb.history_len(), 1);
    }

    #[test]
    fn test_weighted_mean_renormalized() {
        let mut wb = WhiteBalance::new(10);
        // Equal weights; normalized factors (0.5, 0.25, 1) and (1, 0.5, 0.25)
        // average to (0.75, 0.375, 0.625), which has to be scaled back up
        wb.observe([(rgb(100.0, 100.0, 100.0), rgb(100.0, 200.0, 50.0))]);
        wb.observe([(rgb(100.0, 100.0, 100.0), rgb(50.0, 100.0, 200.0))]);
        assert_eq!(wb.history_len(), 2);
        let c = wb.correction();
        assert_max_is_one(c);
        assert!((c.g - 0.5).abs() < 1e-6);
        assert!((c.b - 0.625 / 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_history_capacity_and_max_invariant() {
        let mut wb = WhiteBalance::new(5);
        for i in 0..40u8 {
            let k = f32::from(i);
            let sent = rgb(50.0 + k, 120.0 - k, 80.0 + 2.0 * k);
            let seen = rgb(60.0 + 3.0 * k, 90.0, 200.0 - 4.0 * k);
            wb.observe([(sent, seen), (seen, sent)]);
            assert!(wb.history_len() <= 5);
            assert_max_is_one(wb.correction());
        }

        wb.set_capacity(2);
        assert_eq!(wb.history_len(), 2);
        wb.reset();
        assert_eq!(wb.correction(), rgb(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_normalize_pins_max() {
        let c = normalize([0.3, 0.7, 0.1]).unwrap();
        assert!((c.g - 1.0).abs() < f32::EPSILON);
        assert!(normalize([0.0, 0.0, 0.0]).is_none());
    }
}
