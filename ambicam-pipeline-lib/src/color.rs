//! Floating-point color vectors and the few operations the pipeline needs.

use rgb::{ComponentMap, RGB, RGB8};

/// A single LED color with unclamped floating-point channels.
pub type Color = RGB<f32>;

/// One color per LED, in perimeter order.
pub type ColorVector = Vec<Color>;

/// Uniform gray with every channel set to `v`.
#[must_use]
pub const fn splat(v: f32) -> Color {
    Color { r: v, g: v, b: v }
}

#[must_use]
pub fn channel_sum(c: Color) -> f32 {
    c.r + c.g + c.b
}

#[must_use]
pub fn max_channel(c: Color) -> f32 {
    c.r.max(c.g).max(c.b)
}

/// Channel-wise product.
#[must_use]
pub fn mul(a: Color, b: Color) -> Color {
    a * b
}

#[must_use]
pub fn scale(c: Color, k: f32) -> Color {
    c * k
}

/// `a + (b - a) * t`, channel-wise.
#[must_use]
pub fn lerp(a: Color, b: Color, t: f32) -> Color {
    a + (b - a) * t
}

/// `alpha * previous + (1 - alpha) * current`, channel-wise.
#[must_use]
pub fn blend(previous: Color, current: Color, alpha: f32) -> Color {
    lerp(current, previous, alpha)
}

/// Convert to wire bytes: clamp to [0, 255] and truncate toward zero.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn quantize(c: Color) -> RGB8 {
    // Clamped to [0.0, 255.0] first, so the casts cannot wrap. NaN maps to 0.
    c.map(|v| v.clamp(0.0, 255.0) as u8)
}

/// Quantize a whole vector for a wire encoder.
#[must_use]
pub fn quantize_all(colors: &[Color]) -> Vec<RGB8> {
    colors.iter().copied().map(quantize).collect()
}

/// Widen 8-bit channels to floats.
#[must_use]
pub fn from_rgb8(c: RGB8) -> Color {
    Color {
        r: f32::from(c.r),
        g: f32::from(c.g),
        b: f32::from(c.b),
    }
}
