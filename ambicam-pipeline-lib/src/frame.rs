//! Captured frames and point sampling with optional Gaussian blur.

use crate::color::{Color, ColorVector};
use crate::geometry::Point;

/// A decoded camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<Color>,
}

impl Frame {
    /// Wrap row-major pixels. Returns `None` if the buffer size doesn't match
    /// or the frame is empty.
    #[must_use]
    pub fn new(width: usize, height: usize, pixels: Vec<Color>) -> Option<Self> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// A frame of a single color.
    #[must_use]
    pub fn filled(width: usize, height: usize, color: Color) -> Option<Self> {
        Self::new(width, height, vec![color; width * height])
    }

    /// Decode packed 8-bit B,G,R pixels, the usual camera buffer layout.
    #[must_use]
    pub fn from_bgr_bytes(width: usize, height: usize, data: &[u8]) -> Option<Self> {
        if data.len() != width * height * 3 {
            return None;
        }
        let pixels = data
            .chunks_exact(3)
            .map(|p| Color {
                r: f32::from(p[2]),
                g: f32::from(p[1]),
                b: f32::from(p[0]),
            })
            .collect();
        Self::new(width, height, pixels)
    }

    /// Decode packed 8-bit R,G,B pixels.
    #[must_use]
    pub fn from_rgb_bytes(width: usize, height: usize, data: &[u8]) -> Option<Self> {
        if data.len() != width * height * 3 {
            return None;
        }
        let pixels = data
            .chunks_exact(3)
            .map(|p| Color {
                r: f32::from(p[0]),
                g: f32::from(p[1]),
                b: f32::from(p[2]),
            })
            .collect();
        Self::new(width, height, pixels)
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel at `(x, y)`, clamped to the frame.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> Color {
        let x = x.min(self.width - 1);
        let y = y.min(self.height - 1);
        self.pixels[y * self.width + x]
    }

    /// Sample one point, through `blur` if given.
    #[must_use]
    pub fn sample(&self, point: Point, blur: Option<&Blur>) -> Color {
        let x = (point.x as usize).min(self.width - 1);
        let y = (point.y as usize).min(self.height - 1);
        match blur {
            Some(blur) => blur.sample(self, x, y),
            None => self.pixel(x, y),
        }
    }

    /// Sample every point, preserving order.
    #[must_use]
    pub fn sample_all(&self, points: &[Point], blur: Option<&Blur>) -> ColorVector {
        points.iter().map(|&p| self.sample(p, blur)).collect()
    }
}

/// Mirror an out-of-range index back into `0..n` without repeating the edge
/// pixel (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    #[allow(clippy::cast_possible_wrap)]
    let period = 2 * (n as isize - 1);
    let i = i.rem_euclid(period);
    #[allow(clippy::cast_sign_loss)]
    let i = i as usize;
    if i >= n {
        2 * (n - 1) - i
    } else {
        i
    }
}

/// Separable Gaussian kernel evaluated at individual sample points.
///
/// Only the sampled pixels are ever read by the pipeline, so the kernel is
/// applied around each sample instead of over the whole frame. The result is
/// the same as blurring the frame first.
#[derive(Debug, Clone, PartialEq)]
pub struct Blur {
    size: u32,
    weights: Vec<f32>,
}

impl Blur {
    /// Build a kernel of `size` pixels. `0` disables blurring; even sizes
    /// are rounded up to the next odd size.
    #[must_use]
    pub fn new(size: u32) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let size = size | 1;
        // Same sigma rule as OpenCV's GaussianBlur with sigma = 0
        let sigma = 0.3 * ((f64::from(size) - 1.0) * 0.5 - 1.0) + 0.8;
        let radius = f64::from(size / 2);
        let raw: Vec<f64> = (0..size)
            .map(|i| {
                let d = f64::from(i) - radius;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let total: f64 = raw.iter().sum();
        #[allow(clippy::cast_possible_truncation)]
        let weights = raw.iter().map(|w| (w / total) as f32).collect();
        Some(Self { size, weights })
    }

    /// Kernel size after rounding to odd.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    fn sample(&self, frame: &Frame, x: usize, y: usize) -> Color {
        #[allow(clippy::cast_possible_wrap)]
        let radius = (self.size / 2) as isize;
        #[allow(clippy::cast_possible_wrap)]
        let (cx, cy) = (x as isize, y as isize);
        let mut acc = Color::default();
        for (dy, wy) in self.weights.iter().enumerate() {
            #[allow(clippy::cast_possible_wrap)]
            let sy = reflect_101(cy + dy as isize - radius, frame.height);
            for (dx, wx) in self.weights.iter().enumerate() {
                #[allow(clippy::cast_possible_wrap)]
                let sx = reflect_101(cx + dx as isize - radius, frame.width);
                let p = frame.pixels[sy * frame.width + sx];
                let w = wy * wx;
                acc.r += p.r * w;
                acc.g += p.g * w;
                acc.b += p.b * w;
            }
        }
        acc
    }
}
