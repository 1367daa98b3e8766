//! Frame sources feeding the sampler.
//!
//! Camera drivers live outside this crate and plug in through [`FrameSource`].
//! Two sources are built in: an animated test pattern and a PPM file that an
//! external grabber keeps overwriting.

use std::path::PathBuf;

use log::{debug, info, warn};
use smart_leds::hsv::{hsv2rgb, Hsv};

use crate::color::{from_rgb8, Color};
use crate::config::{Config, Resolution, SourceConfig};
use crate::frame::Frame;

pub trait FrameSource: Send {
    fn name(&self) -> &'static str;

    /// Open the device. Returns `false` if it can't be used.
    fn connect(&mut self) -> bool;

    fn disconnect(&mut self);

    /// Next frame, or `None` on a transient failure.
    fn get_frame(&mut self) -> Option<Frame>;
}

/// Hue gradient that drifts by a few degrees every frame.
pub struct TestPattern {
    width: usize,
    height: usize,
    phase: u8,
    palette: Vec<Color>,
}

/// Hue advance per frame, in 1/256 turns
const TEST_PATTERN_HUE_STEP: u8 = 2;

impl TestPattern {
    #[must_use]
    pub fn new(resolution: Resolution) -> Self {
        let palette = (0..=u8::MAX)
            .map(|hue| {
                from_rgb8(hsv2rgb(Hsv {
                    hue,
                    sat: 255,
                    val: 255,
                }))
            })
            .collect();
        Self {
            width: resolution.width as usize,
            height: resolution.height as usize,
            phase: 0,
            palette,
        }
    }
}

impl FrameSource for TestPattern {
    fn name(&self) -> &'static str {
        "test_pattern"
    }

    fn connect(&mut self) -> bool {
        if self.width == 0 || self.height == 0 {
            warn!("Test pattern resolution {}x{} is empty", self.width, self.height);
            return false;
        }
        info!("Test pattern source at {}x{}", self.width, self.height);
        self.phase = 0;
        true
    }

    fn disconnect(&mut self) {
        debug!("Test pattern source stopped");
    }

    fn get_frame(&mut self) -> Option<Frame> {
        let span = self.width + self.height;
        let mut pixels = Vec::with_capacity(self.width * self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                // Diagonal gradient so every edge shows the full hue range
                #[allow(clippy::cast_possible_truncation)]
                let hue = ((x + y) * 256 / span) as u8;
                pixels.push(self.palette[usize::from(hue.wrapping_add(self.phase))]);
            }
        }
        self.phase = self.phase.wrapping_add(TEST_PATTERN_HUE_STEP);
        Frame::new(self.width, self.height, pixels)
    }
}

/// Errors from decoding a binary PPM image.
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum PpmError {
    #[display("I/O error: {_0}")]
    Io(std::io::Error),
    #[display("malformed PPM: {_0}")]
    #[from(ignore)]
    Format(#[error(not(source))] &'static str),
}

/// Next header token, skipping whitespace and `#` comments.
fn next_token<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a [u8]> {
    loop {
        while data.get(*pos)?.is_ascii_whitespace() {
            *pos += 1;
        }
        if data[*pos] == b'#' {
            while *data.get(*pos)? != b'\n' {
                *pos += 1;
            }
        } else {
            break;
        }
    }
    let start = *pos;
    while data.get(*pos).is_some_and(|b| !b.is_ascii_whitespace()) {
        *pos += 1;
    }
    Some(&data[start..*pos])
}

fn header_number(data: &[u8], pos: &mut usize, what: &'static str) -> Result<usize, PpmError> {
    let token = next_token(data, pos).ok_or(PpmError::Format(what))?;
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(PpmError::Format(what))
}

/// Decode a binary (P6) PPM with 8-bit samples.
pub fn parse_ppm(data: &[u8]) -> Result<Frame, PpmError> {
    let mut pos = 0;
    if next_token(data, &mut pos) != Some(b"P6".as_slice()) {
        return Err(PpmError::Format("not a P6 image"));
    }
    let width = header_number(data, &mut pos, "bad width")?;
    let height = header_number(data, &mut pos, "bad height")?;
    let maxval = header_number(data, &mut pos, "bad maxval")?;
    if maxval == 0 || maxval > 255 {
        return Err(PpmError::Format("only 8-bit samples are supported"));
    }
    // Exactly one whitespace byte separates the header from the raster
    pos += 1;
    let len = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(3))
        .ok_or(PpmError::Format("dimensions overflow"))?;
    let raster = pos
        .checked_add(len)
        .and_then(|end| data.get(pos..end))
        .ok_or(PpmError::Format("truncated raster"))?;

    let frame = if maxval == 255 {
        Frame::from_rgb_bytes(width, height, raster)
    } else {
        #[allow(clippy::cast_possible_truncation)]
        let scaled: Vec<u8> = raster
            .iter()
            .map(|&v| (usize::from(v).min(maxval) * 255 / maxval) as u8)
            .collect();
        Frame::from_rgb_bytes(width, height, &scaled)
    };
    frame.ok_or(PpmError::Format("empty image"))
}

/// Reads a PPM file on every capture tick.
pub struct PpmSource {
    path: PathBuf,
    failures: u32,
}

impl PpmSource {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            failures: 0,
        }
    }

    fn read(&self) -> Result<Frame, PpmError> {
        let data = std::fs::read(&self.path)?;
        parse_ppm(&data)
    }
}

impl FrameSource for PpmSource {
    fn name(&self) -> &'static str {
        "ppm"
    }

    fn connect(&mut self) -> bool {
        self.failures = 0;
        match std::fs::metadata(&self.path) {
            Ok(_) => {
                info!("Reading frames from {}", self.path.display());
                true
            }
            Err(e) => {
                warn!("Cannot open {}: {e}", self.path.display());
                false
            }
        }
    }

    fn disconnect(&mut self) {
        debug!("PPM source stopped after {} failed reads", self.failures);
    }

    fn get_frame(&mut self) -> Option<Frame> {
        match self.read() {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.failures += 1;
                debug!("Reading {} failed: {e}", self.path.display());
                None
            }
        }
    }
}

/// Build the frame source selected by the `source` config section.
#[must_use]
pub fn source_from_config(config: &Config) -> Box<dyn FrameSource> {
    match &config.source {
        SourceConfig::TestPattern => Box::new(TestPattern::new(config.resolution)),
        SourceConfig::Ppm { path } => Box::new(PpmSource::new(path.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::splat;

    fn ppm(width: usize, height: usize, maxval: u8, pixel: [u8; 3]) -> Vec<u8> {
        let mut data = format!("P6\n# grabbed\n{width} {height}\n{maxval}\n").into_bytes();
        for _ in 0..width * height {
            data.extend_from_slice(&pixel);
        }
        data
    }

    #[test]
    fn test_parse_ppm() {
        let frame = parse_ppm(&ppm(3, 2, 255, [10, 20, 30])).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(
            frame.pixel(2, 1),
            Color {
                r: 10.0,
                g: 20.0,
                b: 30.0
            }
        );
    }

    #[test]
    fn test_parse_ppm_scales_maxval() {
        let frame = parse_ppm(&ppm(1, 1, 15, [15, 0, 5])).unwrap();
        assert_eq!(
            frame.pixel(0, 0),
            Color {
                r: 255.0,
                g: 0.0,
                b: 85.0
            }
        );
    }

    #[test]
    fn test_parse_ppm_rejects_bad_input() {
        assert!(matches!(parse_ppm(b"P3\n1 1\n255\n"), Err(PpmError::Format(_))));
        let mut truncated = ppm(4, 4, 255, [1, 2, 3]);
        truncated.truncate(truncated.len() - 1);
        assert!(matches!(parse_ppm(&truncated), Err(PpmError::Format(_))));
        assert!(parse_ppm(b"P6\n1 1\n65535\n").is_err());
        assert!(parse_ppm(b"").is_err());
    }

    #[test]
    fn test_parse_ppm_huge_dimensions() {
        // width * height * 3 == usize::MAX, so the raster end overflows
        assert!(matches!(
            parse_ppm(b"P6\n6148914691236517205 1\n255\n"),
            Err(PpmError::Format(_))
        ));
        assert!(matches!(
            parse_ppm(b"P6\n99999999999 99999999999\n255\n"),
            Err(PpmError::Format(_))
        ));
    }

    #[test]
    fn test_ppm_source_rereads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.ppm");
        let mut source = PpmSource::new(&path);
        assert!(!source.connect());
        assert!(source.get_frame().is_none());

        std::fs::write(&path, ppm(2, 2, 255, [50, 50, 50])).unwrap();
        assert!(source.connect());
        assert_eq!(source.get_frame().unwrap().pixel(0, 0), splat(50.0));

        std::fs::write(&path, ppm(2, 2, 255, [90, 90, 90])).unwrap();
        assert_eq!(source.get_frame().unwrap().pixel(1, 1), splat(90.0));

        // Half-written file is a transient failure
        std::fs::write(&path, b"P6\n2 2\n255\n\x01").unwrap();
        assert!(source.get_frame().is_none());
    }

    #[test]
    fn test_pattern_moves() {
        let mut source = TestPattern::new(Resolution {
            width: 32,
            height: 24,
        });
        assert!(source.connect());
        let first = source.get_frame().unwrap();
        let second = source.get_frame().unwrap();
        assert_eq!((first.width(), first.height()), (32, 24));
        assert_ne!(first.pixel(0, 0), second.pixel(0, 0));
    }

    #[test]
    fn test_pattern_empty_resolution() {
        let mut source = TestPattern::new(Resolution {
            width: 0,
            height: 10,
        });
        assert!(!source.connect());
    }
}
