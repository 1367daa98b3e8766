//! Wire formats understood by ambicam LED controllers.
//!
//! Two framings are supported:
//!
//! - The Adalight binary header protocol, spoken by serial bridges:
//!
//! ```text
//! 'A' 'd' 'a' hi lo checksum [R G B] * led_count
//! ```
//!
//!   where `(hi, lo)` is `led_count - 1` as big-endian u16 and
//!   `checksum = hi ^ lo ^ 0x55`.
//!
//! - The Prismatik line protocol, a single ASCII command per frame:
//!
//! ```text
//! setcolor:1-R,G,B;2-R,G,B;...;
//! ```
//!
//! Neither module performs I/O on its own beyond reading from a caller
//! supplied `Read` when decoding.

mod adalight;
mod line;

pub use adalight::{
    encode_adalight, AdalightHeader, FrameError, FrameIter, CHECKSUM_SALT, HEADER_SIZE, MAGIC,
    MAX_LEDS,
};
pub use line::{parse_setcolor, setcolor_command, HandshakeCommand, ParseError, SETCOLOR_PREFIX};
pub use rgb::RGB8;

/// Errors that can occur while encoding a color frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The LED count cannot be represented in the frame header.
    LedCount {
        /// Number of LEDs in the rejected frame.
        count: usize,
    },
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LedCount { count } => write!(
                f,
                "LED count {count} outside representable range 1..={MAX_LEDS}"
            ),
        }
    }
}

impl std::error::Error for EncodeError {}
