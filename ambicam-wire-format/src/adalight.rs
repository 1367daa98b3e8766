//! Adalight binary header protocol.

use std::io::Read;

use rgb::RGB8;

use crate::EncodeError;

/// Frame magic bytes: `Ada`.
pub const MAGIC: &[u8; 3] = b"Ada";

/// Header size in bytes: magic, count high byte, count low byte, checksum.
pub const HEADER_SIZE: usize = 6;

/// XOR salt folded into the header checksum.
pub const CHECKSUM_SALT: u8 = 0x55;

/// Largest LED count whose `count - 1` fits the 16-bit header field.
pub const MAX_LEDS: usize = u16::MAX as usize + 1;

/// Six-byte Adalight frame header.
///
/// | Offset | Size | Field |
/// |--------|------|-------|
/// | 0 | 3 | Magic: `Ada` |
/// | 3 | 1 | High byte of `led_count - 1` |
/// | 4 | 1 | Low byte of `led_count - 1` |
/// | 5 | 1 | `hi ^ lo ^ 0x55` |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdalightHeader {
    led_count: usize,
}

impl AdalightHeader {
    /// Create a header for a frame of `led_count` LEDs.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::LedCount`] if `led_count` is zero or larger
    /// than [`MAX_LEDS`].
    pub fn new(led_count: usize) -> Result<Self, EncodeError> {
        if led_count == 0 || led_count > MAX_LEDS {
            return Err(EncodeError::LedCount { count: led_count });
        }
        Ok(Self { led_count })
    }

    /// Number of LEDs announced by this header.
    #[must_use]
    pub fn led_count(&self) -> usize {
        self.led_count
    }

    /// High byte of `led_count - 1`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // led_count - 1 <= u16::MAX
    pub fn hi(&self) -> u8 {
        ((self.led_count - 1) >> 8) as u8
    }

    /// Low byte of `led_count - 1`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn lo(&self) -> u8 {
        ((self.led_count - 1) & 0xFF) as u8
    }

    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.hi() ^ self.lo() ^ CHECKSUM_SALT
    }

    /// Serialize the header to its six wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        [
            MAGIC[0],
            MAGIC[1],
            MAGIC[2],
            self.hi(),
            self.lo(),
            self.checksum(),
        ]
    }

    /// Parse the three bytes following the magic.
    ///
    /// Returns `None` if the checksum does not match.
    #[must_use]
    pub fn from_count_bytes(hi: u8, lo: u8, checksum: u8) -> Option<Self> {
        if hi ^ lo ^ CHECKSUM_SALT != checksum {
            return None;
        }
        let led_count = usize::from(u16::from_be_bytes([hi, lo])) + 1;
        Some(Self { led_count })
    }
}

/// Encode a full Adalight frame: header followed by R,G,B per LED.
///
/// # Errors
///
/// Returns [`EncodeError::LedCount`] if the LED count is not representable.
pub fn encode_adalight(colors: &[RGB8]) -> Result<Vec<u8>, EncodeError> {
    let header = AdalightHeader::new(colors.len())?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + colors.len() * 3);
    buf.extend_from_slice(&header.to_bytes());
    for c in colors {
        buf.extend_from_slice(&[c.r, c.g, c.b]);
    }
    Ok(buf)
}

/// Errors produced while decoding an Adalight byte stream.
#[derive(Debug)]
pub enum FrameError {
    /// An I/O error from the underlying reader.
    ///
    /// `ErrorKind::UnexpectedEof` indicates a truncated frame.
    Io(std::io::Error),
    /// Header checksum mismatch; the iterator resumes scanning for the next magic.
    Checksum {
        /// Byte offset of the rejected header.
        offset: u64,
        hi: u8,
        lo: u8,
        checksum: u8,
    },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Checksum {
                offset,
                hi,
                lo,
                checksum,
            } => write!(
                f,
                "bad header checksum 0x{checksum:02x} for count bytes 0x{hi:02x}{lo:02x} at offset {offset}"
            ),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Checksum { .. } => None,
        }
    }
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Iterator over Adalight frames read from a byte stream.
///
/// Garbage before a frame is skipped by scanning for the `Ada` magic, so a
/// receiver that joins mid-stream resynchronizes on the next header.
pub struct FrameIter<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> FrameIter<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Returns the number of bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.reader.read(&mut byte)? {
            0 => Ok(None),
            _ => {
                self.offset += 1;
                Ok(Some(byte[0]))
            }
        }
    }

    /// Consume bytes until the magic has been seen. `Ok(false)` on clean EOF.
    fn sync(&mut self) -> std::io::Result<bool> {
        let mut matched = 0;
        while matched < MAGIC.len() {
            let Some(b) = self.read_byte()? else {
                return Ok(false);
            };
            if b == MAGIC[matched] {
                matched += 1;
            } else {
                matched = usize::from(b == MAGIC[0]);
            }
        }
        Ok(true)
    }
}

impl<R: Read> Iterator for FrameIter<R> {
    type Item = Result<Vec<RGB8>, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.sync() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => return Some(Err(FrameError::Io(e))),
        }

        let header_offset = self.offset - MAGIC.len() as u64;
        let mut count_bytes = [0u8; 3];
        if let Err(e) = self.reader.read_exact(&mut count_bytes) {
            return Some(Err(FrameError::Io(e)));
        }
        self.offset += 3;
        let [hi, lo, checksum] = count_bytes;

        let Some(header) = AdalightHeader::from_count_bytes(hi, lo, checksum) else {
            return Some(Err(FrameError::Checksum {
                offset: header_offset,
                hi,
                lo,
                checksum,
            }));
        };

        let mut payload = vec![0u8; header.led_count() * 3];
        if let Err(e) = self.reader.read_exact(&mut payload) {
            return Some(Err(FrameError::Io(e)));
        }
        self.offset += payload.len() as u64;

        Some(Ok(payload
            .chunks_exact(3)
            .map(|c| RGB8::new(c[0], c[1], c[2]))
            .collect()))
    }
}
