//! Prismatik `setcolor:` line protocol.

use std::fmt::Write;

use rgb::RGB8;

/// Prefix of every color command.
pub const SETCOLOR_PREFIX: &str = "setcolor:";

/// Session commands exchanged around a stream of color commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeCommand {
    /// Take exclusive control of the lights (sent on connect).
    Lock,
    /// Release control (sent on disconnect).
    Unlock,
    /// Close the session (sent after `Unlock`).
    Exit,
}

impl HandshakeCommand {
    /// Wire bytes including the line terminator.
    #[must_use]
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Lock => b"lock\n",
            Self::Unlock => b"unlock\n",
            Self::Exit => b"exit\n",
        }
    }
}

/// Build a `setcolor:` command (without line terminator).
///
/// LEDs are numbered from 1 and every entry, including the last, is
/// followed by `;`.
#[must_use]
pub fn setcolor_command(colors: &[RGB8]) -> String {
    // "NNN-RRR,GGG,BBB;" is at most 16 bytes for realistic strips
    let mut cmd = String::with_capacity(SETCOLOR_PREFIX.len() + colors.len() * 16);
    cmd.push_str(SETCOLOR_PREFIX);
    for (i, c) in colors.iter().enumerate() {
        // Writing to a String cannot fail
        let _ = write!(cmd, "{}-{},{},{};", i + 1, c.r, c.g, c.b);
    }
    cmd
}

/// Errors from [`parse_setcolor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line does not start with `setcolor:`.
    MissingPrefix,
    /// An entry is not of the form `index-R,G,B`.
    InvalidEntry(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPrefix => write!(f, "line does not start with '{SETCOLOR_PREFIX}'"),
            Self::InvalidEntry(entry) => write!(f, "invalid setcolor entry '{entry}'"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a `setcolor:` line into `(1-based index, color)` pairs.
///
/// Trailing whitespace and the final `;` are tolerated.
///
/// # Errors
///
/// Returns [`ParseError`] if the prefix is missing or an entry is malformed.
pub fn parse_setcolor(line: &str) -> Result<Vec<(usize, RGB8)>, ParseError> {
    let body = line
        .trim_end()
        .strip_prefix(SETCOLOR_PREFIX)
        .ok_or(ParseError::MissingPrefix)?;

    body.split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_entry(entry).ok_or_else(|| ParseError::InvalidEntry(entry.to_string())))
        .collect()
}

fn parse_entry(entry: &str) -> Option<(usize, RGB8)> {
    let (index, rgb) = entry.split_once('-')?;
    let mut channels = rgb.split(',').map(|v| v.trim().parse::<u8>().ok());
    let r = channels.next()??;
    let g = channels.next()??;
    let b = channels.next()??;
    if channels.next().is_some() {
        return None;
    }
    Some((index.trim().parse().ok()?, RGB8::new(r, g, b)))
}
