//! Delimiter-based line framing for an inbound byte stream.
//!
//! Serial devices deliver bytes in arbitrary chunks. [`LineFramer`] keeps the
//! trailing partial line between [`LineFramer::feed`] calls so that chunk
//! boundaries never change the lines produced:
//!
//! ```rust
//! use serialterm::LineFramer;
//!
//! let mut framer = LineFramer::default();
//! assert_eq!(framer.feed(b"AB\r").count(), 0);
//!
//! let lines: Vec<Vec<u8>> = framer.feed(b"\nCD\r\n").collect();
//! assert_eq!(lines, vec![b"AB\r".to_vec(), b"CD\r".to_vec()]);
//! ```
//!
//! A device that never sends the delimiter would grow the partial buffer
//! forever, so the framer caps line length: a line longer than
//! `max_line_length` bytes is emitted in pieces of at most that many bytes.
//! A piece is cut as soon as the line is known to exceed the cap, whether or
//! not its delimiter has arrived yet, so the pieces do not depend on how the
//! input was chunked.
//!
//! Pieces end on a UTF-8 character boundary when the bytes allow it: a cut
//! that would split a multi-byte character moves back to the start of that
//! character, so a piece may be up to three bytes shorter than the cap.

use crate::error::{Error, Result};

/// Default line delimiter.
pub const DEFAULT_DELIMITER: &[u8] = b"\n";

/// Default cap on a single line before it is force-flushed (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Splits a byte stream into lines at a configurable delimiter.
#[derive(Debug, Clone)]
pub struct LineFramer {
    buffer: Vec<u8>,
    delimiter: Vec<u8>,
    max_line_length: Option<usize>,
    // Bytes of `buffer` already known not to start a delimiter match
    scanned: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            delimiter: DEFAULT_DELIMITER.to_vec(),
            max_line_length: Some(DEFAULT_MAX_LINE_LENGTH),
            scanned: 0,
        }
    }
}

impl LineFramer {
    /// Create a framer splitting at `delimiter`.
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Result<Self> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(Error::Config("line delimiter must not be empty".to_string()));
        }

        Ok(Self {
            delimiter,
            ..Default::default()
        })
    }

    /// Set the force-flush cap. `None` lets the partial buffer grow without bound.
    pub fn with_max_line_length(mut self, max_line_length: Option<usize>) -> Result<Self> {
        if max_line_length == Some(0) {
            return Err(Error::Config(
                "maximum line length must be greater than zero".to_string(),
            ));
        }
        self.max_line_length = max_line_length;
        Ok(self)
    }

    /// The configured delimiter.
    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }

    /// The configured force-flush cap.
    pub fn max_line_length(&self) -> Option<usize> {
        self.max_line_length
    }

    /// Append `chunk` and return the lines it completes.
    ///
    /// The iterator is lazy: each item is cut from the internal buffer as it is
    /// pulled. Lines left unconsumed when the iterator is dropped stay buffered
    /// and are produced by the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Lines<'_> {
        self.buffer.extend_from_slice(chunk);
        Lines { framer: self }
    }

    /// Bytes received since the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drain the partial line, if any.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    /// Discard any partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let delim_len = self.delimiter.len();

        if let Some(pos) = self.buffer[self.scanned..]
            .windows(delim_len)
            .position(|w| w == self.delimiter.as_slice())
            .map(|p| p + self.scanned)
        {
            if let Some(max) = self
                .max_line_length
                .filter(|&max| pos > max)
            {
                return Some(self.cut_piece(max));
            }

            let line = self.buffer[..pos].to_vec();
            self.buffer.drain(..pos + delim_len);
            self.scanned = 0;
            return Some(line);
        }

        // A delimiter may still straddle the end of the buffer
        self.scanned = self
            .buffer
            .len()
            .saturating_sub(delim_len - 1);

        match self.max_line_length {
            // The line is only known to exceed the cap once a delimiter
            // starting right at the cap would have been fully visible
            Some(max) if self.buffer.len() >= max.saturating_add(delim_len) => {
                Some(self.cut_piece(max))
            },
            _ => None,
        }
    }

    /// Remove and return the first piece of an over-long line.
    fn cut_piece(&mut self, max: usize) -> Vec<u8> {
        let cut = utf8_cut(&self.buffer[..max]);
        self.scanned = 0;
        self.buffer
            .drain(..cut)
            .collect()
    }
}

/// Length of the longest prefix of `head` that does not end inside a
/// multi-byte UTF-8 character. Falls back to the whole of `head` when no
/// character start is found, so every piece is non-empty.
fn utf8_cut(head: &[u8]) -> usize {
    let len = head.len();
    for back in 1..=len.min(3) {
        let start = len - back;
        let byte = head[start];
        if byte & 0xC0 == 0x80 {
            continue;
        }

        let width = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back && start > 0 { start } else { len };
    }
    len
}

/// Lazy iterator over the lines completed by one [`LineFramer::feed`] call.
#[derive(Debug)]
pub struct Lines<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Lines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_line()
    }
}
