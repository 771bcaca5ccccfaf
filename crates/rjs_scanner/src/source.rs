//! Character delivery from an in-memory string or a streaming reader.

use crate::char_codes::{is_format_control, is_line_terminator};
use std::fmt;
use std::io::{self, ErrorKind, Read};

/// Characters decoded per streaming refill.
const CHUNK_SIZE: usize = 512;

/// Delivers one logical character at a time.
///
/// All line-terminator sequences (`\r\n`, `\r`, and the Unicode line and
/// paragraph separators) are normalized to a single logical `\n`, and
/// invisible format-control characters are skipped, so the scanner proper
/// only ever sees clean text. Behavior is identical whether the source is a
/// single in-memory string or an incrementally read stream.
pub struct CharacterSource {
    reader: Option<Box<dyn Read>>,
    chunk: Vec<char>,
    chunk_pos: usize,
    /// Bytes read from the stream but not yet decoded (an incomplete UTF-8
    /// sequence at a chunk boundary).
    undecoded: Vec<u8>,
    /// A `\r` was just delivered as `\n`; a directly following `\n` must be
    /// swallowed even if it arrives in a later chunk.
    pending_line_feed: bool,
}

impl CharacterSource {
    /// Create a source over a full in-memory string.
    pub fn from_text(text: &str) -> Self {
        Self {
            reader: None,
            chunk: text.chars().collect(),
            chunk_pos: 0,
            undecoded: Vec::new(),
            pending_line_feed: false,
        }
    }

    /// Create a source over a streaming reader. Refills block synchronously.
    pub fn from_reader(reader: Box<dyn Read>) -> Self {
        Self {
            reader: Some(reader),
            chunk: Vec::with_capacity(CHUNK_SIZE),
            chunk_pos: 0,
            undecoded: Vec::new(),
            pending_line_feed: false,
        }
    }

    /// The next logical character, or `None` at end of input.
    pub fn next(&mut self) -> io::Result<Option<char>> {
        loop {
            let c = match self.raw_next()? {
                Some(c) => c,
                None => return Ok(None),
            };
            if is_format_control(c) {
                continue;
            }
            if self.pending_line_feed {
                self.pending_line_feed = false;
                if c == '\n' {
                    // second half of a \r\n pair, already delivered
                    continue;
                }
            }
            if is_line_terminator(c) {
                self.pending_line_feed = c == '\r';
                return Ok(Some('\n'));
            }
            return Ok(Some(c));
        }
    }

    fn raw_next(&mut self) -> io::Result<Option<char>> {
        while self.chunk_pos >= self.chunk.len() {
            if !self.fill_chunk()? {
                return Ok(None);
            }
        }
        let c = self.chunk[self.chunk_pos];
        self.chunk_pos += 1;
        Ok(Some(c))
    }

    /// Refill the chunk buffer from the stream. Returns false at end of
    /// input. Blocking I/O happens here; interrupted reads are retried.
    fn fill_chunk(&mut self) -> io::Result<bool> {
        if self.reader.is_none() {
            return Ok(false);
        }
        self.chunk.clear();
        self.chunk_pos = 0;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let reader = match self.reader.as_mut() {
                Some(r) => r,
                None => return Ok(false),
            };
            let n = match reader.read(&mut buf) {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if n == 0 {
                self.reader = None;
                if !self.undecoded.is_empty() {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        "source stream ends inside a UTF-8 sequence",
                    ));
                }
                return Ok(false);
            }
            self.undecoded.extend_from_slice(&buf[..n]);
            let valid = match std::str::from_utf8(&self.undecoded) {
                Ok(_) => self.undecoded.len(),
                // An incomplete trailing sequence waits for the next chunk;
                // anything else is malformed input.
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => {
                    return Err(io::Error::new(
                        ErrorKind::InvalidData,
                        "source stream is not valid UTF-8",
                    ));
                }
            };
            if valid > 0 {
                if let Ok(decoded) = std::str::from_utf8(&self.undecoded[..valid]) {
                    self.chunk.extend(decoded.chars());
                }
                self.undecoded.drain(..valid);
            }
            if !self.chunk.is_empty() {
                return Ok(true);
            }
            // Only a partial sequence arrived; keep reading.
        }
    }
}

impl fmt::Debug for CharacterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacterSource")
            .field("streaming", &self.reader.is_some())
            .field("chunk_pos", &self.chunk_pos)
            .field("pending_line_feed", &self.pending_line_feed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut CharacterSource) -> String {
        let mut out = String::new();
        while let Ok(Some(c)) = source.next() {
            out.push(c);
        }
        out
    }

    #[test]
    fn test_crlf_normalization() {
        let mut source = CharacterSource::from_text("a\r\nb\rc\nd");
        assert_eq!(drain(&mut source), "a\nb\nc\nd");
    }

    #[test]
    fn test_separator_normalization() {
        let mut source = CharacterSource::from_text("a\u{2028}b\u{2029}c");
        assert_eq!(drain(&mut source), "a\nb\nc");
    }

    #[test]
    fn test_format_chars_skipped() {
        let mut source = CharacterSource::from_text("a\u{00AD}b\u{FEFF}c");
        assert_eq!(drain(&mut source), "abc");
    }

    #[test]
    fn test_format_char_between_cr_and_lf() {
        // The invisible character never reaches normalization, so the pair
        // still collapses to one newline.
        let mut source = CharacterSource::from_text("a\r\u{200B}\nb");
        assert_eq!(drain(&mut source), "a\nb");
    }

    #[test]
    fn test_streaming_matches_in_memory() {
        let text = "var x = 1;\r\nx += 2;\r";
        let mut memory = CharacterSource::from_text(text);
        let mut stream =
            CharacterSource::from_reader(Box::new(io::Cursor::new(text.as_bytes().to_vec())));
        assert_eq!(drain(&mut memory), drain(&mut stream));
    }

    /// Reader that returns one byte at a time, forcing every boundary.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn test_trickle_reader_splits_crlf_and_utf8() {
        let text = "π\r\nλ";
        let mut stream = CharacterSource::from_reader(Box::new(Trickle {
            data: text.as_bytes().to_vec(),
            pos: 0,
        }));
        assert_eq!(drain(&mut stream), "π\nλ");
    }

    #[test]
    fn test_truncated_utf8_is_fatal() {
        // First two bytes of a three-byte sequence.
        let mut stream = CharacterSource::from_reader(Box::new(io::Cursor::new(vec![
            b'a', 0xE2, 0x82,
        ])));
        assert_eq!(stream.next().ok(), Some(Some('a')));
        assert!(stream.next().is_err());
    }
}
