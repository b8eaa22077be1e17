//! Cursor over fixed-width ASCII reply payloads
//!
//! NDI replies are fixed-width fields with implied decimal points and no
//! separators. `Reply` walks a payload with explicit "take n bytes"
//! primitives so every parser states its field widths directly.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("reply truncated: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
    #[error("invalid numeric field {text:?}")]
    InvalidNumber { text: String },
    #[error("invalid hex field {text:?}")]
    InvalidHex { text: String },
    #[error("expected line feed after tool record, found {found:?}")]
    MissingLineFeed { found: Option<u8> },
    #[error("reply contains non-ASCII data")]
    NotAscii,
}

/// Cursor over one reply payload (CRC and trailing `\r` already removed).
pub struct Reply<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reply<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `n` raw bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < n {
            return Err(ParseError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let field = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(field)
    }

    /// Take the next `n` bytes as ASCII text.
    pub fn take_str(&mut self, n: usize) -> Result<&'a str, ParseError> {
        let field = self.take(n)?;
        std::str::from_utf8(field).map_err(|_| ParseError::NotAscii)
    }

    /// Skip `n` bytes of fields this parser does not use.
    pub fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        self.take(n).map(|_| ())
    }

    /// Consume `literal` if the payload continues with it.
    pub fn eat(&mut self, literal: &str) -> bool {
        if self.buf[self.pos..].starts_with(literal.as_bytes()) {
            self.pos += literal.len();
            true
        } else {
            false
        }
    }

    /// Take an `n`-digit upper-hex field.
    pub fn hex(&mut self, n: usize) -> Result<u32, ParseError> {
        let text = self.take_str(n)?;
        u32::from_str_radix(text, 16).map_err(|_| ParseError::InvalidHex { text: text.into() })
    }

    /// Take an `n`-character signed field with an implied decimal point,
    /// e.g. `+0012345` with scale 100.0 decodes to 123.45.
    pub fn fixed(&mut self, n: usize, scale: f64) -> Result<f64, ParseError> {
        let text = self.take_str(n)?;
        let value: i64 = text
            .trim_start()
            .parse()
            .map_err(|_| ParseError::InvalidNumber { text: text.into() })?;
        Ok(value as f64 / scale)
    }

    /// Require a line feed at the cursor (the separator after each tool
    /// record in a `TX` reply).
    pub fn line_feed(&mut self) -> Result<(), ParseError> {
        match self.buf.get(self.pos) {
            Some(&b'\n') => {
                self.pos += 1;
                Ok(())
            }
            found => Err(ParseError::MissingLineFeed {
                found: found.copied(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_skip() {
        let mut reply = Reply::new(b"AB123XY");
        assert_eq!(reply.take_str(2).unwrap(), "AB");
        reply.skip(3).unwrap();
        assert_eq!(reply.take_str(2).unwrap(), "XY");
        assert_eq!(reply.remaining(), 0);
    }

    #[test]
    fn test_take_past_end() {
        let mut reply = Reply::new(b"AB");
        assert_eq!(
            reply.take(3),
            Err(ParseError::Truncated {
                needed: 3,
                remaining: 2
            })
        );
    }

    #[test]
    fn test_hex() {
        let mut reply = Reply::new(b"0A00000001");
        assert_eq!(reply.hex(2).unwrap(), 0x0A);
        assert_eq!(reply.hex(8).unwrap(), 1);
    }

    #[test]
    fn test_hex_invalid() {
        let mut reply = Reply::new(b"0G");
        assert!(matches!(reply.hex(2), Err(ParseError::InvalidHex { .. })));
    }

    #[test]
    fn test_fixed_point() {
        let mut reply = Reply::new(b"+10000-00050+0012345");
        assert_eq!(reply.fixed(6, 10000.0).unwrap(), 1.0);
        assert_eq!(reply.fixed(6, 10000.0).unwrap(), -0.005);
        assert_eq!(reply.fixed(8, 100.0).unwrap(), 123.45);
    }

    #[test]
    fn test_eat() {
        let mut reply = Reply::new(b"MISSING00000000");
        assert!(!reply.eat("DISABLED"));
        assert!(reply.eat("MISSING"));
        assert_eq!(reply.remaining(), 8);
    }

    #[test]
    fn test_line_feed() {
        let mut reply = Reply::new(b"\nX");
        reply.line_feed().unwrap();
        assert_eq!(
            reply.line_feed(),
            Err(ParseError::MissingLineFeed { found: Some(b'X') })
        );
        reply.skip(1).unwrap();
        assert_eq!(
            reply.line_feed(),
            Err(ParseError::MissingLineFeed { found: None })
        );
    }
}
