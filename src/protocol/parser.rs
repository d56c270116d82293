//! Incremental RESP parser.
//!
//! The parser consumes a byte buffer that the connection layer keeps
//! appending to, and yields at most one frame per call:
//!
//! - `Ok(Some((frame, consumed)))` — a complete frame; the caller advances
//!   the buffer by `consumed` bytes
//! - `Ok(None)` — the buffer holds only a partial frame; read more
//! - `Err(ProtocolError)` — malformed input; the caller replies with an
//!   error frame, discards the buffer, and keeps the connection alive
//!
//! Bad input never panics and never poisons the parser: state is rebuilt
//! from scratch on every call, so recovery is simply "drop the bad bytes".
//! Any first byte that is not a RESP prefix is treated as an inline command
//! (space-separated words, for ad-hoc telnet sessions) and canonicalized to
//! a multi-bulk frame.

use crate::protocol::frame::{prefix, RespFrame, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Largest accepted bulk string payload (512 MB, as in Redis).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Cap on array nesting to keep the recursive descent bounded.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Errors raised while decoding the byte stream.
///
/// The `Display` text is what clients see after the `-` prefix.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The first line of a frame was malformed.
    #[error("ERR protocol error: {0}")]
    Malformed(String),

    /// An integer field (`:n`, `$n`, `*n`) did not parse.
    #[error("ERR protocol error: invalid integer '{0}'")]
    InvalidInteger(String),

    /// A status, error, or integer line contained invalid UTF-8.
    #[error("ERR protocol error: invalid UTF-8")]
    InvalidUtf8,

    /// A bulk string declared more than [`MAX_BULK_SIZE`] bytes.
    #[error("ERR protocol error: bulk length {0} exceeds limit")]
    BulkTooLarge(i64),

    /// Arrays nested beyond [`MAX_NESTING_DEPTH`].
    #[error("ERR protocol error: nesting too deep")]
    NestingTooDeep,
}

pub type ParseResult<T> = Result<T, ProtocolError>;

/// Incremental parser over a growing byte buffer.
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one frame from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespFrame, usize)>> {
        self.depth = 0;
        self.parse_frame(buf)
    }

    fn parse_frame(&mut self, buf: &[u8]) -> ParseResult<Option<(RespFrame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep);
        }

        match buf[0] {
            prefix::STATUS => self.parse_line(buf, RespFrame::Status),
            prefix::ERROR => self.parse_line(buf, RespFrame::Error),
            prefix::INTEGER => self.parse_integer(buf),
            prefix::BULK => self.parse_bulk(buf),
            prefix::ARRAY => self.parse_array(buf),
            _ => self.parse_inline(buf),
        }
    }

    /// `+...\r\n` and `-...\r\n`: a single text line after the prefix.
    fn parse_line(
        &mut self,
        buf: &[u8],
        make: fn(String) -> RespFrame,
    ) -> ParseResult<Option<(RespFrame, usize)>> {
        let end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let text = std::str::from_utf8(&buf[1..1 + end]).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Some((make(text.to_string()), 1 + end + 2)))
    }

    /// `:<n>\r\n`
    fn parse_integer(&mut self, buf: &[u8]) -> ParseResult<Option<(RespFrame, usize)>> {
        let end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let text = std::str::from_utf8(&buf[1..1 + end]).map_err(|_| ProtocolError::InvalidUtf8)?;
        let n: i64 = text
            .parse()
            .map_err(|_| ProtocolError::InvalidInteger(text.to_string()))?;
        Ok(Some((RespFrame::Integer(n), 1 + end + 2)))
    }

    /// `$<len>\r\n<payload>\r\n`; `$-1\r\n` is the null bulk.
    fn parse_bulk(&mut self, buf: &[u8]) -> ParseResult<Option<(RespFrame, usize)>> {
        let header_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let len = parse_length(&buf[1..1 + header_end])?;

        if len == -1 {
            return Ok(Some((RespFrame::Null, 1 + header_end + 2)));
        }
        if len < 0 {
            return Err(ProtocolError::Malformed(format!("bad bulk length {}", len)));
        }
        if len as usize > MAX_BULK_SIZE {
            return Err(ProtocolError::BulkTooLarge(len));
        }

        let len = len as usize;
        let body_start = 1 + header_end + 2;
        let total = body_start + len + 2;
        if buf.len() < total {
            return Ok(None);
        }
        if &buf[body_start + len..total] != CRLF {
            return Err(ProtocolError::Malformed(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        let payload = Bytes::copy_from_slice(&buf[body_start..body_start + len]);
        Ok(Some((RespFrame::Bulk(payload), total)))
    }

    /// `*<n>\r\n` followed by `n` frames; `*0\r\n` is the empty multi-bulk
    /// and `*-1\r\n` the null array.
    fn parse_array(&mut self, buf: &[u8]) -> ParseResult<Option<(RespFrame, usize)>> {
        let header_end = match find_crlf(&buf[1..]) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let count = parse_length(&buf[1..1 + header_end])?;

        if count == -1 {
            return Ok(Some((RespFrame::Null, 1 + header_end + 2)));
        }
        if count < 0 {
            return Err(ProtocolError::Malformed(format!(
                "bad array length {}",
                count
            )));
        }

        let count = count as usize;
        let mut consumed = 1 + header_end + 2;
        let mut frames = Vec::with_capacity(count);

        self.depth += 1;
        for _ in 0..count {
            if consumed >= buf.len() {
                return Ok(None);
            }
            match self.parse_frame(&buf[consumed..])? {
                Some((frame, used)) => {
                    frames.push(frame);
                    consumed += used;
                }
                None => return Ok(None),
            }
        }
        self.depth -= 1;

        Ok(Some((RespFrame::Array(frames), consumed)))
    }

    /// Degenerate inline command: split one text line on whitespace and
    /// canonicalize to a multi-bulk.
    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(RespFrame, usize)>> {
        let end = match find_crlf(buf) {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let line = std::str::from_utf8(&buf[..end]).map_err(|_| ProtocolError::InvalidUtf8)?;

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Err(ProtocolError::Malformed("empty inline command".to_string()));
        }

        let frames = words
            .into_iter()
            .map(|w| RespFrame::Bulk(Bytes::copy_from_slice(w.as_bytes())))
            .collect();
        Ok(Some((RespFrame::Array(frames), end + 2)))
    }
}

fn parse_length(line: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    text.parse()
        .map_err(|_| ProtocolError::InvalidInteger(text.to_string()))
}

#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// One-shot parse of a single frame, for tests and the AOF loader.
pub fn parse_one(buf: &[u8]) -> ParseResult<Option<(RespFrame, usize)>> {
    RespParser::new().parse(buf)
}
