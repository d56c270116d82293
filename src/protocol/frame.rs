//! RESP frame type and wire serialization.
//!
//! A [`RespFrame`] is both a parsed request (commands arrive as arrays of
//! bulk strings) and an outgoing reply. Every frame starts with a type
//! prefix byte and is terminated by CRLF:
//!
//! - `+` status, e.g. `+OK\r\n`
//! - `-` error, e.g. `-ERR unknown command\r\n`
//! - `:` 64-bit signed integer, e.g. `:1000\r\n`
//! - `$` bulk string, e.g. `$5\r\nhello\r\n`; the null bulk is `$-1\r\n`
//! - `*` array, e.g. `*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF line terminator used throughout the protocol.
pub const CRLF: &[u8] = b"\r\n";

/// RESP type prefix bytes.
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A command line: the arguments of a multi-bulk request, command name first.
pub type CmdLine = Vec<Bytes>;

/// A single RESP frame, parsed from or serialized to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespFrame {
    /// Non-binary-safe status line (`+OK\r\n`).
    Status(String),
    /// Error line (`-ERR ...\r\n`).
    Error(String),
    /// 64-bit signed integer (`:n\r\n`).
    Integer(i64),
    /// Binary-safe bulk string (`$len\r\n...\r\n`).
    Bulk(Bytes),
    /// Null bulk string (`$-1\r\n`), also produced for `*-1\r\n`.
    Null,
    /// Array of frames; `Array(vec![])` is the empty multi-bulk `*0\r\n`.
    Array(Vec<RespFrame>),
}

impl RespFrame {
    pub fn status(s: impl Into<String>) -> Self {
        RespFrame::Status(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespFrame::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespFrame::Integer(n)
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        RespFrame::Bulk(data.into())
    }

    pub fn array(frames: Vec<RespFrame>) -> Self {
        RespFrame::Array(frames)
    }

    /// The canonical success reply, `+OK\r\n`.
    pub fn ok() -> Self {
        RespFrame::Status("OK".to_string())
    }

    /// An array of bulk strings, the shape of every command reply that
    /// returns multiple values.
    pub fn bulk_array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        RespFrame::Array(items.into_iter().map(|b| RespFrame::Bulk(b.into())).collect())
    }

    /// Standard `WRONGTYPE` reply for type-mismatched commands.
    pub fn wrong_type() -> Self {
        RespFrame::Error(
            "WRONGTYPE Operation against a key holding the wrong kind of value".to_string(),
        )
    }

    /// Standard wrong-arity reply for a command.
    pub fn arg_num_error(cmd: &str) -> Self {
        RespFrame::Error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd
        ))
    }

    /// Standard reply for arguments that fail integer parsing.
    pub fn not_an_integer() -> Self {
        RespFrame::Error("ERR value is not an integer or out of range".to_string())
    }

    /// Serializes this frame into its wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes this frame into an existing buffer, avoiding allocation
    /// when the caller reuses one.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespFrame::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespFrame::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespFrame::Bulk(data) => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                buf.extend_from_slice(b"$-1");
                buf.extend_from_slice(CRLF);
            }
            RespFrame::Array(frames) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(frames.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for frame in frames {
                    frame.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespFrame::Error(_))
    }

    /// Extracts the command line from a multi-bulk request frame.
    ///
    /// Returns `None` for anything that is not a non-empty array of bulk or
    /// status elements.
    pub fn into_cmd_line(self) -> Option<CmdLine> {
        let frames = match self {
            RespFrame::Array(frames) if !frames.is_empty() => frames,
            _ => return None,
        };
        let mut args = Vec::with_capacity(frames.len());
        for frame in frames {
            match frame {
                RespFrame::Bulk(b) => args.push(b),
                RespFrame::Status(s) => args.push(Bytes::from(s)),
                _ => return None,
            }
        }
        Some(args)
    }
}

/// Serializes a command line as a RESP multi-bulk, the format of every AOF
/// record and every relayed peer request.
pub fn encode_cmd_line(args: &[Bytes]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(prefix::ARRAY);
    buf.extend_from_slice(args.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    for arg in args {
        buf.push(prefix::BULK);
        buf.extend_from_slice(arg.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        buf.extend_from_slice(arg);
        buf.extend_from_slice(CRLF);
    }
    buf
}

/// Builds a command line from string arguments.
pub fn cmd_line(parts: &[&str]) -> CmdLine {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

impl fmt::Display for RespFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespFrame::Status(s) => write!(f, "{}", s),
            RespFrame::Error(s) => write!(f, "(error) {}", s),
            RespFrame::Integer(n) => write!(f, "(integer) {}", n),
            RespFrame::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary, {} bytes)", data.len()),
            },
            RespFrame::Null => write!(f, "(nil)"),
            RespFrame::Array(frames) => {
                if frames.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, frame) in frames.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, frame)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serialize() {
        assert_eq!(RespFrame::ok().serialize(), b"+OK\r\n");
        assert_eq!(RespFrame::status("PONG").serialize(), b"+PONG\r\n");
    }

    #[test]
    fn error_serialize() {
        let frame = RespFrame::error("ERR unknown command 'foo'");
        assert_eq!(frame.serialize(), b"-ERR unknown command 'foo'\r\n");
    }

    #[test]
    fn integer_serialize() {
        assert_eq!(RespFrame::integer(1000).serialize(), b":1000\r\n");
        assert_eq!(RespFrame::integer(-42).serialize(), b":-42\r\n");
    }

    #[test]
    fn bulk_serialize() {
        let frame = RespFrame::bulk(Bytes::from("bar"));
        assert_eq!(frame.serialize(), b"$3\r\nbar\r\n");
    }

    #[test]
    fn null_bulk_is_exactly_dollar_minus_one() {
        assert_eq!(RespFrame::Null.serialize(), b"$-1\r\n");
    }

    #[test]
    fn array_serialize() {
        let frame = RespFrame::array(vec![
            RespFrame::bulk(Bytes::from("GET")),
            RespFrame::bulk(Bytes::from("foo")),
        ]);
        assert_eq!(frame.serialize(), b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
    }

    #[test]
    fn array_with_nil_element() {
        let frame = RespFrame::array(vec![RespFrame::bulk(Bytes::from("a")), RespFrame::Null]);
        assert_eq!(frame.serialize(), b"*2\r\n$1\r\na\r\n$-1\r\n");
    }

    #[test]
    fn empty_array_serialize() {
        assert_eq!(RespFrame::array(vec![]).serialize(), b"*0\r\n");
    }

    #[test]
    fn encode_cmd_line_matches_array_serialization() {
        let line = cmd_line(&["SET", "foo", "bar"]);
        let encoded = encode_cmd_line(&line);
        let frame = RespFrame::bulk_array(line);
        assert_eq!(encoded, frame.serialize());
    }

    #[test]
    fn into_cmd_line_rejects_non_arrays() {
        assert!(RespFrame::ok().into_cmd_line().is_none());
        assert!(RespFrame::array(vec![]).into_cmd_line().is_none());
        assert!(RespFrame::array(vec![RespFrame::Integer(1)])
            .into_cmd_line()
            .is_none());
    }

    #[test]
    fn into_cmd_line_extracts_args() {
        let frame = RespFrame::array(vec![
            RespFrame::bulk(Bytes::from("LPUSH")),
            RespFrame::bulk(Bytes::from("q")),
            RespFrame::bulk(Bytes::from("a")),
        ]);
        let args = frame.into_cmd_line().unwrap();
        assert_eq!(args, cmd_line(&["LPUSH", "q", "a"]));
    }
}
