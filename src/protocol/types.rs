//! Reply values and their wire encoding.
//!
//! The server speaks a small subset of RESP. Every reply is one of five
//! kinds, each introduced by a one-byte prefix and terminated by CRLF:
//!
//! - `+` simple string, e.g. `+OK\r\n`
//! - `-` error, e.g. `-ERR unknown command 'FOO'\r\n`
//! - `:` integer, e.g. `:2\r\n`
//! - `$` bulk string, e.g. `$5\r\nhello\r\n`; absent values are the null
//!   bulk string `$-1\r\n`
//! - `*` array, e.g. `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`; elements are
//!   always bulk strings
//!
//! An empty bulk string (`$0\r\n\r\n`) and the null bulk string are
//! distinct values on the wire.

use bytes::Bytes;
use std::fmt;

/// Line terminator for every protocol line.
pub const CRLF: &[u8] = b"\r\n";

/// Wire-format type prefixes.
pub mod prefix {
    pub const SIMPLE: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A reply value produced by the command dispatcher and encoded onto the
/// wire by [`encode_into`](Reply::encode_into).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Non-binary-safe text without CRLF. Format: `+<text>\r\n`
    Simple(String),

    /// Error condition reported to the client. Format: `-<message>\r\n`
    Error(String),

    /// 64-bit signed integer. Format: `:<decimal>\r\n`
    Integer(i64),

    /// Binary-safe string. Format: `$<length>\r\n<bytes>\r\n`
    Bulk(Bytes),

    /// Absent value. Format: `$-1\r\n`
    Null,

    /// Sequence of bulk strings. Format: `*<count>\r\n<bulk><bulk>...`
    Array(Vec<Bytes>),
}

impl Reply {
    /// Creates a simple string reply.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::types::Reply;
    /// let ok = Reply::simple("OK");
    /// ```
    pub fn simple(s: impl Into<String>) -> Self {
        Reply::Simple(s.into())
    }

    /// Creates an error reply.
    ///
    /// # Example
    /// ```
    /// use emberkv::protocol::types::Reply;
    /// let err = Reply::error("ERR no command given");
    /// ```
    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    /// Creates an integer reply.
    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a bulk string reply.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// Creates a null bulk string reply.
    pub fn null() -> Self {
        Reply::Null
    }

    /// Creates an array reply from bulk string elements.
    pub fn array(items: Vec<Bytes>) -> Self {
        Reply::Array(items)
    }

    /// The canonical success reply.
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    /// The reply to a bare `PING`.
    pub fn pong() -> Self {
        Reply::Simple("PONG".to_string())
    }

    /// Encodes the reply into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encodes the reply into an existing buffer, avoiding an allocation
    /// per reply when the caller reuses one.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                buf.push(prefix::SIMPLE);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => {
                encode_bulk_into(data, buf);
            }
            Reply::Null => {
                buf.push(prefix::BULK);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Reply::Array(items) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    encode_bulk_into(item, buf);
                }
            }
        }
    }

    /// Returns true if this reply reports an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}

fn encode_bulk_into(data: &[u8], buf: &mut Vec<u8>) {
    buf.push(prefix::BULK);
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "\"{}\"", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => {
                if let Ok(s) = std::str::from_utf8(data) {
                    write!(f, "\"{}\"", s)
                } else {
                    write!(f, "(binary, {} bytes)", data.len())
                }
            }
            Reply::Null => write!(f, "(nil)"),
            Reply::Array(items) => write!(f, "(array, {} items)", items.len()),
        }
    }
}
