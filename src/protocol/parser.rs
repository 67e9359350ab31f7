//! Incremental request decoding.
//!
//! A request is either an array frame (`*N\r\n` followed by exactly N bulk
//! string elements, each `$M\r\n<M bytes>\r\n`) or an inline command (one
//! line of whitespace-separated tokens). Either way the decoded form is the
//! same: an ordered list of argument byte strings, command name first.
//!
//! The decoder is incremental. Given the bytes received so far it returns:
//!
//! - `Ok(Some((argv, consumed)))` - one complete command, `consumed` bytes
//!   of the buffer belong to it
//! - `Ok(None)` - the buffer holds a prefix of a command, read more
//! - `Err(e)` - the buffer does not start with a well-formed command
//!
//! The caller appends network data to a buffer, calls
//! [`decode_command`], advances the buffer by `consumed` on success, and
//! repeats until `Ok(None)`.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors for input that cannot be decoded as a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An empty or whitespace-only inline line.
    #[error("empty command")]
    EmptyCommand,

    /// The `*N` count line does not hold a non-negative decimal integer.
    #[error("invalid array length '{0}'")]
    InvalidCount(String),

    /// A `$M` length line does not hold a non-negative decimal integer.
    #[error("invalid bulk length '{0}'")]
    InvalidBulkLength(String),

    /// An array element that does not start with the `$` prefix.
    #[error("expected bulk string element, got prefix {0:#04x}")]
    ExpectedBulkString(u8),

    /// A bulk payload not followed by CRLF.
    #[error("bulk payload missing trailing CRLF")]
    MissingTerminator,

    /// An inline line that is not valid UTF-8.
    #[error("invalid UTF-8 in inline command")]
    InvalidUtf8,

    /// A declared bulk length beyond what the server accepts.
    #[error("bulk length {size} exceeds limit of {max}")]
    BulkTooLarge { size: usize, max: usize },
}

/// Result type for decoding operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Largest accepted bulk string payload. Kept well under the connection
/// buffer cap so any accepted length line can eventually be satisfied.
pub const MAX_BULK_LEN: usize = 256 * 1024;

/// Attempts to decode one command from the front of `buf`.
///
/// # Example
///
/// ```
/// use emberkv::protocol::parser::decode_command;
///
/// let buf = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
/// let (argv, consumed) = decode_command(buf).unwrap().unwrap();
/// assert_eq!(argv.len(), 2);
/// assert_eq!(&argv[0][..], b"GET");
/// assert_eq!(consumed, buf.len());
/// ```
pub fn decode_command(buf: &[u8]) -> ProtocolResult<Option<(Vec<Bytes>, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] == prefix::ARRAY {
        decode_array(buf)
    } else {
        decode_inline(buf)
    }
}

/// Decodes an array frame: `*<count>\r\n` then `count` bulk elements.
fn decode_array(buf: &[u8]) -> ProtocolResult<Option<(Vec<Bytes>, usize)>> {
    debug_assert!(buf[0] == prefix::ARRAY);

    let count_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let count = parse_count(&buf[1..1 + count_end])
        .ok_or_else(|| invalid_count(&buf[1..1 + count_end]))?;

    // Count is client-supplied; do not trust it for preallocation.
    let mut argv = Vec::with_capacity(count.min(16));
    let mut consumed = 1 + count_end + 2;

    for _ in 0..count {
        if consumed >= buf.len() {
            return Ok(None);
        }
        match decode_bulk(&buf[consumed..])? {
            Some((arg, used)) => {
                argv.push(arg);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((argv, consumed)))
}

/// Decodes one bulk element: `$<length>\r\n<length bytes>\r\n`.
fn decode_bulk(buf: &[u8]) -> ProtocolResult<Option<(Bytes, usize)>> {
    if buf[0] != prefix::BULK {
        return Err(ProtocolError::ExpectedBulkString(buf[0]));
    }

    let len_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let len = parse_count(&buf[1..1 + len_end])
        .ok_or_else(|| invalid_bulk_length(&buf[1..1 + len_end]))?;

    if len > MAX_BULK_LEN {
        return Err(ProtocolError::BulkTooLarge {
            size: len,
            max: MAX_BULK_LEN,
        });
    }

    let data_start = 1 + len_end + 2;
    let total = data_start + len + 2;
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[data_start + len..data_start + len + 2] != CRLF {
        return Err(ProtocolError::MissingTerminator);
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + len]);
    Ok(Some((data, total)))
}

/// Decodes an inline command: one CRLF-terminated line of
/// whitespace-separated tokens.
fn decode_inline(buf: &[u8]) -> ProtocolResult<Option<(Vec<Bytes>, usize)>> {
    let line_end = match find_crlf(buf) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let line = std::str::from_utf8(&buf[..line_end]).map_err(|_| ProtocolError::InvalidUtf8)?;

    let argv: Vec<Bytes> = line
        .split_whitespace()
        .map(|token| Bytes::copy_from_slice(token.as_bytes()))
        .collect();

    if argv.is_empty() {
        return Err(ProtocolError::EmptyCommand);
    }

    Ok(Some((argv, line_end + 2)))
}

/// Parses a non-negative decimal count from a raw line.
fn parse_count(raw: &[u8]) -> Option<usize> {
    std::str::from_utf8(raw).ok()?.parse::<usize>().ok()
}

fn invalid_count(raw: &[u8]) -> ProtocolError {
    ProtocolError::InvalidCount(String::from_utf8_lossy(raw).into_owned())
}

fn invalid_bulk_length(raw: &[u8]) -> ProtocolError {
    ProtocolError::InvalidBulkLength(String::from_utf8_lossy(raw).into_owned())
}

/// Position of the first CRLF pair, if the buffer holds one.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == CRLF)
}
