//! Incremental RESP Parser
//!
//! TCP delivers a byte stream, not messages: a read may contain half a
//! command or a dozen pipelined ones. The parser therefore works against a
//! caller-owned buffer and reports one of three outcomes per call:
//!
//! - `Ok(Some((value, consumed)))` - one complete value; the caller advances
//!   the buffer by `consumed` bytes
//! - `Ok(None)` - the buffer holds a prefix of a value; read more first
//! - `Err(ParseError)` - the bytes can never become a valid value
//!
//! Payload bytes are copied out into `Bytes` once a value is known to be
//! complete, so partial input never allocates.
//!
//! Pathological sizes are rejected up front: a bulk string may announce at
//! most 512 MiB and an array at most 1,048,576 elements. Within those caps
//! arrays nest freely.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Maximum declared size of a single bulk string (512 MiB, as in Redis).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum declared element count of a single array.
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Errors for input that can never parse into a valid RESP value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// First byte of a value is not one of the five type prefixes.
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    /// Integer or length field is not a valid signed decimal.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Simple string, error, or length line contains invalid UTF-8.
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length below -1.
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length below -1.
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk string declares more than [`MAX_BULK_SIZE`] bytes.
    #[error("bulk string too large: {size} bytes (max {max})")]
    BulkTooLarge { size: usize, max: usize },

    /// Array declares more than [`MAX_ARRAY_LEN`] elements.
    #[error("array too large: {len} elements (max {max})")]
    ArrayTooLarge { len: usize, max: usize },

    /// Framing violation, e.g. a missing CRLF after a bulk payload.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parses RESP values out of a byte buffer, one complete value at a time.
#[derive(Debug, Default)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to parse one complete value from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        parse_value(buf)
    }
}

/// Convenience wrapper for one-shot parsing.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    parse_value(buf)
}

fn parse_value(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }

    match buf[0] {
        prefix::SIMPLE_STRING => parse_line(buf, RespValue::SimpleString),
        prefix::ERROR => parse_line(buf, RespValue::Error),
        prefix::INTEGER => parse_integer(buf),
        prefix::BULK_STRING => parse_bulk_string(buf),
        prefix::ARRAY => parse_array(buf),
        other => Err(ParseError::UnknownPrefix(other)),
    }
}

/// Parses the shared `<prefix><line>\r\n` shape of simple strings and
/// errors.
fn parse_line(
    buf: &[u8],
    make: impl FnOnce(String) -> RespValue,
) -> ParseResult<Option<(RespValue, usize)>> {
    let pos = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let content = std::str::from_utf8(&buf[1..1 + pos])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

    // prefix + line + CRLF
    Ok(Some((make(content.to_string()), 1 + pos + 2)))
}

fn parse_integer(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let pos = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let n = parse_decimal(&buf[1..1 + pos])?;
    Ok(Some((RespValue::Integer(n), 1 + pos + 2)))
}

fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let length_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let length = parse_decimal(&buf[1..1 + length_end])?;

    if length == -1 {
        return Ok(Some((RespValue::Null, 1 + length_end + 2)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::BulkTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let data_start = 1 + length_end + 2;
    let total = data_start + length + 2;
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[data_start + length..total] != CRLF {
        return Err(ParseError::Protocol(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((RespValue::BulkString(data), total)))
}

fn parse_array(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let count_end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let count = parse_decimal(&buf[1..1 + count_end])?;

    if count == -1 {
        return Ok(Some((RespValue::NullArray, 1 + count_end + 2)));
    }
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    let count = count as usize;
    if count > MAX_ARRAY_LEN {
        return Err(ParseError::ArrayTooLarge {
            len: count,
            max: MAX_ARRAY_LEN,
        });
    }

    let mut elements = Vec::with_capacity(count.min(64));
    let mut consumed = 1 + count_end + 2;

    for _ in 0..count {
        match parse_value(&buf[consumed..])? {
            Some((value, used)) => {
                elements.push(value);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((RespValue::Array(elements), consumed)))
}

/// Parses an ASCII signed decimal field.
fn parse_decimal(raw: &[u8]) -> ParseResult<i64> {
    let s = std::str::from_utf8(raw).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    s.parse()
        .map_err(|_| ParseError::InvalidInteger(s.to_string()))
}

/// Position of the first CRLF in `buf`, if any.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
