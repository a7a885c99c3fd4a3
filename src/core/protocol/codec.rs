// src/core/protocol/codec.rs

//! Implements the RESP request encoder and reply decoder used by `Connection`.
//!
//! The codec is pure: it only moves bytes between a `BytesMut` and typed
//! values and never touches a socket. Requests are always encoded as an array
//! of bulk strings; replies may be any of the five RESP2 types.

use super::reply::Reply;
use crate::core::ClientError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Limits that keep a hostile or corrupted peer from exhausting memory or stack.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 256;

/// A command ready to be framed: the command name followed by its arguments.
#[derive(Debug, Clone, Copy)]
pub struct Request<'a, A> {
    pub command: &'a [u8],
    pub args: &'a [A],
}

impl<'a, A: AsRef<[u8]>> Request<'a, A> {
    pub fn new(command: &'a [u8], args: &'a [A]) -> Self {
        Self { command, args }
    }
}

/// Internal decode outcome: either the buffer ends mid-frame, or the bytes
/// are not valid RESP.
enum DecodeError {
    Incomplete,
    Invalid(String),
}

type DecodeResult<T> = Result<T, DecodeError>;

/// A `tokio_util::codec` implementation for RESP requests and replies.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl<A: AsRef<[u8]>> Encoder<Request<'_, A>> for RespCodec {
    type Error = ClientError;

    /// Appends `*<n+1>\r\n$<len>\r\n<command>\r\n...` to `dst`.
    fn encode(&mut self, item: Request<'_, A>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut len_buf = itoa::Buffer::new();
        dst.extend_from_slice(b"*");
        dst.extend_from_slice(len_buf.format(item.args.len() + 1).as_bytes());
        dst.extend_from_slice(CRLF);
        write_bulk(dst, item.command, &mut len_buf);
        for arg in item.args {
            write_bulk(dst, arg.as_ref(), &mut len_buf);
        }
        Ok(())
    }
}

fn write_bulk(dst: &mut BytesMut, data: &[u8], len_buf: &mut itoa::Buffer) {
    dst.reserve(data.len() + 16);
    dst.extend_from_slice(b"$");
    dst.extend_from_slice(len_buf.format(data.len()).as_bytes());
    dst.extend_from_slice(CRLF);
    dst.extend_from_slice(data);
    dst.extend_from_slice(CRLF);
}

impl Decoder for RespCodec {
    type Item = Reply;
    type Error = ClientError;

    /// Decodes one reply from the front of `src`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when the buffer holds only
    /// part of a frame. Malformed input is a `ClientError::Protocol`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match decode_recursive(&mut bytes, 0) {
            Ok(reply) => {
                let consumed = src.len() - bytes.len();
                src.advance(consumed);
                Ok(Some(reply))
            }
            Err(DecodeError::Incomplete) => Ok(None),
            Err(DecodeError::Invalid(msg)) => Err(ClientError::Protocol(msg)),
        }
    }
}

fn decode_recursive(bytes: &mut &[u8], depth: usize) -> DecodeResult<Reply> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(DecodeError::Invalid(
            "RESP recursion depth limit exceeded".to_string(),
        ));
    }
    let Some(&prefix) = bytes.first() else {
        return Err(DecodeError::Incomplete);
    };
    *bytes = &bytes[1..];

    match prefix {
        b'+' => Ok(Reply::Status(lossy(parse_line(bytes)?))),
        b'-' => Ok(Reply::Error(lossy(parse_line(bytes)?))),
        b':' => Ok(Reply::Integer(parse_i64(parse_line(bytes)?)?)),
        b'$' => parse_bulk(bytes),
        b'*' => parse_array(bytes, depth),
        other => Err(DecodeError::Invalid(format!(
            "unknown reply type byte {:?}",
            other as char
        ))),
    }
}

/// Splits off the next CRLF-terminated line, advancing past the terminator.
fn parse_line<'a>(bytes: &mut &'a [u8]) -> DecodeResult<&'a [u8]> {
    let pos = find_crlf(bytes).ok_or(DecodeError::Incomplete)?;
    let line = &bytes[..pos];
    *bytes = &bytes[pos + CRLF_LEN..];
    Ok(line)
}

fn parse_i64(line: &[u8]) -> DecodeResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            DecodeError::Invalid(format!(
                "invalid integer {:?}",
                String::from_utf8_lossy(line)
            ))
        })
}

fn parse_bulk(bytes: &mut &[u8]) -> DecodeResult<Reply> {
    let len = parse_i64(parse_line(bytes)?)?;
    if len == -1 {
        return Ok(Reply::Bulk(None));
    }
    if len < 0 || len as u64 > MAX_BULK_STRING_SIZE as u64 {
        return Err(DecodeError::Invalid(format!("invalid bulk length {len}")));
    }

    let len = len as usize;
    if bytes.len() < len + CRLF_LEN {
        return Err(DecodeError::Incomplete);
    }
    if &bytes[len..len + CRLF_LEN] != CRLF {
        return Err(DecodeError::Invalid(
            "bulk string not terminated by CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&bytes[..len]);
    *bytes = &bytes[len + CRLF_LEN..];
    Ok(Reply::Bulk(Some(data)))
}

fn parse_array(bytes: &mut &[u8], depth: usize) -> DecodeResult<Reply> {
    let len = parse_i64(parse_line(bytes)?)?;
    if len == -1 {
        return Ok(Reply::Array(None));
    }
    if len < 0 || len as u64 > MAX_FRAME_ELEMENTS as u64 {
        return Err(DecodeError::Invalid(format!("invalid array length {len}")));
    }

    let len = len as usize;
    // Cap the preallocation; the length is untrusted until the elements arrive.
    let mut items = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        items.push(decode_recursive(bytes, depth + 1)?);
    }
    Ok(Reply::Array(Some(items)))
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

/// Helper function to find the next CRLF sequence in a buffer.
fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}

/// Pulls a complete `-ERR ...` line off the front of `src`, if one is there.
///
/// Servers often write an error line right before closing a connection that
/// sent a malformed request. This only inspects what is already buffered and
/// never waits for more input.
pub fn read_error_line_if_possible(src: &mut BytesMut) -> Option<String> {
    if src.first() != Some(&b'-') {
        return None;
    }
    let pos = find_crlf(src)?;
    let line = lossy(&src[1..pos]);
    src.advance(pos + CRLF_LEN);
    Some(line)
}
