//! # RESP2 Framing
//!
//! Purpose: Frame commands for the store and parse its replies. The core of
//! the client treats both as opaque; only the TCP transport and the sentinel
//! listener look inside.
//!
//! ## Design Principles
//! 1. **Caller-Owned Buffers**: Line and write buffers live on the connection.
//! 2. **Binary-Safe**: Arguments and bulk strings are raw bytes.
//! 3. **Fail Fast**: Bad framing is a `RespError::Protocol`; the transport
//!    attaches the endpoint before surfacing it.

use std::io::{self, BufRead};

use bytes::Bytes;

use hsearch_common::{ClientError, ClientResult};

/// Reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK style status replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays (search results, sentinel answers, pub/sub messages).
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Text payload of a status or non-null bulk reply.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            RespValue::Simple(data) | RespValue::Bulk(Some(data)) => std::str::from_utf8(data).ok(),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Error text of a `-ERR` reply.
    pub fn error_message(&self) -> Option<String> {
        match self {
            RespValue::Error(message) => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }

    /// Turns a `-ERR` reply into `ClientError::Server`.
    pub fn into_result(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server {
                message: String::from_utf8_lossy(&message).into_owned(),
            }),
            other => Ok(other),
        }
    }
}

/// Framing failure, before the endpoint is known.
#[derive(Debug)]
pub enum RespError {
    Io(io::Error),
    Protocol,
}

impl From<io::Error> for RespError {
    fn from(err: io::Error) -> Self {
        RespError::Io(err)
    }
}

pub type RespResult<T> = Result<T, RespError>;

/// Largest bulk string or array accepted from a peer (the server's default
/// `proto-max-bulk-len`).
const MAX_FRAME_LEN: i64 = 512 * 1024 * 1024;
/// Up-front capacity for arrays; longer ones grow as elements arrive.
const ARRAY_PREALLOC: usize = 64;

/// Appends a command name and its arguments as one RESP2 array.
pub fn encode_command(name: &[u8], args: &[Bytes], out: &mut Vec<u8>) {
    write_header(out, b'*', args.len() + 1);
    write_bulk(out, name);
    for arg in args {
        write_bulk(out, arg);
    }
}

fn write_bulk(out: &mut Vec<u8>, data: &[u8]) {
    write_header(out, b'$', data.len());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn write_header(out: &mut Vec<u8>, marker: u8, len: usize) {
    out.push(marker);
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Reads one reply from the buffered reader.
pub fn read_value<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> RespResult<RespValue> {
    read_line(reader, line)?;
    let (&marker, rest) = line.split_first().ok_or(RespError::Protocol)?;

    match marker {
        b'+' => Ok(RespValue::Simple(rest.to_vec())),
        b'-' => Ok(RespValue::Error(rest.to_vec())),
        b':' => Ok(RespValue::Integer(parse_int(rest)?)),
        b'$' => {
            let len = parse_int(rest)?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_int(rest)?;
            if len < 0 {
                return Ok(RespValue::Array(Vec::new()));
            }
            if len > MAX_FRAME_LEN {
                return Err(RespError::Protocol);
            }
            let mut items = Vec::with_capacity((len as usize).min(ARRAY_PREALLOC));
            for _ in 0..len {
                items.push(read_value(reader, line)?);
            }
            Ok(RespValue::Array(items))
        }
        _ => Err(RespError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> RespResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_FRAME_LEN {
        return Err(RespError::Protocol);
    }
    let mut data = vec![0u8; len as usize + 2];
    reader.read_exact(&mut data)?;
    if !data.ends_with(b"\r\n") {
        return Err(RespError::Protocol);
    }
    data.truncate(len as usize);
    Ok(RespValue::Bulk(Some(data)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> RespResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(RespError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(RespError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_int(data: &[u8]) -> RespResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(RespError::Protocol)
}
