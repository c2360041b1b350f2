//! Entry framing and unframing.
//!
//! # Binary format
//!
//! ```text
//! ┌──────────────────┬──────────────────────┐
//! │ varint(len) 1–10 │ payload (len bytes)  │
//! └──────────────────┴──────────────────────┘
//! ```
//!
//! The length prefix is an unsigned LEB128 varint. Entries are
//! concatenated with no separator; an entry's total length is the varint
//! length plus the payload length.
//!
//! # JSON format
//!
//! One line per entry, terminated by `\n`:
//!
//! ```text
//! {"index":"<decimal>","data":"<tag><body>"}
//! ```
//!
//! `tag` is `+` when the payload is valid UTF-8 (the body is the payload
//! inlined verbatim) and `$` otherwise (the body is standard base64).
//! The decoder anchors on the `"data":"` substring rather than parsing
//! the line as JSON, and `+` bodies are not escaped; payloads containing
//! `"` or `\` are not representable.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::config::LogFormat;
use crate::error::{Error, Result};

/// Maximum encoded length of a varint, in bytes.
pub const MAX_VARINT_LEN: usize = 10;

/// Append `value` to `out` as an unsigned LEB128 varint.
pub fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push(value as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Decode an unsigned LEB128 varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` when
/// the varint is truncated or runs past [`MAX_VARINT_LEN`] bytes.
pub fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

/// Encode one entry onto the end of `dst` in the given format.
///
/// Returns the `(start, end)` byte range the entry occupies in `dst`,
/// suitable for a segment position table.
pub fn append_entry(
    dst: &mut Vec<u8>,
    index: u64,
    data: &[u8],
    format: LogFormat,
) -> (usize, usize) {
    let start = dst.len();
    match format {
        LogFormat::Binary => {
            write_uvarint(dst, data.len() as u64);
            dst.extend_from_slice(data);
        }
        LogFormat::Json => {
            dst.extend_from_slice(b"{\"index\":\"");
            dst.extend_from_slice(index.to_string().as_bytes());
            dst.extend_from_slice(b"\",\"data\":\"");
            match std::str::from_utf8(data) {
                Ok(_) => {
                    dst.push(b'+');
                    dst.extend_from_slice(data);
                }
                Err(_) => {
                    dst.push(b'$');
                    dst.extend_from_slice(BASE64.encode(data).as_bytes());
                }
            }
            dst.extend_from_slice(b"\"}\n");
        }
    }
    (start, dst.len())
}

/// Decode the payload of one binary-framed entry.
pub fn read_binary(edata: &[u8]) -> Result<Vec<u8>> {
    let (size, n) = read_uvarint(edata).ok_or(Error::Corrupt)?;
    let size = usize::try_from(size).map_err(|_| Error::Corrupt)?;
    if edata.len() - n < size {
        return Err(Error::Corrupt);
    }
    Ok(edata[n..n + size].to_vec())
}

/// Decode the payload of one JSON-framed entry.
///
/// Anchors on `"data":"`, dispatches on the tag byte, and reads the body
/// up to the next `"`.
pub fn read_json(edata: &[u8]) -> Result<Vec<u8>> {
    const ANCHOR: &[u8] = b"\"data\":\"";

    let anchor_pos = edata
        .windows(ANCHOR.len())
        .position(|w| w == ANCHOR)
        .ok_or(Error::Corrupt)?;
    let tag_pos = anchor_pos + ANCHOR.len();
    let tag = *edata.get(tag_pos).ok_or(Error::Corrupt)?;

    let body_start = tag_pos + 1;
    let body_len = edata[body_start..]
        .iter()
        .position(|&b| b == b'"')
        .ok_or(Error::Corrupt)?;
    let body = &edata[body_start..body_start + body_len];

    match tag {
        b'+' => Ok(body.to_vec()),
        b'$' => {
            let body = std::str::from_utf8(body).map_err(|_| Error::Corrupt)?;
            BASE64.decode(body).map_err(|_| Error::Corrupt)
        }
        _ => Err(Error::Corrupt),
    }
}

/// Measure the framed length of the entry at the front of `buf`.
///
/// Used by the segment loader to build position tables. Fails with
/// `Corrupt` on a truncated varint, a payload running past the buffer
/// end, or (for JSON) a missing line terminator.
pub fn framed_len(buf: &[u8], format: LogFormat) -> Result<usize> {
    match format {
        LogFormat::Binary => {
            let (size, n) = read_uvarint(buf).ok_or(Error::Corrupt)?;
            let size = usize::try_from(size).map_err(|_| Error::Corrupt)?;
            if buf.len() - n < size {
                return Err(Error::Corrupt);
            }
            Ok(n + size)
        }
        LogFormat::Json => {
            let nl = buf
                .iter()
                .position(|&b| b == b'\n')
                .ok_or(Error::Corrupt)?;
            Ok(nl + 1)
        }
    }
}
