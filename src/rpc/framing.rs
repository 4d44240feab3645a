// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Header/body framing of the wire protocol.
//!
//! A frame is a block of `Key: Value\r\n` header lines, a blank `\r\n` line,
//! and exactly `Content-Length` bytes of body. The framer never looks inside
//! the body.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::RpcError;
use super::transport::TransportReader;

/// Largest body the decoder accepts (4 MiB).
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

const CONTENT_LENGTH: &str = "Content-Length";
const CONTENT_TYPE: &str = "application/vscode-jsonrpc; charset=utf-8";

/// Prepends the header block to `payload`.
#[must_use]
pub fn encode(payload: &[u8]) -> Bytes {
    let header = format!(
        "{CONTENT_LENGTH}: {}\r\nContent-Type: {CONTENT_TYPE}\r\n\r\n",
        payload.len()
    );
    let mut buf = BytesMut::with_capacity(header.len() + payload.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}

/// Reads one frame body.
///
/// Returns `Ok(None)` if the stream ends cleanly before any header byte.
///
/// # Errors
///
/// Returns a framing error for a missing, non-numeric or oversized
/// `Content-Length`, or for end of stream inside the header block. Returns
/// a transport error if the body is cut short or the read fails.
pub async fn decode(reader: &mut TransportReader) -> Result<Option<Vec<u8>>, RpcError> {
    let Some(content_length) = read_headers(reader).await? else {
        return Ok(None);
    };

    if content_length > MAX_FRAME_BYTES {
        return Err(RpcError::Framing(format!(
            "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
        )));
    }

    reader.read_exact(content_length).await.map(Some)
}

/// Parses header lines up to the blank separator and returns the body length.
async fn read_headers(reader: &mut TransportReader) -> Result<Option<usize>, RpcError> {
    let mut content_length = None;
    let mut saw_header = false;

    loop {
        let line = reader.read_line().await?;
        if line.is_empty() {
            if saw_header {
                return Err(RpcError::Framing(
                    "stream ended inside header block".to_string(),
                ));
            }
            return Ok(None);
        }
        saw_header = true;

        let line = std::str::from_utf8(&line)
            .map_err(|e| RpcError::Framing(format!("header is not UTF-8: {e}")))?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }

        let Some((key, value)) = line.split_once(':') else {
            return Err(RpcError::Framing(format!("malformed header line: {line:?}")));
        };
        if key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            let len = value.trim().parse::<usize>().map_err(|_| {
                RpcError::Framing(format!("invalid Content-Length value: {:?}", value.trim()))
            })?;
            content_length = Some(len);
        }
    }

    content_length
        .map(Some)
        .ok_or_else(|| RpcError::Framing("missing Content-Length header".to_string()))
}
