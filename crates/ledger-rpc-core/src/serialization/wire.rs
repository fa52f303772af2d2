//! Byte framing for encoded payloads.
//!
//! ```text
//! [flag: u8][body]
//! flag 0x00: body is plain JSON
//! flag 0x01: body is LZ4 block data with a prepended size header
//! ```

use std::borrow::Cow;

use thiserror::Error;

pub const FLAG_PLAIN: u8 = 0x00;
pub const FLAG_LZ4: u8 = 0x01;

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame flag {0:#04x}")]
    UnknownFlag(u8),
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),
}

/// Frame `payload`, LZ4-compressing it when `compress` is set.
pub fn encode(payload: &[u8], compress: bool) -> Vec<u8> {
    if compress {
        let compressed = lz4_flex::compress_prepend_size(payload);
        let mut frame = Vec::with_capacity(compressed.len() + 1);
        frame.push(FLAG_LZ4);
        frame.extend_from_slice(&compressed);
        frame
    } else {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(FLAG_PLAIN);
        frame.extend_from_slice(payload);
        frame
    }
}

pub fn is_compressed(frame: &[u8]) -> bool {
    frame.first() == Some(&FLAG_LZ4)
}

/// Strip the frame flag, decompressing the body when flagged.
pub fn decode(frame: &[u8]) -> Result<Cow<'_, [u8]>, WireError> {
    let (&flag, body) = frame.split_first().ok_or(WireError::Empty)?;
    match flag {
        FLAG_PLAIN => Ok(Cow::Borrowed(body)),
        FLAG_LZ4 => lz4_flex::decompress_size_prepended(body)
            .map(Cow::Owned)
            .map_err(|e| WireError::DecompressionFailed(e.to_string())),
        other => Err(WireError::UnknownFlag(other)),
    }
}
