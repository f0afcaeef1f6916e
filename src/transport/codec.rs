//! CW-010: Length-delimited JSON frame codec.
//!
//! Wire format: a 4-byte little-endian payload length followed by exactly
//! that many bytes of JSON. Frames above `MAX_FRAME_LEN` are rejected before
//! any payload read so a corrupt length prefix cannot trigger a huge
//! allocation.

use crate::core::types::Message;
use std::io::{Read, Write};

/// Upper bound on a single frame's payload (64 MiB).
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Codec failures, split so the reader loop can tell a clean EOF from a
/// corrupt stream.
#[derive(Debug)]
pub enum CodecError {
    /// Stream ended cleanly on a frame boundary
    Closed,
    /// Read or write failed mid-frame
    Io(std::io::Error),
    /// Length prefix exceeds `MAX_FRAME_LEN`
    Oversized(u32),
    /// Payload was not a valid message
    Malformed(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "stream closed"),
            Self::Io(e) => write!(f, "stream error: {}", e),
            Self::Oversized(len) => {
                write!(f, "frame length {} exceeds limit {}", len, MAX_FRAME_LEN)
            }
            Self::Malformed(e) => write!(f, "malformed message: {}", e),
        }
    }
}

/// Write one message as a length-prefixed JSON frame.
pub fn write_frame<W: Write>(writer: &mut W, message: &Message) -> Result<(), CodecError> {
    let payload = serde_json::to_vec(message).map_err(|e| CodecError::Malformed(e.to_string()))?;
    let len = u32::try_from(payload.len()).map_err(|_| CodecError::Oversized(u32::MAX))?;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::Oversized(len));
    }
    writer.write_all(&len.to_le_bytes()).map_err(CodecError::Io)?;
    writer.write_all(&payload).map_err(CodecError::Io)?;
    Ok(())
}

/// Read one length-prefixed JSON frame.
///
/// EOF before the first prefix byte is `Closed`; EOF inside a frame is `Io`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Message, CodecError> {
    let mut prefix = [0u8; 4];
    read_exact_or_closed(reader, &mut prefix)?;
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(CodecError::Oversized(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(CodecError::Io)?;
    serde_json::from_slice(&payload).map_err(|e| CodecError::Malformed(e.to_string()))
}

/// Like read_exact, but a clean EOF before the first byte maps to `Closed`.
fn read_exact_or_closed<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(if filled == 0 {
                    CodecError::Closed
                } else {
                    CodecError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "EOF inside frame prefix",
                    ))
                });
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(CodecError::Io(e)),
        }
    }
    Ok(())
}
