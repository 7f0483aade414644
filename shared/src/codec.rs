//! Length-prefixed framing.
//!
//! A frame is a big-endian `u32` length followed by that many bytes: one
//! protocol version byte and the bincode body of a [`Packet`].

use crate::{Packet, ProtocolError, MAX_FRAME_LEN, PROTOCOL_VERSION};
use bincode::{deserialize, serialize};

pub const FRAME_HEADER_LEN: usize = 4;

/// Encodes `packet` as a complete frame, header included.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let body = serialize(packet).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    let len = body.len() + 1;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Validates a frame header and returns the number of bytes that follow it.
pub fn frame_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, ProtocolError> {
    let len = u32::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(ProtocolError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

/// Decodes the bytes following a frame header (version byte + body).
pub fn decode_frame_body(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    let (version, body) = bytes.split_first().ok_or(ProtocolError::EmptyFrame)?;
    if *version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(*version));
    }
    deserialize(body).map_err(|e| ProtocolError::Decode(e.to_string()))
}
