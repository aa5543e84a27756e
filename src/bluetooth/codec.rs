// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Frame encoding and incremental decoding.

use thiserror::Error;
use tracing::warn;

use super::protocol::{Message, MessageType, HEADER_LEN, MARKER, MAX_PAYLOAD_LEN};

const MARKER_BYTES: [u8; 2] = MARKER.to_be_bytes();

/// Errors that invalidate a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("bad marker: got 0x{got:04X}, expected 0x{expected:04X}")]
    BadMarker { got: u16, expected: u16 },

    #[error("bad message type {0}")]
    BadMsgType(u8),

    #[error("bad payload length {0}")]
    BadLength(u8),

    #[error("{msg_type} payload of {len} bytes exceeds {limit}")]
    Oversized {
        msg_type: MessageType,
        len: usize,
        limit: usize,
    },

    #[error("bad checksum: got 0x{got:08X}, expected 0x{expected:08X}")]
    BadChecksum { got: u32, expected: u32 },

    #[error("bad {msg_type} payload: {reason}")]
    BadPayload {
        msg_type: MessageType,
        reason: String,
    },
}

/// XOR of all payload bytes, widened to 32 bits.
pub fn checksum(payload: &[u8]) -> u32 {
    payload.iter().fold(0u8, |acc, b| acc ^ b) as u32
}

/// Encode a message into a complete frame.
///
/// Fails with [`FramingError::Oversized`] when the payload would not fit the
/// length field or would be rejected by the receiver.
pub fn encode(message: &Message) -> Result<Vec<u8>, FramingError> {
    let payload = message.payload();
    let limit = message.payload_limit();
    if payload.len() > limit {
        return Err(FramingError::Oversized {
            msg_type: message.message_type(),
            len: payload.len(),
            limit,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&MARKER_BYTES);
    frame.push(message.message_type().id());
    frame.push(payload.len() as u8);
    frame.extend_from_slice(&checksum(&payload).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` while the frame is still incomplete, otherwise the
/// message together with the number of bytes it occupied.
pub fn decode_frame(buf: &[u8]) -> Result<Option<(Message, usize)>, FramingError> {
    if buf.len() < MARKER_BYTES.len() {
        return Ok(None);
    }

    let marker = u16::from_be_bytes([buf[0], buf[1]]);
    if marker != MARKER {
        return Err(FramingError::BadMarker {
            got: marker,
            expected: MARKER,
        });
    }

    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let msg_type = MessageType::from_id(buf[2]).ok_or(FramingError::BadMsgType(buf[2]))?;
    let length = buf[3];
    if length as usize > MAX_PAYLOAD_LEN {
        return Err(FramingError::BadLength(length));
    }
    let expected = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

    let frame_len = HEADER_LEN + length as usize;
    if buf.len() < frame_len {
        return Ok(None);
    }

    let payload = &buf[HEADER_LEN..frame_len];
    let got = checksum(payload);
    if got != expected {
        return Err(FramingError::BadChecksum { got, expected });
    }

    let message = Message::parse(msg_type, payload)?;
    Ok(Some((message, frame_len)))
}

/// Accumulates stream bytes and yields decoded messages.
///
/// A malformed frame is dropped and the decoder resynchronises on the next
/// marker, so bytes following a corrupted frame still decode.
pub struct FrameDecoder {
    buffer: Vec<u8>,
    discarded: usize,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(HEADER_LEN + MAX_PAYLOAD_LEN),
            discarded: 0,
        }
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Decode the next buffered message.
    ///
    /// `Ok(None)` means more bytes are needed. On error the offending bytes
    /// have already been discarded and the caller may simply call again.
    pub fn decode(&mut self) -> Result<Option<Message>, FramingError> {
        match decode_frame(&self.buffer) {
            Ok(Some((message, used))) => {
                self.buffer.drain(..used);
                Ok(Some(message))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                let dropped = match &e {
                    // Header was trusted, skip exactly this frame.
                    FramingError::BadChecksum { .. } | FramingError::BadPayload { .. } => {
                        HEADER_LEN + self.buffer[3] as usize
                    }
                    _ => self.resync_offset(),
                };
                self.buffer.drain(..dropped);
                self.discarded += dropped;
                warn!("{}, discarding {} out of sync bytes", e, dropped);
                Err(e)
            }
        }
    }

    /// Offset of the next possible marker after the current position.
    fn resync_offset(&self) -> usize {
        let found = self
            .buffer
            .windows(MARKER_BYTES.len())
            .skip(1)
            .position(|w| w == MARKER_BYTES);

        match found {
            Some(pos) => pos + 1,
            // Keep a trailing half marker.
            None if self.buffer.last() == Some(&MARKER_BYTES[0]) => self.buffer.len() - 1,
            None => self.buffer.len(),
        }
    }

    /// Number of bytes waiting to be decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes thrown away while resynchronising.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
