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

//! Message protocol definitions and payload serialization.
//!
//! Every message travels in a frame:
//!
//! ```text
//! [marker:u16][type:u8][length:u8][checksum:u32][payload: length bytes]
//! ```
//!
//! All integers are big-endian. Framing lives in [`super::codec`]; this module
//! only knows how each message type lays out its payload.

use std::fmt;

use super::codec::FramingError;
use crate::sensors::Orientation;

/// Frame start marker (`'P' + 'M'`, `'S' + 'G'`).
pub const MARKER: u16 = 0x9D9A;

/// Marker + type + length + checksum.
pub const HEADER_LEN: usize = 8;

/// Largest slice of a photo carried by one PhotoData message.
pub const MAX_CHUNK_LEN: usize = 190;

/// index, chunk, chunk count, file size, chunk length.
pub const PHOTO_HEADER_LEN: usize = 9;

/// Largest payload the length field may announce.
pub const MAX_PAYLOAD_LEN: usize = PHOTO_HEADER_LEN + MAX_CHUNK_LEN;

/// Fixed DroidTelemetry payload size.
pub const TELEMETRY_LEN: usize = 23;

/// Longest phone number accepted in AddPhoneNumber.
pub const MAX_PHONE_NUMBER_LEN: usize = 190;

/// Message types supported by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    DroidTelemetry,
    PhotoData,
    StartPhotoData,
    StopPhotoData,
    SendText,
    AddPhoneNumber,
}

impl MessageType {
    /// Wire id of the message type.
    pub fn id(&self) -> u8 {
        match self {
            Self::DroidTelemetry => 2,
            Self::PhotoData => 3,
            Self::StartPhotoData => 10,
            Self::StopPhotoData => 11,
            Self::SendText => 12,
            Self::AddPhoneNumber => 13,
        }
    }

    /// Look up a message type by wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            2 => Some(Self::DroidTelemetry),
            3 => Some(Self::PhotoData),
            10 => Some(Self::StartPhotoData),
            11 => Some(Self::StopPhotoData),
            12 => Some(Self::SendText),
            13 => Some(Self::AddPhoneNumber),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DroidTelemetry => "DROID_TELEMETRY",
            Self::PhotoData => "PHOTO_DATA",
            Self::StartPhotoData => "START_PHOTO_DATA",
            Self::StopPhotoData => "STOP_PHOTO_DATA",
            Self::SendText => "SEND_TEXT",
            Self::AddPhoneNumber => "ADD_PHONE_NUMBER",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Periodic status report sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DroidTelemetry {
    /// Battery charge, 0-100.
    pub battery: u8,
    /// Cell signal level, -1 when unknown.
    pub radio: i8,
    pub accel_state: Orientation,
    /// Seconds spent in `accel_state`.
    pub accel_duration: u16,
    pub photo_count: u16,
    pub latitude: f64,
    pub longitude: f64,
}

/// One chunk of a photo file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoData {
    pub index: u8,
    pub chunk: u8,
    pub chunk_count: u8,
    pub file_size: u32,
    pub data: Vec<u8>,
}

/// Protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    DroidTelemetry(DroidTelemetry),
    PhotoData(PhotoData),
    StartPhotoData { index: u8 },
    StopPhotoData,
    SendText,
    AddPhoneNumber(String),
}

impl Message {
    /// Type tag of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::DroidTelemetry(_) => MessageType::DroidTelemetry,
            Self::PhotoData(_) => MessageType::PhotoData,
            Self::StartPhotoData { .. } => MessageType::StartPhotoData,
            Self::StopPhotoData => MessageType::StopPhotoData,
            Self::SendText => MessageType::SendText,
            Self::AddPhoneNumber(_) => MessageType::AddPhoneNumber,
        }
    }

    /// Largest payload the receiver accepts for this message.
    pub fn payload_limit(&self) -> usize {
        match self {
            Self::AddPhoneNumber(_) => MAX_PHONE_NUMBER_LEN,
            _ => MAX_PAYLOAD_LEN,
        }
    }

    /// Serialize the payload section of the frame.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::DroidTelemetry(t) => {
                let mut buf = Vec::with_capacity(TELEMETRY_LEN);
                buf.push(t.battery);
                buf.push(t.radio as u8);
                buf.push(t.accel_state.id());
                buf.extend_from_slice(&t.accel_duration.to_be_bytes());
                buf.extend_from_slice(&t.photo_count.to_be_bytes());
                buf.extend_from_slice(&t.latitude.to_be_bytes());
                buf.extend_from_slice(&t.longitude.to_be_bytes());
                buf
            }
            Self::PhotoData(p) => {
                let mut buf = Vec::with_capacity(PHOTO_HEADER_LEN + p.data.len());
                buf.push(p.index);
                buf.push(p.chunk);
                buf.push(p.chunk_count);
                buf.extend_from_slice(&p.file_size.to_be_bytes());
                buf.extend_from_slice(&(p.data.len() as u16).to_be_bytes());
                buf.extend_from_slice(&p.data);
                buf
            }
            Self::StartPhotoData { index } => vec![*index],
            Self::StopPhotoData | Self::SendText => Vec::new(),
            Self::AddPhoneNumber(number) => number.as_bytes().to_vec(),
        }
    }

    /// Parse a payload whose frame has already been validated.
    pub fn parse(msg_type: MessageType, payload: &[u8]) -> Result<Self, FramingError> {
        let mut reader = PayloadReader::new(msg_type, payload);

        let message = match msg_type {
            MessageType::DroidTelemetry => {
                reader.expect_len(TELEMETRY_LEN)?;
                let battery = reader.u8()?;
                let radio = reader.u8()? as i8;
                let state_id = reader.u8()?;
                let accel_state = Orientation::from_id(state_id)
                    .ok_or_else(|| reader.error(format!("unknown accel state {}", state_id)))?;
                Self::DroidTelemetry(DroidTelemetry {
                    battery,
                    radio,
                    accel_state,
                    accel_duration: reader.u16()?,
                    photo_count: reader.u16()?,
                    latitude: reader.f64()?,
                    longitude: reader.f64()?,
                })
            }
            MessageType::PhotoData => {
                let index = reader.u8()?;
                let chunk = reader.u8()?;
                let chunk_count = reader.u8()?;
                let file_size = reader.u32()?;
                let data_len = reader.u16()? as usize;
                if data_len > MAX_CHUNK_LEN {
                    return Err(reader.error(format!("chunk of {} bytes", data_len)));
                }
                let data = reader.take(data_len)?.to_vec();
                Self::PhotoData(PhotoData {
                    index,
                    chunk,
                    chunk_count,
                    file_size,
                    data,
                })
            }
            MessageType::StartPhotoData => {
                reader.expect_len(1)?;
                Self::StartPhotoData { index: reader.u8()? }
            }
            MessageType::StopPhotoData => {
                reader.expect_len(0)?;
                Self::StopPhotoData
            }
            MessageType::SendText => {
                reader.expect_len(0)?;
                Self::SendText
            }
            MessageType::AddPhoneNumber => {
                if payload.is_empty() || payload.len() > MAX_PHONE_NUMBER_LEN {
                    return Err(reader.error(format!("phone number of {} bytes", payload.len())));
                }
                let number = std::str::from_utf8(reader.take(payload.len())?)
                    .map_err(|e| reader.error(e.to_string()))?;
                Self::AddPhoneNumber(number.to_string())
            }
        };

        reader.finish()?;
        Ok(message)
    }
}

/// Big-endian cursor over a payload.
struct PayloadReader<'a> {
    msg_type: MessageType,
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(msg_type: MessageType, data: &'a [u8]) -> Self {
        Self {
            msg_type,
            data,
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> FramingError {
        FramingError::BadPayload {
            msg_type: self.msg_type,
            reason: reason.into(),
        }
    }

    fn expect_len(&self, len: usize) -> Result<(), FramingError> {
        if self.data.len() != len {
            return Err(self.error(format!(
                "expected {} bytes, got {}",
                len,
                self.data.len()
            )));
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], FramingError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(self.error(format!("truncated at byte {}", self.pos)));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FramingError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FramingError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, FramingError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, FramingError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn f64(&mut self) -> Result<f64, FramingError> {
        Ok(f64::from_be_bytes(self.array()?))
    }

    fn finish(&self) -> Result<(), FramingError> {
        if self.pos != self.data.len() {
            return Err(self.error(format!(
                "{} trailing bytes",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}
