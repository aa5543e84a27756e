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

//! Bluetooth communication module.
//!
//! Frame codec, the single live peer connection, and the RFCOMM accept loop.

mod codec;
mod connection;
mod protocol;
mod reassembler;
mod server;

pub use codec::{checksum, decode_frame, encode, FrameDecoder, FramingError};
pub use connection::{LinkSettings, PeerLink};
pub use protocol::{
    DroidTelemetry, Message, MessageType, PhotoData, HEADER_LEN, MARKER, MAX_CHUNK_LEN,
    MAX_PAYLOAD_LEN, MAX_PHONE_NUMBER_LEN,
};
pub use reassembler::PhotoAssembler;
pub use server::{
    LinkEndpoint, LinkListener, RfcommEndpoint, RfcommListener, TransportSession, SERVICE_UUID,
};
