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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::sensors::Orientation;

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connected => "Connected",
        }
    }
}

/// Shared application state, readable from any task for diagnostics.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Connected peer address.
    pub connected_peer: RwLock<Option<String>>,

    /// Photos captured so far.
    pub photo_count: RwLock<u16>,

    /// Last classified orientation.
    pub orientation: RwLock<Orientation>,

    /// Photo currently being streamed.
    pub streaming_photo: RwLock<Option<u8>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            connected_peer: RwLock::new(None),
            photo_count: RwLock::new(0),
            orientation: RwLock::new(Orientation::Level),
            streaming_photo: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connected(&self, peer: String) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.connected_peer.write() = Some(peer);
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.connected_peer.write() = None;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_peer(&self) -> Option<String> {
        self.connected_peer.read().clone()
    }

    pub fn set_photo_count(&self, count: u16) {
        *self.photo_count.write() = count;
    }

    pub fn get_photo_count(&self) -> u16 {
        *self.photo_count.read()
    }

    pub fn set_orientation(&self, orientation: Orientation) {
        *self.orientation.write() = orientation;
    }

    pub fn get_orientation(&self) -> Orientation {
        *self.orientation.read()
    }

    pub fn set_streaming_photo(&self, index: Option<u8>) {
        *self.streaming_photo.write() = index;
    }

    pub fn get_streaming_photo(&self) -> Option<u8> {
        *self.streaming_photo.read()
    }
}
