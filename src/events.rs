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

//! Events delivered to the session controller.

use crate::bluetooth::Message;

/// Inbound work for the controller, processed in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum DroidEvent {
    /// A peer was accepted and adopted as the live connection.
    Connected { peer: String },
    /// The live connection was lost.
    Disconnected,
    /// A message decoded from the peer.
    PeerCommand(Message),
    /// The camera finished a capture; carries the new photo count.
    PhotoCaptured(u16),
    /// The camera failed to capture.
    CaptureFailed(String),
}

impl DroidEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Disconnected => "disconnected",
            Self::PeerCommand(_) => "peer-command",
            Self::PhotoCaptured(_) => "photo-captured",
            Self::CaptureFailed(_) => "capture-failed",
        }
    }
}
