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

//! Listening endpoint and accept loop.

use anyhow::Result;
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use futures::future::BoxFuture;
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::connection::{LinkSettings, PeerLink};
use crate::events::DroidEvent;

/// Service UUID advertised for the droid link.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xde746609_6dbf_4917_9040_40d1d2ce9c79);

/// Delay before retrying a failed accept.
const ACCEPT_RETRY: Duration = Duration::from_secs(1);

/// Something that can open a listener for peers.
pub trait LinkEndpoint: Send + Sync {
    type Listener: LinkListener;

    fn bind(&self) -> BoxFuture<'_, Result<Self::Listener>>;
}

/// An open listener yielding connected streams and the peer's address.
pub trait LinkListener: Send {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Wait for the next peer. `Ok(None)` means the listener has closed for
    /// good and must be opened again.
    fn accept(&mut self) -> BoxFuture<'_, Result<Option<(Self::Stream, String)>>>;
}

/// Accept loop feeding the shared [`PeerLink`].
pub struct TransportSession<E: LinkEndpoint> {
    endpoint: E,
    link: PeerLink,
    events: mpsc::Sender<DroidEvent>,
    settings: LinkSettings,
    listener_backoff: Duration,
}

impl<E: LinkEndpoint> TransportSession<E> {
    pub fn new(
        endpoint: E,
        link: PeerLink,
        events: mpsc::Sender<DroidEvent>,
        settings: LinkSettings,
        listener_backoff: Duration,
    ) -> Self {
        Self {
            endpoint,
            link,
            events,
            settings,
            listener_backoff,
        }
    }

    /// Accept peers until `running` turns false.
    ///
    /// The listener is created lazily and recreated after a backoff when
    /// binding fails or the listener closes. Each accepted peer replaces the
    /// previous connection.
    pub async fn run(self, mut running: watch::Receiver<bool>) {
        let mut listener: Option<E::Listener> = None;

        while *running.borrow() {
            if listener.is_none() {
                match self.endpoint.bind().await {
                    Ok(bound) => {
                        info!("Waiting for peers...");
                        listener = Some(bound);
                    }
                    Err(e) => {
                        error!(
                            "Failed to open listener: {}, retrying in {:?}",
                            e, self.listener_backoff
                        );
                        if stop_requested(&mut running, self.listener_backoff).await {
                            break;
                        }
                        continue;
                    }
                }
            }
            let Some(bound) = listener.as_mut() else {
                continue;
            };

            tokio::select! {
                accepted = bound.accept() => match accepted {
                    Ok(Some((stream, peer))) => {
                        info!("Connection from: {}", peer);
                        self.link
                            .adopt(stream, peer.clone(), self.events.clone(), &self.settings);
                        if self.events.send(DroidEvent::Connected { peer }).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        warn!(
                            "Listener closed, reopening in {:?}",
                            self.listener_backoff
                        );
                        listener = None;
                        if stop_requested(&mut running, self.listener_backoff).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                        if stop_requested(&mut running, ACCEPT_RETRY).await {
                            break;
                        }
                    }
                },
                changed = running.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.link.close();
        info!("Transport session stopped");
    }
}

/// Sleep for `delay`, returning early with true if shutdown is requested.
async fn stop_requested(running: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    let deadline = tokio::time::sleep(delay);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return !*running.borrow(),
            changed = running.changed() => {
                if changed.is_err() || !*running.borrow() {
                    return true;
                }
            }
        }
    }
}

/// RFCOMM endpoint on the default BlueZ adapter.
pub struct RfcommEndpoint {
    session: bluer::Session,
    adapter: bluer::Adapter,
    name: String,
    channel: u8,
}

impl RfcommEndpoint {
    /// Power up the default adapter and make it visible as `name`.
    pub async fn new(name: &str, channel: u8) -> Result<Self> {
        info!("Initializing Bluetooth endpoint...");

        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        adapter.set_discoverable(true).await?;
        adapter.set_pairable(true).await?;
        adapter.set_alias(name.to_string()).await?;
        info!("Adapter is discoverable as {}", name);

        Ok(Self {
            session,
            adapter,
            name: name.to_string(),
            channel,
        })
    }
}

impl LinkEndpoint for RfcommEndpoint {
    type Listener = RfcommListener;

    fn bind(&self) -> BoxFuture<'_, Result<RfcommListener>> {
        Box::pin(async move {
            if !self.adapter.is_powered().await? {
                self.adapter.set_powered(true).await?;
            }

            let profile = Profile {
                uuid: SERVICE_UUID,
                name: Some(self.name.clone()),
                channel: Some(self.channel.into()),
                role: Some(Role::Server),
                require_authentication: Some(false),
                require_authorization: Some(false),
                ..Default::default()
            };
            let handle = self.session.register_profile(profile).await?;
            info!(
                "RFCOMM service {} registered on channel {}",
                SERVICE_UUID, self.channel
            );
            Ok(RfcommListener { handle })
        })
    }
}

/// Registered RFCOMM profile awaiting connections.
pub struct RfcommListener {
    handle: ProfileHandle,
}

impl LinkListener for RfcommListener {
    type Stream = Stream;

    fn accept(&mut self) -> BoxFuture<'_, Result<Option<(Stream, String)>>> {
        Box::pin(async move {
            let Some(request) = self.handle.next().await else {
                info!("RFCOMM profile was unregistered");
                return Ok(None);
            };
            let peer = request.device().to_string();
            let stream = request.accept()?;
            Ok(Some((stream, peer)))
        })
    }
}
