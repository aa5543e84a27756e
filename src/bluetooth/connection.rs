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

//! The single live peer connection and its read/write pump.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::codec::{encode, FrameDecoder};
use super::protocol::Message;
use crate::events::DroidEvent;

const READ_BUFFER_LEN: usize = 512;

/// Pacing of a connection pump.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// How often buffered bytes are decoded into frames.
    pub read_interval: Duration,
    /// Outbound messages held before new ones are dropped.
    pub outbound_queue: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            read_interval: Duration::from_secs(3),
            outbound_queue: 16,
        }
    }
}

struct ActiveConnection {
    id: u64,
    peer: String,
    outbound: mpsc::Sender<Message>,
    close_tx: watch::Sender<bool>,
}

/// Slot holding at most one live connection.
///
/// Adopting a new stream closes whatever was there before. Clones share the
/// same slot, so the accept loop and the controller see one connection.
#[derive(Clone, Default)]
pub struct PeerLink {
    active: Arc<Mutex<Option<ActiveConnection>>>,
    next_id: Arc<AtomicU64>,
}

impl PeerLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `stream` the live connection and start pumping it.
    ///
    /// Decoded frames are delivered to `events` as [`DroidEvent::PeerCommand`].
    /// When the stream fails while still current, [`DroidEvent::Disconnected`]
    /// is sent.
    pub fn adopt<S>(
        &self,
        stream: S,
        peer: String,
        events: mpsc::Sender<DroidEvent>,
        settings: &LinkSettings,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_queue.max(1));
        let (close_tx, close_rx) = watch::channel(false);

        let previous = self.active.lock().replace(ActiveConnection {
            id,
            peer: peer.clone(),
            outbound: outbound_tx,
            close_tx,
        });
        if let Some(old) = previous {
            info!("Closing connection to {} in favour of {}", old.peer, peer);
            let _ = old.close_tx.send(true);
        }

        let link = self.clone();
        let read_interval = settings.read_interval;
        tokio::spawn(async move {
            match pump(stream, outbound_rx, close_rx, &events, read_interval).await {
                Ok(()) => info!("Connection to {} closed", peer),
                Err(e) => warn!("Connection to {} lost: {}", peer, e),
            }
            if link.release(id) {
                let _ = events.send(DroidEvent::Disconnected).await;
            }
        });
    }

    /// Queue a message for the live connection.
    ///
    /// Returns false when the message was dropped because there is no
    /// connection or its queue is full.
    pub fn send(&self, message: Message) -> bool {
        let active = self.active.lock();
        let Some(conn) = active.as_ref() else {
            debug!("Not connected, dropping {}", message.message_type());
            return false;
        };

        match conn.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!("Outbound queue full, dropping {}", message.message_type());
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!("Connection closing, dropping {}", message.message_type());
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Address of the live peer.
    pub fn peer(&self) -> Option<String> {
        self.active.lock().as_ref().map(|c| c.peer.clone())
    }

    /// Close the live connection, if any.
    pub fn close(&self) {
        if let Some(conn) = self.active.lock().take() {
            info!("Closing connection to {}", conn.peer);
            let _ = conn.close_tx.send(true);
        }
    }

    /// Clear the slot if it still holds connection `id`.
    fn release(&self, id: u64) -> bool {
        let mut active = self.active.lock();
        if active.as_ref().map(|c| c.id) == Some(id) {
            *active = None;
            true
        } else {
            false
        }
    }
}

/// Move bytes between `stream` and the controller until either side stops.
async fn pump<S>(
    stream: S,
    mut outbound: mpsc::Receiver<Message>,
    mut close_rx: watch::Receiver<bool>,
    events: &mpsc::Sender<DroidEvent>,
    read_interval: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUFFER_LEN];
    let mut poll = tokio::time::interval(read_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    return Ok(());
                }
            }
            read = reader.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    // Deliver whatever arrived before the peer hung up.
                    deliver_frames(&mut decoder, events).await?;
                    return Err(anyhow!("peer closed the stream"));
                }
                debug!("Read {} bytes", n);
                decoder.extend(&buf[..n]);
            }
            _ = poll.tick() => {
                deliver_frames(&mut decoder, events).await?;
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    return Ok(());
                };
                let frame = match encode(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Not sending {}: {}", message.message_type(), e);
                        continue;
                    }
                };
                debug!("Sending {}", message.message_type());
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
        }
    }
}

/// Decode every complete buffered frame and hand it to the controller.
async fn deliver_frames(
    decoder: &mut FrameDecoder,
    events: &mpsc::Sender<DroidEvent>,
) -> Result<()> {
    loop {
        match decoder.decode() {
            Ok(Some(message)) => {
                info!("Received {} from peer", message.message_type());
                events
                    .send(DroidEvent::PeerCommand(message))
                    .await
                    .map_err(|_| anyhow!("controller has stopped"))?;
            }
            Ok(None) => return Ok(()),
            // Already logged and skipped by the decoder.
            Err(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, DuplexStream, ReadBuf};

    /// Reads from the inner stream; every write fails.
    struct BrokenWriter(DuplexStream);

    impl AsyncRead for BrokenWriter {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "radio link dropped",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            read_interval: Duration::from_secs(3),
            outbound_queue: 4,
        }
    }

    fn connect(link: &PeerLink, peer: &str, events: &mpsc::Sender<DroidEvent>) -> DuplexStream {
        let (local, remote) = duplex(4096);
        link.adopt(local, peer.to_string(), events.clone(), &settings());
        remote
    }

    async fn read_message(stream: &mut DuplexStream) -> Message {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 256];
        loop {
            if let Some(message) = decoder.decode().unwrap() {
                return message;
            }
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "stream closed");
            decoder.extend(&buf[..n]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_frames_become_events() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let link = PeerLink::new();
        let mut remote = connect(&link, "peer-a", &events_tx);

        let mut bytes = vec![0x00, 0xff];
        bytes.extend(encode(&Message::StartPhotoData { index: 3 }).unwrap());
        bytes.extend(encode(&Message::SendText).unwrap());
        remote.write_all(&bytes).await.unwrap();

        assert_eq!(
            events_rx.recv().await,
            Some(DroidEvent::PeerCommand(Message::StartPhotoData { index: 3 }))
        );
        assert_eq!(
            events_rx.recv().await,
            Some(DroidEvent::PeerCommand(Message::SendText))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_messages_are_framed() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let link = PeerLink::new();
        let mut remote = connect(&link, "peer-a", &events_tx);

        assert!(link.send(Message::StopPhotoData));
        assert!(link.send(Message::AddPhoneNumber("5550100".into())));
        assert_eq!(read_message(&mut remote).await, Message::StopPhotoData);
        assert_eq!(
            read_message(&mut remote).await,
            Message::AddPhoneNumber("5550100".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_is_dropped() {
        let link = PeerLink::new();
        assert!(!link.is_connected());
        assert!(!link.send(Message::StopPhotoData));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_hangup_reports_disconnect() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let link = PeerLink::new();
        let remote = connect(&link, "peer-a", &events_tx);
        assert_eq!(link.peer().as_deref(), Some("peer-a"));

        drop(remote);
        assert_eq!(events_rx.recv().await, Some(DroidEvent::Disconnected));
        assert!(!link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reports_disconnect() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let link = PeerLink::new();
        let (local, _remote) = duplex(4096);
        link.adopt(
            BrokenWriter(local),
            "peer-a".to_string(),
            events_tx,
            &settings(),
        );

        // The read side stays healthy; only the write tears the link down.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(link.is_connected());
        assert!(events_rx.try_recv().is_err());

        assert!(link.send(Message::StopPhotoData));
        assert_eq!(events_rx.recv().await, Some(DroidEvent::Disconnected));
        assert!(!link.is_connected());
        assert!(!link.send(Message::SendText));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_message_is_skipped() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let link = PeerLink::new();
        let mut remote = connect(&link, "peer-a", &events_tx);

        assert!(link.send(Message::AddPhoneNumber("9".repeat(300))));
        assert!(link.send(Message::SendText));
        assert_eq!(read_message(&mut remote).await, Message::SendText);
        assert!(link.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_peer_replaces_old() {
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let link = PeerLink::new();
        let mut first = connect(&link, "peer-a", &events_tx);
        let mut second = connect(&link, "peer-b", &events_tx);

        let mut buf = [0u8; 16];
        assert_eq!(first.read(&mut buf).await.unwrap(), 0);
        assert_eq!(link.peer().as_deref(), Some("peer-b"));

        // The replaced connection does not report a disconnect.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(events_rx.try_recv().is_err());

        assert!(link.send(Message::StopPhotoData));
        assert_eq!(read_message(&mut second).await, Message::StopPhotoData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close() {
        let (events_tx, _events_rx) = mpsc::channel(8);
        let link = PeerLink::new();
        let mut remote = connect(&link, "peer-a", &events_tx);

        link.close();
        assert!(!link.is_connected());
        let mut buf = [0u8; 16];
        assert_eq!(remote.read(&mut buf).await.unwrap(), 0);
    }
}
