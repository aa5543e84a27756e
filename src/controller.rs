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

//! The droid's session controller.
//!
//! One task owns all session state and reacts, in arrival order, to timer
//! ticks, accelerometer samples and events from the transport and camera.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::alert::{self, AlertSnapshot, RecipientList};
use crate::bluetooth::{DroidTelemetry, Message, PeerLink};
use crate::config::Config;
use crate::events::DroidEvent;
use crate::photo::PhotoStreamer;
use crate::platform::{battery_percent, Platform};
use crate::sensors::{AccelSample, LocationTracker, MotionClassifier, DEFAULT_STABILITY};
use crate::state::AppState;

/// Photo indices are a single byte on the wire.
pub const MAX_PHOTOS: u16 = 255;

/// Timer periods and alert gating.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub telemetry_interval: Duration,
    pub capture_interval: Duration,
    pub chunk_interval: Duration,
    pub alert_interval: Duration,
    /// LEVEL time required before periodic alerts go out.
    pub stability: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            telemetry_interval: Duration::from_secs(5),
            capture_interval: Duration::from_secs(30),
            chunk_interval: Duration::from_secs(1),
            alert_interval: Duration::from_secs(15),
            stability: DEFAULT_STABILITY,
        }
    }
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            telemetry_interval: config.schedule.telemetry(),
            capture_interval: config.schedule.capture(),
            chunk_interval: config.schedule.chunk(),
            alert_interval: config.schedule.alert(),
            stability: config.alerts.stability(),
        }
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Owns the session state machine.
pub struct SessionController {
    settings: ControllerSettings,
    platform: Platform,
    link: PeerLink,
    streamer: PhotoStreamer,
    recipients: RecipientList,
    location: LocationTracker,
    motion: MotionClassifier,
    state: Arc<AppState>,
    events_tx: mpsc::Sender<DroidEvent>,
    photo_count: u16,
    capture_in_flight: bool,
}

impl SessionController {
    /// `events_tx` must feed the receiver later passed to [`run`](Self::run);
    /// capture results come back through it.
    pub fn new(
        settings: ControllerSettings,
        platform: Platform,
        link: PeerLink,
        streamer: PhotoStreamer,
        recipients: RecipientList,
        events_tx: mpsc::Sender<DroidEvent>,
    ) -> Self {
        Self {
            settings,
            platform,
            link,
            streamer,
            recipients,
            location: LocationTracker::new(),
            motion: MotionClassifier::new(now()),
            state: AppState::new(),
            events_tx,
            photo_count: 0,
            capture_in_flight: false,
        }
    }

    /// Share a location tracker fed by the platform's providers.
    pub fn with_location(mut self, location: LocationTracker) -> Self {
        self.location = location;
        self
    }

    /// Mirror session state into `state`.
    pub fn with_state(mut self, state: Arc<AppState>) -> Self {
        self.state = state;
        self
    }

    /// Resume counting from photos already on disk.
    pub fn with_photo_count(mut self, count: u16) -> Self {
        self.photo_count = count.min(MAX_PHOTOS);
        self.state.set_photo_count(self.photo_count);
        self
    }

    pub fn photo_count(&self) -> u16 {
        self.photo_count
    }

    pub fn streamer(&self) -> &PhotoStreamer {
        &self.streamer
    }

    pub fn recipients(&self) -> &RecipientList {
        &self.recipients
    }

    /// Run until `running` turns false.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<DroidEvent>,
        mut accel: watch::Receiver<Option<AccelSample>>,
        mut running: watch::Receiver<bool>,
    ) {
        info!("Session controller started");

        let mut telemetry = ticker(self.settings.telemetry_interval);
        let mut capture = ticker(self.settings.capture_interval);
        let mut chunk = ticker(self.settings.chunk_interval);
        let mut alert = ticker(self.settings.alert_interval);
        let mut accel_open = true;

        while *running.borrow() {
            tokio::select! {
                changed = running.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(event) = events.recv() => self.handle_event(event),
                changed = accel.changed(), if accel_open => {
                    if changed.is_err() {
                        debug!("Accelerometer feed closed");
                        accel_open = false;
                        continue;
                    }
                    let sample = *accel.borrow_and_update();
                    if let Some(sample) = sample {
                        self.on_accel_sample(sample, now());
                    }
                }
                _ = telemetry.tick() => self.on_telemetry_tick(now()),
                _ = capture.tick() => self.on_capture_tick(),
                _ = chunk.tick() => self.on_chunk_tick(),
                _ = alert.tick() => self.on_alert_tick(now()),
            }
        }

        info!("Session controller stopped");
    }

    /// Apply one inbound event.
    pub fn handle_event(&mut self, event: DroidEvent) {
        debug!("Event: {}", event.name());
        match event {
            DroidEvent::Connected { peer } => {
                info!("Peer connected: {}", peer);
                self.mirror_link();
            }
            DroidEvent::Disconnected => {
                info!("Peer disconnected");
                self.mirror_link();
            }
            DroidEvent::PeerCommand(message) => self.handle_command(message),
            DroidEvent::PhotoCaptured(count) => {
                self.capture_in_flight = false;
                self.photo_count = count.min(MAX_PHOTOS);
                self.state.set_photo_count(self.photo_count);
                info!("Photo count now {}", self.photo_count);

                if !self.streamer.is_streaming() {
                    self.streamer.start(0);
                    self.mirror_stream();
                }
            }
            DroidEvent::CaptureFailed(reason) => {
                self.capture_in_flight = false;
                warn!("Photo capture failed: {}", reason);
            }
        }
    }

    fn handle_command(&mut self, message: Message) {
        match message {
            Message::StartPhotoData { index } => {
                self.streamer.start(index);
                self.mirror_stream();
            }
            Message::StopPhotoData => {
                self.streamer.stop();
                self.mirror_stream();
            }
            Message::SendText => {
                info!("Peer requested an alert");
                self.dispatch_alert(now());
            }
            Message::AddPhoneNumber(number) => {
                if let Err(e) = self.recipients.add(&number) {
                    error!("Failed to store recipient {}: {}", number, e);
                }
            }
            Message::DroidTelemetry(_) | Message::PhotoData(_) => {
                debug!("Ignoring {} from peer", message.message_type());
            }
        }
    }

    /// Connection events can trail the slot they describe, so the mirror
    /// follows the slot rather than the event.
    fn mirror_link(&self) {
        match self.link.peer() {
            Some(peer) => self.state.set_connected(peer),
            None => self.state.set_disconnected(),
        }
    }

    fn mirror_stream(&self) {
        self.state
            .set_streaming_photo(self.streamer.transfer().map(|t| t.index));
    }

    fn on_accel_sample(&mut self, sample: AccelSample, now: Instant) {
        if let Some(orientation) = self.motion.on_sample(sample, now) {
            self.state.set_orientation(orientation);
        }
    }

    /// Current readings packed for the peer.
    pub fn telemetry_sample(&self, now: Instant) -> DroidTelemetry {
        let battery = match self.platform.battery.read() {
            Ok((level, scale)) => battery_percent(level, scale),
            Err(e) => {
                debug!("Battery unavailable: {}", e);
                0
            }
        };
        let motion = self.motion.state();
        let (latitude, longitude) = self.location.coordinates();

        DroidTelemetry {
            battery,
            radio: self.platform.radio.level(),
            accel_state: motion.orientation,
            accel_duration: motion.duration(now).as_secs().min(u16::MAX as u64) as u16,
            photo_count: self.photo_count,
            latitude,
            longitude,
        }
    }

    fn on_telemetry_tick(&mut self, now: Instant) {
        let sample = self.telemetry_sample(now);
        debug!(
            "Telemetry: battery {}% radio {} photos {} {}",
            sample.battery,
            sample.radio,
            sample.photo_count,
            sample.accel_state.as_str()
        );
        self.link.send(Message::DroidTelemetry(sample));
    }

    fn on_capture_tick(&mut self) {
        if self.capture_in_flight
            || self.photo_count >= MAX_PHOTOS
            || !self.platform.camera.is_available()
        {
            return;
        }

        let index = self.photo_count as u8;
        self.capture_in_flight = true;
        debug!("Requesting photo {}", index);

        let capture = self.platform.camera.take_photo(index);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match capture.await {
                Ok(count) => DroidEvent::PhotoCaptured(count),
                Err(e) => DroidEvent::CaptureFailed(e.to_string()),
            };
            let _ = events_tx.send(event).await;
        });
    }

    fn on_chunk_tick(&mut self) {
        if !self.streamer.is_streaming() || !self.link.is_connected() {
            return;
        }

        match self.streamer.next_chunk() {
            Ok(Some(chunk)) => {
                debug!(
                    "Sending photo {} chunk {}/{}",
                    chunk.index, chunk.chunk, chunk.chunk_count
                );
                self.link.send(Message::PhotoData(chunk));
            }
            Ok(None) => self.mirror_stream(),
            Err(e) => warn!("{}", e),
        }
    }

    fn on_alert_tick(&mut self, now: Instant) {
        let motion = self.motion.state();
        if !motion.is_stable(now, self.settings.stability) {
            debug!(
                "Holding alert: {} for {:?}",
                motion.orientation.as_str(),
                motion.duration(now)
            );
            return;
        }
        self.dispatch_alert(now);
    }

    fn dispatch_alert(&mut self, now: Instant) {
        let telemetry = self.telemetry_sample(now);
        let snapshot = AlertSnapshot {
            battery: telemetry.battery,
            radio: telemetry.radio,
            photo_count: telemetry.photo_count,
            orientation: telemetry.accel_state,
            duration: self.motion.state().duration(now),
            location: self.location.best().map(|fix| (fix.latitude, fix.longitude)),
        };

        let bodies = alert::compose(&snapshot);
        alert::dispatch(self.platform.messenger.as_ref(), &self.recipients, &bodies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Battery, Camera, CellRadio, Messenger};
    use crate::sensors::{LocationFix, Orientation};
    use anyhow::{anyhow, Result};
    use futures::future::BoxFuture;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use tokio::io::{duplex, DuplexStream};

    use crate::bluetooth::LinkSettings;
    use crate::photo::thumbnail_path;

    struct FakeCamera {
        available: bool,
    }

    impl Camera for FakeCamera {
        fn backend_name(&self) -> &'static str {
            "fake"
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn take_photo(&self, index: u8) -> BoxFuture<'static, Result<u16>> {
            Box::pin(async move { Ok(u16::from(index) + 1) })
        }
    }

    struct FakeBattery(Option<(u32, u32)>);

    impl Battery for FakeBattery {
        fn read(&self) -> Result<(u32, u32)> {
            self.0.ok_or_else(|| anyhow!("no battery"))
        }
    }

    struct FakeRadio;

    impl CellRadio for FakeRadio {
        fn level(&self) -> i8 {
            2
        }
    }

    #[derive(Clone, Default)]
    struct Outbox(Arc<Mutex<Vec<(String, String)>>>);

    impl Messenger for Outbox {
        fn send(&self, recipient: &str, body: &str) -> Result<()> {
            self.0.lock().push((recipient.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        controller: SessionController,
        outbox: Outbox,
        events_rx: mpsc::Receiver<DroidEvent>,
        dir: TempDir,
    }

    fn fixture(camera_available: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let outbox = Outbox::default();
        let platform = Platform {
            camera: Arc::new(FakeCamera {
                available: camera_available,
            }),
            battery: Box::new(FakeBattery(Some((3, 4)))),
            radio: Box::new(FakeRadio),
            messenger: Box::new(outbox.clone()),
        };
        let (events_tx, events_rx) = mpsc::channel(16);
        let controller = SessionController::new(
            ControllerSettings::default(),
            platform,
            PeerLink::new(),
            PhotoStreamer::new(dir.path()),
            RecipientList::new("5550001"),
            events_tx,
        );

        Fixture {
            controller,
            outbox,
            events_rx,
            dir,
        }
    }

    fn connect(fixture: &Fixture) -> DuplexStream {
        connect_as(fixture, "ground")
    }

    fn connect_as(fixture: &Fixture, peer: &str) -> DuplexStream {
        let (local, remote) = duplex(8192);
        fixture.controller.link.adopt(
            local,
            peer.to_string(),
            fixture.controller.events_tx.clone(),
            &LinkSettings::default(),
        );
        remote
    }

    fn command(message: Message) -> DroidEvent {
        DroidEvent::PeerCommand(message)
    }

    #[tokio::test]
    async fn test_start_and_stop_streaming() {
        let mut f = fixture(false);
        f.controller
            .handle_event(command(Message::StartPhotoData { index: 3 }));
        assert_eq!(f.controller.streamer().transfer().unwrap().index, 3);
        assert_eq!(f.controller.state.get_streaming_photo(), Some(3));

        f.controller.handle_event(command(Message::StopPhotoData));
        assert!(!f.controller.streamer().is_streaming());
        assert_eq!(f.controller.state.get_streaming_photo(), None);
    }

    #[tokio::test]
    async fn test_add_phone_number() {
        let mut f = fixture(false);
        f.controller
            .handle_event(command(Message::AddPhoneNumber("5550002".into())));
        f.controller
            .handle_event(command(Message::AddPhoneNumber("5550002".into())));
        assert_eq!(f.controller.recipients().len(), 2);
    }

    #[tokio::test]
    async fn test_send_text_is_not_gated() {
        let mut f = fixture(false);
        f.controller.handle_event(command(Message::SendText));

        let sent = f.outbox.0.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.starts_with("PEPPER-2 bat 75% radio 2 photos 0 LEVEL"));
        assert_eq!(sent[1].1, "PEPPER-2 location unknown");
    }

    #[tokio::test]
    async fn test_alert_tick_waits_for_stability() {
        let mut f = fixture(false);
        let start = f.controller.motion.state().since;

        f.controller.on_alert_tick(start + Duration::from_secs(5));
        assert!(f.outbox.0.lock().is_empty());

        f.controller.on_alert_tick(start + Duration::from_secs(10));
        assert_eq!(f.outbox.0.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_alert_tick_holds_while_moving() {
        let mut f = fixture(false);
        let start = f.controller.motion.state().since;
        for n in 1..=20u32 {
            f.controller.on_accel_sample(
                AccelSample::new(0.0, 0.0, n as f64),
                start + Duration::from_millis(100 * n as u64),
            );
        }
        assert_eq!(f.controller.state.get_orientation(), Orientation::Rising);

        f.controller.on_alert_tick(start + Duration::from_secs(60));
        assert!(f.outbox.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_capture_reports_back() {
        let mut f = fixture(true);
        f.controller.on_capture_tick();
        assert!(f.controller.capture_in_flight);

        // A second tick while in flight does nothing.
        f.controller.on_capture_tick();

        let event = f.events_rx.recv().await.unwrap();
        assert_eq!(event, DroidEvent::PhotoCaptured(1));
        f.controller.handle_event(event);
        assert!(!f.controller.capture_in_flight);
        assert_eq!(f.controller.photo_count(), 1);

        // Not streaming, so the new photo starts streaming from index 0.
        assert_eq!(f.controller.streamer().transfer().unwrap().index, 0);
        assert!(f.events_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_capture_does_not_interrupt_stream() {
        let mut f = fixture(true);
        f.controller
            .handle_event(command(Message::StartPhotoData { index: 4 }));
        f.controller.handle_event(DroidEvent::PhotoCaptured(9));
        assert_eq!(f.controller.streamer().transfer().unwrap().index, 4);
    }

    #[tokio::test]
    async fn test_capture_stops_at_limit() {
        let mut f = fixture(true);
        f.controller = f.controller.with_photo_count(MAX_PHOTOS);
        f.controller.on_capture_tick();
        assert!(!f.controller.capture_in_flight);

        let mut f = fixture(false);
        f.controller.on_capture_tick();
        assert!(!f.controller.capture_in_flight);
    }

    #[tokio::test]
    async fn test_telemetry_sample() {
        let f = fixture(false);
        let location = LocationTracker::new();
        location.update(LocationFix {
            latitude: 51.5,
            longitude: -0.12,
            accuracy: 5.0,
            time_ms: 0,
            provider: Some("gps".into()),
        });
        let controller = f.controller.with_location(location).with_photo_count(12);
        let since = controller.motion.state().since;

        let sample = controller.telemetry_sample(since + Duration::from_secs(42));
        assert_eq!(sample.battery, 75);
        assert_eq!(sample.radio, 2);
        assert_eq!(sample.photo_count, 12);
        assert_eq!(sample.accel_state, Orientation::Level);
        assert_eq!(sample.accel_duration, 42);
        assert_eq!((sample.latitude, sample.longitude), (51.5, -0.12));
    }

    #[tokio::test]
    async fn test_chunks_only_flow_while_connected() {
        let mut f = fixture(false);
        std::fs::write(thumbnail_path(f.dir.path(), 0), vec![1u8; 400]).unwrap();
        f.controller
            .handle_event(command(Message::StartPhotoData { index: 0 }));

        f.controller.on_chunk_tick();
        assert_eq!(f.controller.streamer().transfer().unwrap().chunk, 0);

        let _remote = connect(&f);
        f.controller.on_chunk_tick();
        f.controller.on_chunk_tick();
        assert_eq!(f.controller.streamer().transfer().unwrap().chunk, 2);
        f.controller.on_chunk_tick();
        assert_eq!(f.controller.streamer().transfer().unwrap().chunk, 0);
    }

    #[tokio::test]
    async fn test_connection_state_mirrored() {
        let mut f = fixture(false);
        let _remote = connect(&f);
        f.controller.handle_event(DroidEvent::Connected {
            peer: "ground".into(),
        });
        assert_eq!(f.controller.state.get_peer().as_deref(), Some("ground"));

        f.controller.link.close();
        f.controller.handle_event(DroidEvent::Disconnected);
        assert!(f.controller.state.get_peer().is_none());
    }

    #[tokio::test]
    async fn test_late_disconnect_keeps_new_peer() {
        let mut f = fixture(false);
        let _old = connect_as(&f, "ground-a");
        let _new = connect_as(&f, "ground-b");

        // The new peer is announced before the old link's disconnect lands.
        f.controller.handle_event(DroidEvent::Connected {
            peer: "ground-b".into(),
        });
        f.controller.handle_event(DroidEvent::Disconnected);
        assert_eq!(f.controller.state.get_peer().as_deref(), Some("ground-b"));
        assert_eq!(
            f.controller.state.get_status(),
            crate::state::ConnectionStatus::Connected
        );

        // A connect event for a peer already replaced shows the live one.
        f.controller.handle_event(DroidEvent::Connected {
            peer: "ground-a".into(),
        });
        assert_eq!(f.controller.state.get_peer().as_deref(), Some("ground-b"));
    }
}
