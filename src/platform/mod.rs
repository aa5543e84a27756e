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

//! Hardware collaborators and the factory that picks Linux backends.

mod iio;
mod linux;
mod nmea;

pub use iio::{read_sample, IioAccelerometer, IIO_DEVICES};
pub use linux::{CommandCamera, LogMessenger, NoCellRadio, SysfsBattery};
pub use nmea::{parse_sentence, validate_checksum, NmeaGps, NmeaPosition, GPS_PROVIDER};

use anyhow::Result;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alert;
use crate::config::Config;
use crate::sensors::SensorFeeds;

/// Takes photos on demand.
pub trait Camera: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Whether captures can be requested at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Capture photo `index`, resolving to the new photo count.
    fn take_photo(&self, index: u8) -> BoxFuture<'static, Result<u16>>;
}

/// Battery charge source.
pub trait Battery: Send + Sync {
    /// Current charge as `(level, scale)`.
    fn read(&self) -> Result<(u32, u32)>;
}

/// Cellular signal source.
pub trait CellRadio: Send + Sync {
    /// Signal level 0-4, or -1 when unknown.
    fn level(&self) -> i8;
}

/// Text message gateway.
pub trait Messenger: Send + Sync {
    fn send(&self, recipient: &str, body: &str) -> Result<()>;

    /// Split a body into sendable pieces.
    fn segment(&self, body: &str) -> Vec<String> {
        alert::segment(body)
    }
}

/// Pushes accelerometer readings into the sensor feeds.
pub trait Accelerometer: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Deliver samples through `feeds` until `running` turns false.
    fn subscribe(
        &self,
        feeds: SensorFeeds,
        running: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<()>>;
}

/// Pushes location fixes into the sensor feeds.
pub trait LocationSource: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Deliver fixes through `feeds` until `running` turns false.
    fn subscribe(
        &self,
        feeds: SensorFeeds,
        running: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<()>>;
}

/// Convert a battery reading into a percentage.
pub fn battery_percent(level: u32, scale: u32) -> u8 {
    if scale == 0 {
        return 0;
    }
    (u64::from(level) * 100 / u64::from(scale)).min(100) as u8
}

/// The backends the controller talks to.
pub struct Platform {
    pub camera: Arc<dyn Camera>,
    pub battery: Box<dyn Battery>,
    pub radio: Box<dyn CellRadio>,
    pub messenger: Box<dyn Messenger>,
}

/// Build the Linux backends described by `config`.
pub fn create_platform(config: &Config) -> Platform {
    let camera = CommandCamera::new(config.photo_dir(), config.photos.capture_command.clone());
    info!("Camera backend: {}", camera.backend_name());

    Platform {
        camera: Arc::new(camera),
        battery: Box::new(SysfsBattery::new(config.platform.battery_path.clone())),
        radio: Box::new(NoCellRadio),
        messenger: Box::new(LogMessenger::new(config.data_dir.join("outbox.log"))),
    }
}

/// Sensor backends, run beside the controller rather than inside it.
pub struct SensorSources {
    pub accelerometer: Box<dyn Accelerometer>,
    pub location: Box<dyn LocationSource>,
}

impl SensorSources {
    /// Start every source on its own task.
    ///
    /// A source that fails only logs; the feeds stay open so the controller
    /// keeps its last known state.
    pub fn spawn(
        &self,
        feeds: &SensorFeeds,
        running: &watch::Receiver<bool>,
    ) -> Vec<(&'static str, JoinHandle<()>)> {
        let subscriptions = [
            (
                "accelerometer",
                self.accelerometer.subscribe(feeds.clone(), running.clone()),
            ),
            (
                "location",
                self.location.subscribe(feeds.clone(), running.clone()),
            ),
        ];

        subscriptions
            .into_iter()
            .map(|(name, subscription)| {
                let task = tokio::spawn(async move {
                    if let Err(e) = subscription.await {
                        warn!("No {} readings: {}", name, e);
                    }
                });
                (name, task)
            })
            .collect()
    }
}

/// Build the sensor backends described by `config`.
pub fn create_sensors(config: &Config) -> SensorSources {
    let device = config
        .platform
        .accel_device
        .clone()
        .or_else(|| IioAccelerometer::discover(Path::new(IIO_DEVICES)));
    let accelerometer = IioAccelerometer::new(device, config.platform.accel_interval());
    let location = NmeaGps::new(config.platform.gps_device.clone());
    info!(
        "Sensor backends: accelerometer {}, location {}",
        accelerometer.backend_name(),
        location.backend_name()
    );

    SensorSources {
        accelerometer: Box::new(accelerometer),
        location: Box::new(location),
    }
}
