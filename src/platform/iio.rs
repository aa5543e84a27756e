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

//! Accelerometer backend for Linux Industrial I/O devices.
//!
//! Each axis is read from `in_accel_{x,y,z}_raw` and converted to m/s² with
//! the device's scale and offset attributes. Per-axis attributes take
//! precedence over shared ones.

use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::Accelerometer;
use crate::sensors::{AccelSample, SensorFeeds};

/// Where the kernel lists IIO devices.
pub const IIO_DEVICES: &str = "/sys/bus/iio/devices";

const AXES: [&str; 3] = ["x", "y", "z"];

/// Polls an IIO accelerometer at a fixed rate.
pub struct IioAccelerometer {
    device: Option<PathBuf>,
    interval: Duration,
}

impl IioAccelerometer {
    pub fn new(device: Option<PathBuf>, interval: Duration) -> Self {
        Self { device, interval }
    }

    /// First device under `root` that exposes accelerometer channels.
    pub fn discover(root: &Path) -> Option<PathBuf> {
        let mut devices: Vec<PathBuf> = std::fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join("in_accel_x_raw").exists())
            .collect();
        devices.sort();
        devices.into_iter().next()
    }
}

fn read_attr(device: &Path, name: &str) -> Result<f64> {
    let file = device.join(name);
    let content =
        std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    content
        .trim()
        .parse()
        .with_context(|| format!("parsing {}", file.display()))
}

/// Take one reading from the device at `device`.
pub fn read_sample(device: &Path) -> Result<AccelSample> {
    let shared_scale = read_attr(device, "in_accel_scale").ok();
    let shared_offset = read_attr(device, "in_accel_offset").ok();

    let mut values = [0.0; 3];
    for (value, axis) in values.iter_mut().zip(AXES) {
        let raw = read_attr(device, &format!("in_accel_{}_raw", axis))?;
        let scale = read_attr(device, &format!("in_accel_{}_scale", axis))
            .ok()
            .or(shared_scale)
            .unwrap_or(1.0);
        let offset = read_attr(device, &format!("in_accel_{}_offset", axis))
            .ok()
            .or(shared_offset)
            .unwrap_or(0.0);
        *value = (raw + offset) * scale;
    }

    Ok(AccelSample::new(values[0], values[1], values[2]))
}

impl Accelerometer for IioAccelerometer {
    fn backend_name(&self) -> &'static str {
        if self.device.is_some() {
            "iio"
        } else {
            "disabled"
        }
    }

    fn subscribe(
        &self,
        feeds: SensorFeeds,
        mut running: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Result<()>> {
        let device = self.device.clone();
        let period = self.interval;

        Box::pin(async move {
            let device = device.ok_or_else(|| anyhow!("no IIO accelerometer found"))?;
            info!(
                "Sampling accelerometer {} every {:?}",
                device.display(),
                period
            );

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut failing = false;

            while *running.borrow() {
                tokio::select! {
                    changed = running.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = ticker.tick() => match read_sample(&device) {
                        Ok(sample) => {
                            if failing {
                                info!("Accelerometer readings resumed");
                                failing = false;
                            }
                            feeds.on_accel_sample(sample.x, sample.y, sample.z);
                        }
                        Err(e) if failing => debug!("Accelerometer read failed: {}", e),
                        Err(e) => {
                            warn!("Accelerometer read failed: {}", e);
                            failing = true;
                        }
                    },
                }
            }

            info!("Accelerometer unsubscribed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::LocationTracker;
    use tempfile::TempDir;

    fn write_device(dir: &Path, raw: [&str; 3], scale: &str) {
        for (axis, value) in AXES.iter().zip(raw) {
            std::fs::write(dir.join(format!("in_accel_{}_raw", axis)), value).unwrap();
        }
        std::fs::write(dir.join("in_accel_scale"), scale).unwrap();
    }

    #[test]
    fn test_read_sample_applies_scale() {
        let dir = TempDir::new().unwrap();
        write_device(dir.path(), ["100\n", "-50\n", "1000\n"], "0.009806\n");
        std::fs::write(dir.path().join("in_accel_z_offset"), "2\n").unwrap();

        let sample = read_sample(dir.path()).unwrap();
        assert!((sample.x - 0.9806).abs() < 1e-9);
        assert!((sample.y + 0.4903).abs() < 1e-9);
        assert!((sample.z - 1002.0 * 0.009806).abs() < 1e-9);
    }

    #[test]
    fn test_read_sample_needs_every_axis() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("in_accel_x_raw"), "1").unwrap();
        assert!(read_sample(dir.path()).is_err());
    }

    #[test]
    fn test_discover() {
        let root = TempDir::new().unwrap();
        let gyro = root.path().join("iio:device0");
        let accel = root.path().join("iio:device1");
        std::fs::create_dir_all(&gyro).unwrap();
        std::fs::create_dir_all(&accel).unwrap();
        std::fs::write(gyro.join("in_anglvel_x_raw"), "0").unwrap();
        write_device(&accel, ["0", "0", "0"], "1");

        assert_eq!(IioAccelerometer::discover(root.path()), Some(accel));
        assert_eq!(IioAccelerometer::discover(&root.path().join("missing")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_feeds_until_stopped() {
        let dir = TempDir::new().unwrap();
        write_device(dir.path(), ["1", "2", "3"], "0.5");

        let (feeds, mut accel_rx) = SensorFeeds::new(LocationTracker::new());
        let (running_tx, running_rx) = watch::channel(true);
        let accel = IioAccelerometer::new(
            Some(dir.path().to_path_buf()),
            Duration::from_millis(50),
        );
        assert_eq!(accel.backend_name(), "iio");
        let task = tokio::spawn(accel.subscribe(feeds, running_rx));

        accel_rx.changed().await.unwrap();
        assert_eq!(
            *accel_rx.borrow_and_update(),
            Some(AccelSample::new(0.5, 1.0, 1.5))
        );

        running_tx.send(false).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_device_is_an_error() {
        let (feeds, _accel_rx) = SensorFeeds::new(LocationTracker::new());
        let (_running_tx, running_rx) = watch::channel(true);
        let accel = IioAccelerometer::new(None, Duration::from_millis(50));
        assert_eq!(accel.backend_name(), "disabled");
        assert!(accel.subscribe(feeds, running_rx).await.is_err());
    }
}
