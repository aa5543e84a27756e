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

//! Configuration module.
//!
//! Handles loading application settings, writing defaults on first run.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "pepper2-droid";

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for photos, recipients and the outbox.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// Controller timer periods.
    pub schedule: ScheduleConfig,

    /// Photo capture settings.
    pub photos: PhotoConfig,

    /// Alert settings.
    pub alerts: AlertConfig,

    /// Hardware backends.
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Name the adapter advertises.
    pub device_name: String,

    /// RFCOMM channel for the service.
    pub channel: u8,

    /// Wait before recreating a listener that failed to open.
    pub listener_backoff_secs: u64,

    /// How often received bytes are decoded into commands.
    pub read_interval_ms: u64,

    /// Outbound messages buffered per connection.
    pub outbound_queue: usize,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_name: "pepper2".to_string(),
            channel: 1,
            listener_backoff_secs: 60,
            read_interval_ms: 3000,
            outbound_queue: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub telemetry_secs: u64,
    pub capture_secs: u64,
    pub chunk_ms: u64,
    pub alert_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            telemetry_secs: 5,
            capture_secs: 30,
            chunk_ms: 1000,
            alert_secs: 15,
        }
    }
}

impl ScheduleConfig {
    pub fn telemetry(&self) -> Duration {
        Duration::from_secs(self.telemetry_secs.max(1))
    }

    pub fn capture(&self) -> Duration {
        Duration::from_secs(self.capture_secs.max(1))
    }

    pub fn chunk(&self) -> Duration {
        Duration::from_millis(self.chunk_ms.max(1))
    }

    pub fn alert(&self) -> Duration {
        Duration::from_secs(self.alert_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    /// Where thumbnails are stored. Defaults to `<data_dir>/photos`.
    pub directory: Option<PathBuf>,

    /// Shell command that captures one photo. `{path}` is replaced with the
    /// thumbnail path. Without a command, capture is disabled.
    pub capture_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Recipient the list is seeded with.
    pub default_recipient: String,

    /// Seconds LEVEL must hold before periodic alerts go out.
    pub stability_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            default_recipient: "+15555550100".to_string(),
            stability_secs: 10,
        }
    }
}

impl AlertConfig {
    pub fn stability(&self) -> Duration {
        Duration::from_secs(self.stability_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Power supply directory holding `capacity` or `charge_now`/`charge_full`.
    pub battery_path: PathBuf,

    /// IIO accelerometer directory. Found under `/sys/bus/iio/devices` when unset.
    pub accel_device: Option<PathBuf>,

    /// Accelerometer sampling period.
    pub accel_interval_ms: u64,

    /// Serial device producing NMEA sentences. No location without one.
    pub gps_device: Option<PathBuf>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            battery_path: PathBuf::from("/sys/class/power_supply/BAT0"),
            accel_device: None,
            accel_interval_ms: 100,
            gps_device: None,
        }
    }
}

impl PlatformConfig {
    pub fn accel_interval(&self) -> Duration {
        Duration::from_millis(self.accel_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_path = config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        config.data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(config.photo_dir())?;

        Ok(config)
    }

    /// Read `path`, writing defaults there first if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            return Ok(toml::from_str(&content)?);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let config = Self::default();
        std::fs::write(path, toml::to_string_pretty(&config)?)?;
        Ok(config)
    }

    /// Directory thumbnails are read from and captured into.
    pub fn photo_dir(&self) -> PathBuf {
        self.photos
            .directory
            .clone()
            .unwrap_or_else(|| self.data_dir.join("photos"))
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_written_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.bluetooth.listener_backoff_secs, 60);
        assert_eq!(created.schedule.chunk(), Duration::from_secs(1));

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.bluetooth.device_name, created.bluetooth.device_name);
        assert_eq!(loaded.alerts.default_recipient, created.alerts.default_recipient);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[schedule]\ntelemetry_secs = 2\n\n[photos]\ncapture_command = \"true\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.schedule.telemetry(), Duration::from_secs(2));
        assert_eq!(config.schedule.capture_secs, 30);
        assert_eq!(config.photos.capture_command.as_deref(), Some("true"));
        assert_eq!(config.bluetooth.read_interval_ms, 3000);
        assert_eq!(config.platform.accel_interval(), Duration::from_millis(100));
        assert!(config.platform.gps_device.is_none());
    }

    #[test]
    fn test_sensor_devices() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[platform]\ngps_device = \"/dev/ttyACM0\"\naccel_interval_ms = 0\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.platform.gps_device,
            Some(PathBuf::from("/dev/ttyACM0"))
        );
        assert_eq!(config.platform.accel_interval(), Duration::from_millis(1));
        assert!(config.platform.accel_device.is_none());
    }

    #[test]
    fn test_photo_dir_default() {
        let config = Config {
            data_dir: PathBuf::from("/tmp/droid"),
            ..Default::default()
        };
        assert_eq!(config.photo_dir(), PathBuf::from("/tmp/droid/photos"));
    }
}
