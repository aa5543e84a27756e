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

//! GPS backend reading NMEA 0183 sentences from a serial device.
//!
//! Only position-bearing sentences are used: GGA for the fix and its HDOP,
//! RMC for the fix alone. Sentences with a bad checksum or without a valid
//! fix are skipped.

use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, info};

use super::LocationSource;
use crate::sensors::{LocationFix, SensorFeeds};

/// Provider name attached to fixes from this backend.
pub const GPS_PROVIDER: &str = "gps";

/// Receiver range error in meters; HDOP scales it into an accuracy radius.
const RANGE_ERROR_M: f32 = 5.0;

/// Accuracy assumed before any GGA sentence has reported an HDOP.
const UNKNOWN_ACCURACY_M: f32 = 50.0;

/// Position carried by one sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct NmeaPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub hdop: Option<f32>,
}

impl NmeaPosition {
    /// Turn into a fix, using `hdop` when the sentence had none.
    pub fn into_fix(self, hdop: Option<f32>, time_ms: i64) -> LocationFix {
        let accuracy = self
            .hdop
            .or(hdop)
            .map(|h| h * RANGE_ERROR_M)
            .unwrap_or(UNKNOWN_ACCURACY_M);
        LocationFix {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy,
            time_ms,
            provider: Some(GPS_PROVIDER.to_string()),
        }
    }
}

/// Check the XOR of everything between `$` and `*` against the hex suffix.
pub fn validate_checksum(line: &str) -> bool {
    let Some(body) = line.strip_prefix('$') else {
        return false;
    };
    let Some((data, hex)) = body.split_once('*') else {
        return false;
    };
    let Ok(expected) = u8::from_str_radix(hex.trim(), 16) else {
        return false;
    };
    data.bytes().fold(0u8, |acc, b| acc ^ b) == expected
}

/// Parse one sentence into a position, if it carries a valid fix.
pub fn parse_sentence(line: &str) -> Option<NmeaPosition> {
    let line = line.trim();
    if !validate_checksum(line) {
        return None;
    }
    let data = line.get(1..line.find('*')?)?;
    let fields: Vec<&str> = data.split(',').collect();

    // Talker ids vary (GP, GN, GL); only the sentence type matters.
    match fields.first()?.get(2..)? {
        "GGA" => {
            if fields.len() < 9 || fields[6].is_empty() || fields[6] == "0" {
                return None;
            }
            Some(NmeaPosition {
                latitude: parse_coordinate(fields[2], fields[3])?,
                longitude: parse_coordinate(fields[4], fields[5])?,
                hdop: fields[8].parse().ok(),
            })
        }
        "RMC" => {
            if fields.len() < 7 || fields[2] != "A" {
                return None;
            }
            Some(NmeaPosition {
                latitude: parse_coordinate(fields[3], fields[4])?,
                longitude: parse_coordinate(fields[5], fields[6])?,
                hdop: None,
            })
        }
        _ => None,
    }
}

/// `[d]ddmm.mmmm` and a hemisphere letter into signed decimal degrees.
fn parse_coordinate(raw: &str, hemisphere: &str) -> Option<f64> {
    let dot = raw.find('.').unwrap_or(raw.len());
    if dot < 2 {
        return None;
    }
    let degrees: f64 = match &raw[..dot - 2] {
        "" => 0.0,
        whole => whole.parse().ok()?,
    };
    let minutes: f64 = raw[dot - 2..].parse().ok()?;
    let value = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Some(value),
        "S" | "W" => Some(-value),
        _ => None,
    }
}

/// Streams fixes from an NMEA device such as `/dev/ttyACM0`.
pub struct NmeaGps {
    device: Option<PathBuf>,
}

impl NmeaGps {
    pub fn new(device: Option<PathBuf>) -> Self {
        Self { device }
    }
}

impl LocationSource for NmeaGps {
    fn backend_name(&self) -> &'static str {
        if self.device.is_some() {
            "nmea"
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

        Box::pin(async move {
            let device = device.ok_or_else(|| anyhow!("no GPS device configured"))?;
            let file = tokio::fs::File::open(&device)
                .await
                .with_context(|| format!("opening {}", device.display()))?;
            info!("Reading NMEA sentences from {}", device.display());

            let mut lines = BufReader::new(file).split(b'\n');
            let mut hdop = None;

            while *running.borrow() {
                tokio::select! {
                    changed = running.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    line = lines.next_segment() => {
                        let Some(line) = line? else {
                            info!("GPS stream ended");
                            break;
                        };
                        let line = String::from_utf8_lossy(&line);
                        let Some(position) = parse_sentence(&line) else {
                            debug!("Skipping sentence: {}", line.trim());
                            continue;
                        };
                        if position.hdop.is_some() {
                            hdop = position.hdop;
                        }
                        let time_ms = chrono::Utc::now().timestamp_millis();
                        feeds.on_location_update(position.into_fix(hdop, time_ms));
                    }
                }
            }

            info!("Location unsubscribed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::LocationTracker;
    use tempfile::TempDir;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const GGA_NO_FIX: &str = "$GPGGA,123520,,,,,0,00,,,M,,M,,*61";
    const GNGGA_SOUTH_WEST: &str = "$GNGGA,010203,3345.120,S,07038.400,W,1,10,1.2,100.0,M,0.0,M,,*6A";
    const RMC_VOID: &str = "$GPRMC,123521,V,,,,,,,230394,,*38";

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_checksum() {
        assert!(validate_checksum(GGA));
        assert!(validate_checksum(RMC));
        assert!(!validate_checksum(&GGA.replace("*47", "*48")));
        assert!(!validate_checksum(&GGA.replace("4807", "4808")));
        assert!(!validate_checksum("GPGGA,1*00"));
        assert!(!validate_checksum("$GPGGA,1"));
    }

    #[test]
    fn test_parse_gga() {
        let position = parse_sentence(GGA).unwrap();
        assert!(close(position.latitude, 48.0 + 7.038 / 60.0));
        assert!(close(position.longitude, 11.0 + 31.0 / 60.0));
        assert_eq!(position.hdop, Some(0.9));

        let position = parse_sentence(GNGGA_SOUTH_WEST).unwrap();
        assert!(close(position.latitude, -(33.0 + 45.12 / 60.0)));
        assert!(close(position.longitude, -(70.0 + 38.4 / 60.0)));
    }

    #[test]
    fn test_parse_rmc() {
        let position = parse_sentence(&format!("{}\r\n", RMC)).unwrap();
        assert!(close(position.latitude, 48.0 + 7.038 / 60.0));
        assert_eq!(position.hdop, None);
    }

    #[test]
    fn test_sentences_without_fix_are_skipped() {
        assert_eq!(parse_sentence(GGA_NO_FIX), None);
        assert_eq!(parse_sentence(RMC_VOID), None);
        assert_eq!(parse_sentence("$GPGSV,1,1,00*79"), None);
        assert_eq!(parse_sentence("garbage"), None);
    }

    #[test]
    fn test_accuracy_from_hdop() {
        let gga = parse_sentence(GGA).unwrap().into_fix(None, 7);
        assert!((gga.accuracy - 4.5).abs() < 1e-6);
        assert_eq!(gga.time_ms, 7);
        assert_eq!(gga.provider.as_deref(), Some(GPS_PROVIDER));

        let rmc = parse_sentence(RMC).unwrap();
        assert_eq!(rmc.clone().into_fix(None, 0).accuracy, UNKNOWN_ACCURACY_M);
        assert!((rmc.into_fix(Some(2.0), 0).accuracy - 10.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_subscription_updates_tracker() {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("ttyGPS");
        let mut bytes = format!("{}\r\n{}\r\n", GGA_NO_FIX, GGA).into_bytes();
        bytes.extend_from_slice(b"\xff\xfe\r\n");
        bytes.extend_from_slice(format!("{}\r\n", RMC_VOID).as_bytes());
        std::fs::write(&device, bytes).unwrap();

        let tracker = LocationTracker::new();
        let (feeds, _accel_rx) = SensorFeeds::new(tracker.clone());
        let (_running_tx, running_rx) = watch::channel(true);
        let gps = NmeaGps::new(Some(device));
        assert_eq!(gps.backend_name(), "nmea");

        // A plain file ends, which finishes the subscription.
        gps.subscribe(feeds, running_rx).await.unwrap();
        let best = tracker.best().unwrap();
        assert!(close(best.latitude, 48.0 + 7.038 / 60.0));
        assert_eq!(best.provider.as_deref(), Some(GPS_PROVIDER));
    }

    #[tokio::test]
    async fn test_missing_device_is_an_error() {
        let dir = TempDir::new().unwrap();
        let (feeds, _accel_rx) = SensorFeeds::new(LocationTracker::new());
        let (_running_tx, running_rx) = watch::channel(true);

        let missing = NmeaGps::new(Some(dir.path().join("ttyNONE")));
        assert!(missing.subscribe(feeds.clone(), running_rx.clone()).await.is_err());

        let disabled = NmeaGps::new(None);
        assert_eq!(disabled.backend_name(), "disabled");
        assert!(disabled.subscribe(feeds, running_rx).await.is_err());
    }
}
