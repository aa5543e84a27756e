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

//! Sensor processing: motion classification and location selection.

mod location;
mod motion;

pub use location::{is_better_fix, LocationFix, LocationTracker};
pub use motion::{
    AccelSample, MotionClassifier, MotionState, Orientation, DEFAULT_STABILITY,
    SAMPLES_PER_CLASSIFICATION,
};

use std::sync::Arc;
use tokio::sync::watch;

/// Entry points for platform sensor listeners.
///
/// Accelerometer samples go through a watch channel so a slow consumer only
/// ever sees the most recent reading. Location fixes are folded straight into
/// the shared [`LocationTracker`].
#[derive(Clone)]
pub struct SensorFeeds {
    accel_tx: Arc<watch::Sender<Option<AccelSample>>>,
    location: LocationTracker,
}

impl SensorFeeds {
    /// Create the feeds and the receiver the controller consumes.
    pub fn new(location: LocationTracker) -> (Self, watch::Receiver<Option<AccelSample>>) {
        let (accel_tx, accel_rx) = watch::channel(None);
        (
            Self {
                accel_tx: Arc::new(accel_tx),
                location,
            },
            accel_rx,
        )
    }

    /// Accelerometer listener callback.
    pub fn on_accel_sample(&self, x: f64, y: f64, z: f64) {
        self.accel_tx.send_replace(Some(AccelSample::new(x, y, z)));
    }

    /// Location listener callback.
    pub fn on_location_update(&self, fix: LocationFix) -> bool {
        self.location.update(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_sample_wins() {
        let (feeds, mut accel_rx) = SensorFeeds::new(LocationTracker::new());
        assert!(accel_rx.borrow().is_none());

        feeds.on_accel_sample(0.0, 0.0, 1.0);
        feeds.clone().on_accel_sample(0.0, 0.0, 2.0);
        assert!(accel_rx.has_changed().unwrap());
        assert_eq!(*accel_rx.borrow_and_update(), Some(AccelSample::new(0.0, 0.0, 2.0)));
    }

    #[test]
    fn test_location_updates_reach_tracker() {
        let tracker = LocationTracker::new();
        let (feeds, _accel_rx) = SensorFeeds::new(tracker.clone());

        let fix = LocationFix {
            latitude: 10.0,
            longitude: 20.0,
            accuracy: 3.0,
            time_ms: 1_000,
            provider: None,
        };
        assert!(feeds.on_location_update(fix));
        assert_eq!(tracker.coordinates(), (10.0, 20.0));
    }
}
