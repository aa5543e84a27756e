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

//! Accelerometer motion classification.
//!
//! Raw samples are low-pass filtered into a gravity estimate; what remains is
//! linear acceleration. The vertical component of its running average is
//! classified once per batch of samples, which keeps a single jolt from
//! flipping the reported state.

use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Raw samples accumulated before each classification.
pub const SAMPLES_PER_CLASSIFICATION: u32 = 20;

/// Average vertical linear acceleration (m/s²) at or above which we are rising.
pub const RISING_THRESHOLD: f64 = 1.1;

/// Average vertical linear acceleration (m/s²) at or below which we are falling.
pub const FALLING_THRESHOLD: f64 = -1.1;

/// How long LEVEL must hold before alerts are considered safe.
pub const DEFAULT_STABILITY: Duration = Duration::from_secs(10);

const GRAVITY_ALPHA: f64 = 0.8;

/// Orientation reported in telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Level,
    Rising,
    Falling,
}

impl Orientation {
    /// Wire id used in DroidTelemetry.
    pub fn id(&self) -> u8 {
        match self {
            Self::Level => 0,
            Self::Rising => 1,
            Self::Falling => 2,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Level),
            1 => Some(Self::Rising),
            2 => Some(Self::Falling),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Level => "LEVEL",
            Self::Rising => "RISING",
            Self::Falling => "FALLING",
        }
    }

    fn classify(vertical: f64) -> Self {
        if vertical >= RISING_THRESHOLD {
            Self::Rising
        } else if vertical <= FALLING_THRESHOLD {
            Self::Falling
        } else {
            Self::Level
        }
    }
}

/// One three-axis accelerometer reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn axes(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Current orientation and when it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionState {
    pub orientation: Orientation,
    pub since: Instant,
}

impl MotionState {
    /// Time spent in the current orientation.
    pub fn duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.since)
    }

    /// LEVEL held for at least `min`.
    pub fn is_stable(&self, now: Instant, min: Duration) -> bool {
        self.orientation == Orientation::Level && self.duration(now) >= min
    }
}

/// Turns raw accelerometer samples into a hysteresis-gated [`MotionState`].
#[derive(Debug)]
pub struct MotionClassifier {
    gravity: [f64; 3],
    average: Option<[f64; 3]>,
    samples: u32,
    state: MotionState,
}

impl MotionClassifier {
    /// Start out LEVEL as of `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            gravity: [0.0; 3],
            average: None,
            samples: 0,
            state: MotionState {
                orientation: Orientation::Level,
                since: now,
            },
        }
    }

    /// Feed one raw sample.
    ///
    /// Returns the new orientation when this sample completed a batch that
    /// changed it.
    pub fn on_sample(&mut self, sample: AccelSample, now: Instant) -> Option<Orientation> {
        let raw = sample.axes();
        let mut linear = [0.0; 3];
        for axis in 0..3 {
            self.gravity[axis] =
                GRAVITY_ALPHA * self.gravity[axis] + (1.0 - GRAVITY_ALPHA) * raw[axis];
            linear[axis] = raw[axis] - self.gravity[axis];
        }

        self.average = Some(match self.average {
            None => linear,
            Some(avg) => [
                (avg[0] + linear[0]) / 2.0,
                (avg[1] + linear[1]) / 2.0,
                (avg[2] + linear[2]) / 2.0,
            ],
        });

        self.samples += 1;
        if self.samples < SAMPLES_PER_CLASSIFICATION {
            return None;
        }
        self.samples = 0;

        let vertical = self.average.map(|avg| avg[2]).unwrap_or_default();
        let orientation = Orientation::classify(vertical);
        debug!("Vertical acceleration {:.3} -> {}", vertical, orientation.as_str());

        if orientation == self.state.orientation {
            return None;
        }

        info!(
            "Motion state {} -> {} after {:?}",
            self.state.orientation.as_str(),
            orientation.as_str(),
            self.state.duration(now)
        );
        self.state = MotionState {
            orientation,
            since: now,
        };
        Some(orientation)
    }

    /// Current state.
    pub fn state(&self) -> MotionState {
        self.state
    }
}
