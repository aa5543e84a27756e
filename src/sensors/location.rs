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

//! Best-known location selection.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A fix more than this much newer always wins, one this much older always loses.
pub const SIGNIFICANT_TIME_DELTA_MS: i64 = 2 * 60 * 1000;

/// Largest accuracy loss, in whole meters, tolerated from a newer fix of the
/// same provider.
pub const SIGNIFICANT_ACCURACY_DELTA: i32 = 200;

/// A single location fix from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Estimated error radius; lower is better.
    pub accuracy: f32,
    /// Fix time in milliseconds since the epoch.
    pub time_ms: i64,
    pub provider: Option<String>,
}

/// Decide whether `fix` should replace `best`.
pub fn is_better_fix(fix: &LocationFix, best: Option<&LocationFix>) -> bool {
    let Some(best) = best else {
        return true;
    };

    let time_delta = fix.time_ms - best.time_ms;
    if time_delta > SIGNIFICANT_TIME_DELTA_MS {
        return true;
    }
    if time_delta < -SIGNIFICANT_TIME_DELTA_MS {
        return false;
    }
    let is_newer = time_delta > 0;

    // Compared in whole meters; fractions truncate toward zero.
    let accuracy_delta = (fix.accuracy - best.accuracy) as i32;
    let is_less_accurate = accuracy_delta > 0;
    let is_more_accurate = accuracy_delta < 0;
    let is_significantly_less_accurate = accuracy_delta > SIGNIFICANT_ACCURACY_DELTA;
    let same_provider = fix.provider == best.provider;

    is_more_accurate
        || (is_newer && !is_less_accurate)
        || (is_newer && !is_significantly_less_accurate && same_provider)
}

/// Shared cell holding the best fix seen so far.
///
/// Providers update it from their own tasks while the controller reads it on
/// its telemetry tick.
#[derive(Debug, Clone, Default)]
pub struct LocationTracker {
    best: Arc<Mutex<Option<LocationFix>>>,
}

impl LocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a new fix; returns whether it was retained.
    pub fn update(&self, fix: LocationFix) -> bool {
        let mut best = self.best.lock();
        if !is_better_fix(&fix, best.as_ref()) {
            debug!(
                "Ignoring fix from {:?} (accuracy {})",
                fix.provider, fix.accuracy
            );
            return false;
        }

        debug!(
            "New best fix {:.6},{:.6} from {:?}",
            fix.latitude, fix.longitude, fix.provider
        );
        *best = Some(fix);
        true
    }

    /// Snapshot of the best fix.
    pub fn best(&self) -> Option<LocationFix> {
        self.best.lock().clone()
    }

    /// Latitude and longitude of the best fix, zero when there is none.
    pub fn coordinates(&self) -> (f64, f64) {
        self.best
            .lock()
            .as_ref()
            .map(|fix| (fix.latitude, fix.longitude))
            .unwrap_or((0.0, 0.0))
    }
}
