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

//! Text alert composition and recipient storage.

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::platform::Messenger;
use crate::sensors::Orientation;

/// Longest body a single text message may carry.
pub const MAX_TEXT_LEN: usize = 160;

/// A registered alert recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub number: String,
    pub added_at: DateTime<Local>,
}

/// Ordered, append-only list of alert recipients.
pub struct RecipientList {
    path: Option<PathBuf>,
    recipients: Vec<Recipient>,
}

impl RecipientList {
    /// In-memory list seeded with `default_number`.
    pub fn new(default_number: &str) -> Self {
        Self {
            path: None,
            recipients: vec![Recipient {
                number: default_number.to_string(),
                added_at: Local::now(),
            }],
        }
    }

    /// Open the persisted list in `data_dir`, seeding it if empty.
    pub fn open(data_dir: &Path, default_number: &str) -> Result<Self> {
        let path = data_dir.join("recipients.json");
        let recipients: Vec<Recipient> = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };

        let mut list = Self {
            path: Some(path),
            recipients,
        };
        if list.recipients.is_empty() {
            list.recipients.push(Recipient {
                number: default_number.to_string(),
                added_at: Local::now(),
            });
            list.save()?;
        }

        info!("{} alert recipient(s) loaded", list.len());
        Ok(list)
    }

    /// Append a number. Blank and duplicate numbers are ignored.
    pub fn add(&mut self, number: &str) -> Result<bool> {
        let number = number.trim();
        if number.is_empty() {
            warn!("Ignoring empty phone number");
            return Ok(false);
        }
        if self.recipients.iter().any(|r| r.number == number) {
            info!("Recipient {} already registered", number);
            return Ok(false);
        }

        self.recipients.push(Recipient {
            number: number.to_string(),
            added_at: Local::now(),
        });
        info!("Added alert recipient {}", number);
        self.save()?;
        Ok(true)
    }

    pub fn numbers(&self) -> impl Iterator<Item = &str> {
        self.recipients.iter().map(|r| r.number.as_str())
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            let content = serde_json::to_string_pretty(&self.recipients)?;
            std::fs::write(path, content)?;
        }
        Ok(())
    }
}

/// State reported in an alert.
#[derive(Debug, Clone)]
pub struct AlertSnapshot {
    pub battery: u8,
    pub radio: i8,
    pub photo_count: u16,
    pub orientation: Orientation,
    pub duration: Duration,
    pub location: Option<(f64, f64)>,
}

/// Build the status and location bodies.
pub fn compose(snapshot: &AlertSnapshot) -> [String; 2] {
    let status = format!(
        "PEPPER-2 bat {}% radio {} photos {} {} {}s",
        snapshot.battery,
        snapshot.radio,
        snapshot.photo_count,
        snapshot.orientation.as_str(),
        snapshot.duration.as_secs()
    );

    let location = match snapshot.location {
        Some((lat, lon)) => format!(
            "PEPPER-2 at http://maps.google.com/maps?q={:.6},{:.6}",
            lat, lon
        ),
        None => "PEPPER-2 location unknown".to_string(),
    };

    [status, location]
}

/// Split a body into pieces of at most [`MAX_TEXT_LEN`] characters.
pub fn segment(body: &str) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(MAX_TEXT_LEN)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Send every body to every recipient. Returns the number of texts sent.
pub fn dispatch(messenger: &dyn Messenger, recipients: &RecipientList, bodies: &[String]) -> usize {
    let mut sent = 0;
    for body in bodies {
        for part in messenger.segment(body) {
            for number in recipients.numbers() {
                match messenger.send(number, &part) {
                    Ok(()) => sent += 1,
                    Err(e) => error!("Failed to text {}: {}", number, e),
                }
            }
        }
    }
    info!("Alert dispatched: {} text(s) to {} recipient(s)", sent, recipients.len());
    sent
}
