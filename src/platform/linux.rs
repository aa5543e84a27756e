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

//! Linux backends: sysfs battery, shell-command camera, file outbox.

use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use std::io::Write;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Battery, Camera, CellRadio, Messenger};
use crate::photo::thumbnail_path;

/// Reads charge from a `/sys/class/power_supply` entry.
pub struct SysfsBattery {
    path: PathBuf,
}

impl SysfsBattery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_value(&self, name: &str) -> Result<u32> {
        let file = self.path.join(name);
        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        content
            .trim()
            .parse()
            .with_context(|| format!("parsing {}", file.display()))
    }
}

impl Battery for SysfsBattery {
    fn read(&self) -> Result<(u32, u32)> {
        if let Ok(capacity) = self.read_value("capacity") {
            return Ok((capacity, 100));
        }
        for (now, full) in [("charge_now", "charge_full"), ("energy_now", "energy_full")] {
            if let (Ok(level), Ok(scale)) = (self.read_value(now), self.read_value(full)) {
                return Ok((level, scale));
            }
        }
        Err(anyhow!("no battery readings under {}", self.path.display()))
    }
}

/// Captures photos by running a shell command.
///
/// `{path}` in the command is replaced with the thumbnail path for the photo
/// being taken.
pub struct CommandCamera {
    dir: PathBuf,
    command: Option<String>,
}

impl CommandCamera {
    pub fn new(dir: impl Into<PathBuf>, command: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            command,
        }
    }
}

impl Camera for CommandCamera {
    fn backend_name(&self) -> &'static str {
        if self.command.is_some() {
            "shell command"
        } else {
            "disabled"
        }
    }

    fn is_available(&self) -> bool {
        self.command.is_some()
    }

    fn take_photo(&self, index: u8) -> BoxFuture<'static, Result<u16>> {
        let path = thumbnail_path(&self.dir, index);
        let command = self.command.clone();

        Box::pin(async move {
            let command = command.ok_or_else(|| anyhow!("no capture command configured"))?;
            let command = command.replace("{path}", &path.to_string_lossy());
            debug!("Running capture: {}", command);

            let output = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .output()
                .await
                .map_err(|e| anyhow!("Failed to run capture command: {}", e))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(anyhow!("capture command failed: {}", stderr.trim()));
            }
            if !path.exists() {
                return Err(anyhow!("capture produced no file at {}", path.display()));
            }

            info!("Captured photo {} to {}", index, path.display());
            Ok(u16::from(index) + 1)
        })
    }
}

/// Stand-in for hardware without a cellular modem.
pub struct NoCellRadio;

impl CellRadio for NoCellRadio {
    fn level(&self) -> i8 {
        -1
    }
}

/// Appends outgoing texts to a file for a gateway to pick up.
pub struct LogMessenger {
    outbox: PathBuf,
}

impl LogMessenger {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }
}

impl Messenger for LogMessenger {
    fn send(&self, recipient: &str, body: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outbox)
            .with_context(|| format!("opening outbox {}", self.outbox.display()))?;
        writeln!(
            file,
            "{}\t{}\t{}",
            chrono::Local::now().to_rfc3339(),
            recipient,
            body
        )?;
        info!("Queued text to {}: {}", recipient, body);
        Ok(())
    }
}
