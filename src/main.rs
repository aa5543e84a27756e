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

//! Pepper-2 droid service.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pepper2_droid::alert::RecipientList;
use pepper2_droid::bluetooth::{LinkSettings, PeerLink, RfcommEndpoint, TransportSession};
use pepper2_droid::config::Config;
use pepper2_droid::controller::{ControllerSettings, SessionController};
use pepper2_droid::photo::{count_existing, PhotoStreamer};
use pepper2_droid::platform::{create_platform, create_sensors};
use pepper2_droid::sensors::{LocationTracker, SensorFeeds};
use pepper2_droid::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("pepper2_droid=info".parse()?))
        .init();

    info!("Starting Pepper-2 droid v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded, data in {}", config.data_dir.display());

    let state = AppState::new();
    let platform = create_platform(&config);
    let recipients = RecipientList::open(&config.data_dir, &config.alerts.default_recipient)?;
    let photo_dir = config.photo_dir();
    let photo_count = count_existing(&photo_dir);
    info!("{} photo(s) already in {}", photo_count, photo_dir.display());

    let (running_tx, running_rx) = watch::channel(true);
    let (events_tx, events_rx) = mpsc::channel(64);
    let location = LocationTracker::new();
    let (feeds, accel_rx) = SensorFeeds::new(location.clone());
    let sensors = create_sensors(&config);
    let sensor_tasks = sensors.spawn(&feeds, &running_rx);

    // Bluetooth transport
    let endpoint = RfcommEndpoint::new(&config.bluetooth.device_name, config.bluetooth.channel).await?;
    let link = PeerLink::new();
    let settings = LinkSettings {
        read_interval: Duration::from_millis(config.bluetooth.read_interval_ms.max(1)),
        outbound_queue: config.bluetooth.outbound_queue,
    };
    let transport = TransportSession::new(
        endpoint,
        link.clone(),
        events_tx.clone(),
        settings,
        Duration::from_secs(config.bluetooth.listener_backoff_secs),
    );
    let transport_task = tokio::spawn(transport.run(running_rx.clone()));

    // Session controller
    let controller = SessionController::new(
        ControllerSettings::from_config(&config),
        platform,
        link,
        PhotoStreamer::new(photo_dir),
        recipients,
        events_tx,
    )
    .with_location(location)
    .with_state(state.clone())
    .with_photo_count(photo_count);
    let controller_task = tokio::spawn(controller.run(events_rx, accel_rx, running_rx));

    info!("Ready. Advertising as '{}'", config.bluetooth.device_name);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = running_tx.send(false);

    let tasks = [("transport", transport_task), ("controller", controller_task)]
        .into_iter()
        .chain(sensor_tasks);
    for (name, task) in tasks {
        if let Err(e) = task.await {
            error!("{} task failed: {}", name, e);
        }
    }
    drop(feeds);

    info!(
        "Pepper-2 droid stopped ({}, {} photos)",
        state.get_status().as_str(),
        state.get_photo_count()
    );
    Ok(())
}
