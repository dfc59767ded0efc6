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

//! BLE peripheral daemon built from the configuration file.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bluez_peripheral::bluetooth::{CharValue, DbusTransport, Peripheral};
use bluez_peripheral::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bluez_peripheral=info".parse()?),
        )
        .init();

    info!("Starting bluez-peripheral v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded from {}", config.config_path.display());

    let bus = DbusTransport::system().await?.into_shared();
    let mut builder = Peripheral::setup(bus, config.peripheral.clone()).await?;

    if let Err(e) = builder.adapter().power_on(true).await {
        warn!("Could not power on adapter: {}", e);
    }
    if config.peripheral.log_all_bus_messages {
        builder.adapter().log_all_properties().await;
    }

    for entry in &config.characteristics {
        let flags = entry
            .parsed_flags()
            .with_context(|| format!("Bad flags for characteristic {}", entry.node))?;
        let characteristic = builder
            .characteristic(&entry.uuid, &entry.node, &flags)
            .await
            .with_context(|| format!("Failed to create characteristic {}", entry.node))?;
        if let Some(value) = &entry.value {
            let value = CharValue::try_from(value.clone())?;
            characteristic.set_value(value)?;
        }
        info!("Characteristic {} ({}) ready", entry.node, entry.uuid);
    }

    builder.on_connection_change(|change| {
        if change.connected {
            info!(
                "Client {} connected (paired: {})",
                change.client.display_name(),
                change.client.paired
            );
        } else {
            info!("Client {} disconnected", change.client.device_path);
        }
    });

    let peripheral = builder.start().await?;
    info!("Ready. Press Ctrl+C to exit.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    peripheral.stop().await;

    Ok(())
}
