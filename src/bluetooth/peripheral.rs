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

//! Peripheral orchestrator.
//!
//! Startup runs in a fixed order:
//!
//! 1. acquire the bus name, build the adapter, device and advertisement helpers
//!    and export the service ([`Peripheral::setup`]);
//! 2. application code adds characteristics ([`PeripheralBuilder::characteristic`]);
//! 3. the object tree is published, the application registered with BlueZ,
//!    advertising started and the connection monitor spawned
//!    ([`PeripheralBuilder::start`]).

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::adapter::Adapter;
use super::advertisement::Advertisement;
use super::ble_constants::{CharacteristicFlag, BLUEZ_SERVICE};
use super::characteristic::{Characteristic, CharacteristicOptions};
use super::connection::{ConnectionMonitor, ConnectionObservers, ObserverId};
use super::device::{Device, DeviceReader};
use super::gatt_service::GattService;
use super::monitor_feed::{self, GdbusDeviceReader};
use super::transport::{BusTransport, PropertyChangeStream};
use crate::config::{AdvertisingOrder, Ingestion, PeripheralConfig};
use crate::error::{Error, Result};
use crate::state::{Client, ConnectionChange, ConnectionStatus, PeripheralState};

struct Inner {
    bus: Arc<dyn BusTransport>,
    config: PeripheralConfig,
    adapter: Adapter,
    device: Device,
    service: GattService,
    advertisement: Advertisement,
    characteristics: Vec<Characteristic>,
    state: Arc<PeripheralState>,
    observers: Arc<ConnectionObservers>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    async fn handle_disconnect(&self, client: Client) {
        if self.config.restart_on_stale_notify
            && GattService::is_anyone_notifying(&self.characteristics)
        {
            info!(
                "{} left with notifications on, restarting service",
                client.device_path
            );
            self.service.restart_service(&self.characteristics).await;
        } else {
            GattService::clear_all_notifications(&self.characteristics).await;
        }
    }
}

/// Collects characteristics between setup and start.
pub struct PeripheralBuilder {
    bus: Arc<dyn BusTransport>,
    config: PeripheralConfig,
    adapter: Adapter,
    device: Device,
    service: GattService,
    advertisement: Advertisement,
    characteristics: Vec<Characteristic>,
    observers: Arc<ConnectionObservers>,
}

impl PeripheralBuilder {
    pub fn service_path(&self) -> &str {
        self.service.path()
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Export a characteristic below the service. Empty `flags` selects the
    /// defaults.
    pub async fn characteristic(
        &mut self,
        uuid: &str,
        node: &str,
        flags: &[CharacteristicFlag],
    ) -> Result<Characteristic> {
        if self.characteristics.iter().any(|c| c.node() == node) {
            return Err(Error::Export {
                path: format!("{}/{}", self.service.path(), node),
                reason: "characteristic node already in use".to_string(),
            });
        }

        let options = CharacteristicOptions {
            log_io: self.config.log_characteristics_io,
            boolean_encoding: self.config.boolean_encoding,
        };
        let characteristic = Characteristic::new(
            self.bus.clone(),
            self.service.path(),
            uuid,
            node,
            flags,
            options,
        )
        .await?;
        self.characteristics.push(characteristic.clone());
        Ok(characteristic)
    }

    /// Observe connection changes from the first event on.
    pub fn on_connection_change<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ConnectionChange) + Send + Sync + 'static,
    {
        self.observers.subscribe(Arc::new(observer))
    }

    /// Start with the configured ingestion strategy. In monitor-feed mode the
    /// device reads after a connect go through `gdbus call` as well.
    pub async fn start(self) -> Result<Peripheral> {
        match self.config.ingestion {
            Ingestion::Signals => {
                let changes = self.bus.subscribe_properties_changed("/org/bluez").await?;
                self.launch(changes, None).await
            }
            Ingestion::MonitorFeed => {
                let changes = monitor_feed::spawn_monitor()?;
                let reader = GdbusDeviceReader::new(self.config.bus_call_timeout());
                self.launch(changes, Some(Arc::new(reader))).await
            }
        }
    }

    /// Start, reading device property changes from `changes`. Device
    /// properties are read over the bus.
    pub async fn start_with(self, changes: PropertyChangeStream) -> Result<Peripheral> {
        self.launch(changes, None).await
    }

    async fn launch(
        self,
        changes: PropertyChangeStream,
        reader: Option<Arc<dyn DeviceReader>>,
    ) -> Result<Peripheral> {
        let PeripheralBuilder {
            bus,
            config,
            adapter,
            device,
            service,
            advertisement,
            characteristics,
            observers,
        } = self;

        service.publish_object_tree(&characteristics).await?;

        let advertise = config.primary_service;
        match config.advertising_order {
            AdvertisingOrder::AfterRegistration => {
                service.register_application().await;
                if advertise {
                    tokio::time::sleep(config.advertising_delay()).await;
                    advertisement.start_advertising().await;
                }
            }
            AdvertisingOrder::BeforeRegistration => {
                if advertise {
                    advertisement.start_advertising().await;
                    tokio::time::sleep(config.advertising_delay()).await;
                }
                service.register_application().await;
            }
        }

        let inner = Arc::new(Inner {
            bus,
            state: PeripheralState::new(),
            config,
            adapter,
            device,
            service,
            advertisement,
            characteristics,
            observers,
            monitor: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let reader = reader.unwrap_or_else(|| Arc::new(inner.device.clone()));
        let monitor = ConnectionMonitor::new(
            reader,
            inner.state.clone(),
            inner.observers.clone(),
            &inner.config.adapter_path,
        )
        .with_message_logging(inner.config.log_all_bus_messages)
        .with_disconnect_hook(Arc::new(move |client: &Client| {
            if let Some(inner) = weak.upgrade() {
                let client = client.clone();
                tokio::spawn(async move { inner.handle_disconnect(client).await });
            }
        }));
        *inner.monitor.lock() = Some(monitor.spawn(changes));

        info!(
            "Peripheral {} started with {} characteristic(s)",
            inner.config.service_name,
            inner.characteristics.len()
        );
        Ok(Peripheral { inner })
    }
}

/// A running BLE peripheral.
#[derive(Clone)]
pub struct Peripheral {
    inner: Arc<Inner>,
}

impl Peripheral {
    /// Acquire the bus name and export the service. Both are fatal on failure.
    pub async fn setup(
        bus: Arc<dyn BusTransport>,
        config: PeripheralConfig,
    ) -> Result<PeripheralBuilder> {
        config.validate()?;
        let timeout = config.bus_call_timeout();
        let service_path = config.service_path();

        bus.request_name(&config.service_name).await?;

        let adapter = Adapter::new(bus.clone(), &config.adapter_path, timeout);
        let device = Device::new(bus.clone(), timeout);

        if let Err(e) = adapter.pair_mode_on(false).await {
            warn!("Could not turn pairing off on {}: {}", config.adapter_path, e);
        }

        let service = GattService::new(
            bus.clone(),
            &service_path,
            &config.service_uuid,
            &config.adapter_path,
            timeout,
        )
        .await?;
        let advertisement = Advertisement::new(
            bus.clone(),
            &service_path,
            service.uuid(),
            &config.adapter_path,
            timeout,
        )
        .await?;

        info!(
            "Peripheral {} set up at {} against {}",
            config.service_name, service_path, BLUEZ_SERVICE
        );

        Ok(PeripheralBuilder {
            bus,
            config,
            adapter,
            device,
            service,
            advertisement,
            characteristics: Vec::new(),
            observers: ConnectionObservers::new(),
        })
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.inner.config
    }

    /// The tracked client as last derived from property changes.
    pub fn client(&self) -> Client {
        self.inner.state.get_client()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.get_status()
    }

    pub fn on_connection_change<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ConnectionChange) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe(Arc::new(observer))
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    pub fn characteristics(&self) -> &[Characteristic] {
        &self.inner.characteristics
    }

    pub fn characteristic(&self, node: &str) -> Option<&Characteristic> {
        self.inner.characteristics.iter().find(|c| c.node() == node)
    }

    pub fn adapter(&self) -> &Adapter {
        &self.inner.adapter
    }

    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    pub fn service(&self) -> &GattService {
        &self.inner.service
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.inner.advertisement
    }

    pub async fn pair_mode_on(&self, on: bool) -> Result<()> {
        self.inner.adapter.pair_mode_on(on).await
    }

    pub async fn start_advertising(&self) -> bool {
        self.inner.advertisement.start_advertising().await
    }

    pub async fn stop_advertising(&self) -> bool {
        self.inner.advertisement.stop_advertising().await
    }

    /// Clear notifications and register the application again.
    pub async fn restart_service(&self) -> bool {
        self.inner
            .service
            .restart_service(&self.inner.characteristics)
            .await
    }

    pub async fn clear_all_notifications(&self) {
        GattService::clear_all_notifications(&self.inner.characteristics).await;
    }

    pub fn is_anyone_notifying(&self) -> bool {
        GattService::is_anyone_notifying(&self.inner.characteristics)
    }

    /// Stop the monitor, advertising and the application registration.
    pub async fn stop(&self) {
        let monitor = self.inner.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.abort();
        }
        if self.inner.advertisement.is_registered() {
            self.stop_advertising().await;
        }
        let service = &self.inner.service;
        if service.is_registered().await && !service.unregister_application().await {
            error!("Failed to unregister {}", service.path());
        }
        info!("Peripheral {} stopped", self.inner.config.service_name);
    }

    /// Shared bus handle.
    pub fn bus(&self) -> &Arc<dyn BusTransport> {
        &self.inner.bus
    }
}
