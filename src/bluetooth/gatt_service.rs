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

//! GATT service exporter.
//!
//! Exports the primary service object, answers BlueZ's `GetManagedObjects`
//! with a snapshot of the service tree and drives application registration
//! with `org.bluez.GattManager1`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::ble_constants::iface;
use super::characteristic::Characteristic;
use super::transport::{
    bounded, BusTransport, CallArgs, ExportedObject, InterfaceMap, ManagedObjects, PropertyMap,
    PropertyValue,
};
use crate::error::{Error, Result};

/// `org.bluez.GattService1` object.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceObject {
    pub uuid: String,
    pub primary: bool,
}

impl ServiceObject {
    pub fn properties(&self) -> PropertyMap {
        PropertyMap::from([
            ("UUID".to_string(), PropertyValue::Str(self.uuid.clone())),
            ("Primary".to_string(), PropertyValue::Bool(self.primary)),
        ])
    }
}

/// The primary service of the peripheral.
pub struct GattService {
    bus: Arc<dyn BusTransport>,
    path: String,
    uuid: String,
    adapter_path: String,
    timeout: Duration,
    registered: Mutex<bool>,
}

impl GattService {
    /// Export the primary service object at `path`.
    pub async fn new(
        bus: Arc<dyn BusTransport>,
        path: &str,
        uuid: &str,
        adapter_path: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let uuid = Uuid::parse_str(uuid)
            .map_err(|_| Error::InvalidUuid(uuid.to_string()))?
            .hyphenated()
            .to_string();

        info!("Exporting D-Bus interface for {} Gatt service", path);
        bus.export(
            path,
            ExportedObject::Service(ServiceObject {
                uuid: uuid.clone(),
                primary: true,
            }),
        )
        .await?;

        Ok(Self {
            bus,
            path: path.to_string(),
            uuid,
            adapter_path: adapter_path.to_string(),
            timeout,
            registered: Mutex::new(false),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub async fn is_registered(&self) -> bool {
        *self.registered.lock().await
    }

    /// Build the object-manager description of the service tree as it is now.
    pub fn snapshot(&self, characteristics: &[Characteristic]) -> ManagedObjects {
        let mut objects = ManagedObjects::new();
        let service = ServiceObject {
            uuid: self.uuid.clone(),
            primary: true,
        };
        objects.insert(
            self.path.clone(),
            InterfaceMap::from([(iface::GATT_SERVICE.to_string(), service.properties())]),
        );

        for characteristic in characteristics {
            let state = characteristic.state();
            objects.insert(
                state.path().to_string(),
                InterfaceMap::from([(
                    iface::GATT_CHARACTERISTIC.to_string(),
                    state.properties(),
                )]),
            );
            let descriptor = state.descriptor();
            objects.insert(
                descriptor.path.clone(),
                InterfaceMap::from([(
                    iface::GATT_DESCRIPTOR.to_string(),
                    descriptor.properties(),
                )]),
            );
        }
        objects
    }

    /// Export the object manager answering `GetManagedObjects` with a
    /// snapshot taken now. Later state changes are not reflected.
    pub async fn publish_object_tree(
        &self,
        characteristics: &[Characteristic],
    ) -> Result<ManagedObjects> {
        let objects = self.snapshot(characteristics);
        self.bus
            .export(&self.path, ExportedObject::ObjectManager(objects.clone()))
            .await?;
        info!(
            "Added objectManager interface to Gatt Service ({} objects)",
            objects.len()
        );
        Ok(objects)
    }

    /// Register the application with BlueZ. Failures are logged; returns
    /// whether the application is now registered.
    pub async fn register_application(&self) -> bool {
        let mut registered = self.registered.lock().await;
        *registered = self.call_manager("RegisterApplication").await;
        *registered
    }

    /// Unregister the application. Returns whether the call succeeded.
    pub async fn unregister_application(&self) -> bool {
        let mut registered = self.registered.lock().await;
        let ok = self.call_manager("UnregisterApplication").await;
        if ok {
            *registered = false;
        }
        ok
    }

    async fn call_manager(&self, method: &str) -> bool {
        let args = if method == "RegisterApplication" {
            CallArgs::ObjectPathWithOptions(self.path.clone())
        } else {
            CallArgs::ObjectPath(self.path.clone())
        };
        info!("Calling {} for {} with org.bluez", method, self.path);
        let result = bounded(
            self.timeout,
            method,
            self.bus
                .call_method(&self.adapter_path, iface::GATT_MANAGER, method, args),
        )
        .await;

        match result {
            Ok(()) => true,
            Err(e) if e.is_no_reply() => {
                debug!("{} on {} got no reply; treating as done", method, self.adapter_path);
                true
            }
            Err(e) => {
                error!("Error while calling {} on {}: {}", method, self.adapter_path, e);
                false
            }
        }
    }

    /// Clear `Notifying` on every characteristic.
    pub async fn clear_all_notifications(characteristics: &[Characteristic]) {
        for characteristic in characteristics {
            if let Err(e) = characteristic.clear_notify().await {
                warn!("Failed to clear notify for {}: {}", characteristic.node(), e);
            }
        }
    }

    pub fn is_anyone_notifying(characteristics: &[Characteristic]) -> bool {
        characteristics.iter().any(|c| c.is_notifying())
    }

    /// Clear notifications, then unregister and register the application again.
    pub async fn restart_service(&self, characteristics: &[Characteristic]) -> bool {
        info!("Restarting Gatt service {}", self.path);
        Self::clear_all_notifications(characteristics).await;

        let mut registered = self.registered.lock().await;
        if !self.call_manager("UnregisterApplication").await {
            warn!("Unregister failed during restart of {}; registering anyway", self.path);
        }
        *registered = self.call_manager("RegisterApplication").await;
        *registered
    }
}
