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

//! LE advertisement carrying the service UUID.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::ble_constants::{iface, ADVERTISEMENT_NODE, ADVERTISEMENT_TYPE};
use super::transport::{bounded, BusTransport, CallArgs, ExportedObject, PropertyMap, PropertyValue};
use crate::error::Result;

/// `org.bluez.LEAdvertisement1` object.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertisementObject {
    pub kind: String,
    pub service_uuids: Vec<String>,
}

impl AdvertisementObject {
    /// BlueZ dropped the advertisement on its own.
    pub fn release(&self) {
        info!("Advertising API has removed advertisement");
    }

    pub fn properties(&self) -> PropertyMap {
        PropertyMap::from([
            ("Type".to_string(), PropertyValue::Str(self.kind.clone())),
            (
                "ServiceUUIDs".to_string(),
                PropertyValue::StrArray(self.service_uuids.clone()),
            ),
        ])
    }
}

/// Registers and unregisters the advertisement with the advertising manager.
pub struct Advertisement {
    bus: Arc<dyn BusTransport>,
    path: String,
    adapter_path: String,
    timeout: Duration,
    registered: Mutex<bool>,
}

impl Advertisement {
    /// Export the advertisement below `service_path`.
    pub async fn new(
        bus: Arc<dyn BusTransport>,
        service_path: &str,
        service_uuid: &str,
        adapter_path: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let path = format!("{}/{}", service_path, ADVERTISEMENT_NODE);
        info!("Exporting D-Bus interface for BLE advertising");
        bus.export(
            &path,
            ExportedObject::Advertisement(AdvertisementObject {
                kind: ADVERTISEMENT_TYPE.to_string(),
                service_uuids: vec![service_uuid.to_string()],
            }),
        )
        .await?;

        Ok(Self {
            bus,
            path,
            adapter_path: adapter_path.to_string(),
            timeout,
            registered: Mutex::new(false),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_registered(&self) -> bool {
        *self.registered.lock()
    }

    /// Start advertising. Failures are logged and leave the peripheral unadvertised.
    pub async fn start_advertising(&self) -> bool {
        let result = bounded(
            self.timeout,
            "RegisterAdvertisement",
            self.bus.call_method(
                &self.adapter_path,
                iface::LE_ADVERTISING_MANAGER,
                "RegisterAdvertisement",
                CallArgs::ObjectPathWithOptions(self.path.clone()),
            ),
        )
        .await;

        match result {
            Ok(()) => {
                info!("Advertising primary service and waiting for Bluetooth LE connections...");
                *self.registered.lock() = true;
                true
            }
            Err(e) => {
                error!(
                    "Error while calling RegisterAdvertisement for {} on {}: {}",
                    self.path, self.adapter_path, e
                );
                false
            }
        }
    }

    /// Stop advertising. Failures are logged.
    pub async fn stop_advertising(&self) -> bool {
        let result = bounded(
            self.timeout,
            "UnregisterAdvertisement",
            self.bus.call_method(
                &self.adapter_path,
                iface::LE_ADVERTISING_MANAGER,
                "UnregisterAdvertisement",
                CallArgs::ObjectPath(self.path.clone()),
            ),
        )
        .await;

        match result {
            Ok(()) => {
                info!("Stopped advertising primary service");
                *self.registered.lock() = false;
                true
            }
            Err(e) => {
                error!(
                    "Error while calling UnregisterAdvertisement for {} on {}: {}",
                    self.path, self.adapter_path, e
                );
                false
            }
        }
    }
}
