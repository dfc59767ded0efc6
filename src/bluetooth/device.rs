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

//! Remote device properties (`org.bluez.Device1`).
//!
//! BlueZ creates a device object once a central connects; its path is
//! `/org/bluez/hci0/dev_<MAC with underscores>`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::ble_constants::iface;
use super::properties::PropertyAccessor;
use super::transport::{BusTransport, PropertyMap, PropertyValue};
use crate::error::Result;

/// Property reads the connection monitor needs from a remote device.
#[async_trait]
pub trait DeviceReader: Send + Sync {
    async fn get_property(&self, device_path: &str, name: &str) -> Result<PropertyValue>;
}

/// Reads and sets properties of remote devices.
#[derive(Clone)]
pub struct Device {
    properties: PropertyAccessor,
}

impl Device {
    pub fn new(bus: Arc<dyn BusTransport>, timeout: Duration) -> Self {
        Self {
            properties: PropertyAccessor::new(bus, iface::DEVICE, timeout),
        }
    }

    pub async fn get_property(&self, device_path: &str, name: &str) -> Result<PropertyValue> {
        self.properties.get(device_path, name).await
    }

    /// Set a boolean property such as `Trusted`.
    pub async fn set_boolean_property(
        &self,
        device_path: &str,
        name: &str,
        value: bool,
    ) -> Result<()> {
        self.properties.set_bool(device_path, name, value).await
    }

    pub async fn log_all_properties(&self, device_path: &str) -> PropertyMap {
        self.properties.log_all(device_path).await
    }
}

#[async_trait]
impl DeviceReader for Device {
    async fn get_property(&self, device_path: &str, name: &str) -> Result<PropertyValue> {
        Device::get_property(self, device_path, name).await
    }
}
