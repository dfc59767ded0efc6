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

//! Local adapter properties (`org.bluez.Adapter1`).

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::ble_constants::iface;
use super::properties::PropertyAccessor;
use super::transport::{BusTransport, PropertyMap, PropertyValue};
use crate::error::Result;

/// Controls the physical adapter.
#[derive(Clone)]
pub struct Adapter {
    path: String,
    properties: PropertyAccessor,
}

impl Adapter {
    pub fn new(bus: Arc<dyn BusTransport>, path: &str, timeout: Duration) -> Self {
        Self {
            path: path.to_string(),
            properties: PropertyAccessor::new(bus, iface::ADAPTER, timeout),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn get_property(&self, name: &str) -> Result<PropertyValue> {
        self.properties.get(&self.path, name).await
    }

    pub async fn set_boolean_property(&self, name: &str, value: bool) -> Result<()> {
        self.properties.set_bool(&self.path, name, value).await
    }

    /// Allow or refuse pairing. Pairing stays in this state until changed again.
    pub async fn pair_mode_on(&self, on: bool) -> Result<()> {
        info!("Setting pairable = {}", on);
        self.set_boolean_property("Pairable", on).await
    }

    /// Power the adapter on or off.
    pub async fn power_on(&self, on: bool) -> Result<()> {
        info!("Setting power = {}", on);
        self.set_boolean_property("Powered", on).await
    }

    pub async fn log_all_properties(&self) -> PropertyMap {
        self.properties.log_all(&self.path).await
    }
}
