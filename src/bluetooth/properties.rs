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

//! `org.freedesktop.DBus.Properties` access for one BlueZ interface.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::transport::{bounded, BusTransport, PropertyMap, PropertyValue};
use crate::error::{Error, Result};

/// Reads and writes properties of one interface on BlueZ objects.
#[derive(Clone)]
pub struct PropertyAccessor {
    bus: Arc<dyn BusTransport>,
    interface: &'static str,
    timeout: Duration,
}

impl PropertyAccessor {
    pub fn new(bus: Arc<dyn BusTransport>, interface: &'static str, timeout: Duration) -> Self {
        Self {
            bus,
            interface,
            timeout,
        }
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    pub async fn get(&self, path: &str, name: &str) -> Result<PropertyValue> {
        let operation = format!("Get {} on {}", name, path);
        bounded(
            self.timeout,
            &operation,
            self.bus.get_property(path, self.interface, name),
        )
        .await
        .map_err(|e| Error::PropertyLookup {
            property: name.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })
        .map(|value| {
            debug!("{} = {}", name, value);
            value
        })
    }

    pub async fn get_all(&self, path: &str) -> Result<PropertyMap> {
        let operation = format!("GetAll on {}", path);
        bounded(
            self.timeout,
            &operation,
            self.bus.get_all_properties(path, self.interface),
        )
        .await
        .map_err(|e| Error::PropertyLookup {
            property: "*".to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn set_bool(&self, path: &str, name: &str, value: bool) -> Result<()> {
        let operation = format!("Set {} on {}", name, path);
        bounded(
            self.timeout,
            &operation,
            self.bus
                .set_property(path, self.interface, name, PropertyValue::Bool(value)),
        )
        .await
        .map_err(|e| Error::PropertySet {
            property: name.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        debug!("{} = {} on {}", name, value, path);
        Ok(())
    }

    /// Log every property of the interface at `path`. Diagnostic only.
    pub async fn log_all(&self, path: &str) -> PropertyMap {
        info!("Logging all {} properties for {}", self.interface, path);
        match self.get_all(path).await {
            Ok(properties) => {
                for (name, value) in &properties {
                    info!("\t{} : {}", name, value);
                }
                properties
            }
            Err(e) => {
                error!("Error with logAllProperties for {}: {}", path, e);
                PropertyMap::new()
            }
        }
    }
}
