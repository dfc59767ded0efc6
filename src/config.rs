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

//! Configuration module.
//!
//! Handles loading and saving peripheral settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::ble_constants::{CharacteristicFlag, DEFAULT_ADAPTER_PATH};
use crate::bluetooth::characteristic::BooleanEncoding;
use crate::error::Error;

const APP_DIR: &str = "bluez-peripheral";

/// When advertising starts relative to application registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdvertisingOrder {
    #[default]
    AfterRegistration,
    BeforeRegistration,
}

/// Where device property changes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ingestion {
    /// `PropertiesChanged` signal subscription.
    #[default]
    Signals,
    /// `gdbus monitor` output, with device reads through `gdbus call`.
    MonitorFeed,
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// File the configuration was read from.
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub peripheral: PeripheralConfig,

    #[serde(default)]
    pub characteristics: Vec<CharacteristicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Well-known bus name; also gives the service object path.
    pub service_name: String,
    pub service_uuid: String,
    pub adapter_path: String,
    /// Advertise the service.
    pub primary_service: bool,
    pub advertising_order: AdvertisingOrder,
    pub advertising_delay_ms: u64,
    pub bus_call_timeout_ms: u64,
    /// Re-register the application when a client leaves with notifications on.
    pub restart_on_stale_notify: bool,
    pub ingestion: Ingestion,
    pub log_characteristics_io: bool,
    pub log_all_bus_messages: bool,
    pub boolean_encoding: BooleanEncoding,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            service_name: "com.netConfig".to_string(),
            service_uuid: "27b5244f-94f3-4011-be53-6ac36bf22cf1".to_string(),
            adapter_path: DEFAULT_ADAPTER_PATH.to_string(),
            primary_service: true,
            advertising_order: AdvertisingOrder::AfterRegistration,
            advertising_delay_ms: 0,
            bus_call_timeout_ms: 5000,
            restart_on_stale_notify: true,
            ingestion: Ingestion::Signals,
            log_characteristics_io: false,
            log_all_bus_messages: false,
            boolean_encoding: BooleanEncoding::Standard,
        }
    }
}

impl PeripheralConfig {
    /// `com.netConfig` becomes `/com/netConfig`.
    pub fn service_path(&self) -> String {
        format!("/{}", self.service_name.replace('.', "/"))
    }

    pub fn bus_call_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_call_timeout_ms)
    }

    pub fn advertising_delay(&self) -> Duration {
        Duration::from_millis(self.advertising_delay_ms)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let valid_name = !self.service_name.is_empty()
            && self.service_name.split('.').count() >= 2
            && self.service_name.split('.').all(|part| {
                !part.is_empty()
                    && !part.starts_with(|c: char| c.is_ascii_digit())
                    && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            });
        if !valid_name {
            return Err(Error::Config(format!(
                "invalid service name '{}'",
                self.service_name
            )));
        }
        uuid::Uuid::parse_str(&self.service_uuid)
            .map_err(|_| Error::InvalidUuid(self.service_uuid.clone()))?;
        if self.bus_call_timeout_ms == 0 {
            return Err(Error::Config("bus_call_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// One characteristic to create at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicConfig {
    pub uuid: String,
    pub node: String,
    #[serde(default)]
    pub flags: Vec<String>,
    /// Initial value: a string, a boolean or an array of bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<toml::Value>,
}

impl CharacteristicConfig {
    pub fn parsed_flags(&self) -> Result<Vec<CharacteristicFlag>, Error> {
        CharacteristicFlag::parse_all(&self.flags)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            peripheral: PeripheralConfig::default(),
            characteristics: vec![
                CharacteristicConfig {
                    uuid: "00000001-94f3-4011-be53-6ac36bf22cf1".to_string(),
                    node: "status".to_string(),
                    flags: vec!["read".to_string(), "notify".to_string()],
                    value: Some(toml::Value::String("ready".to_string())),
                },
                CharacteristicConfig {
                    uuid: "00000002-94f3-4011-be53-6ac36bf22cf1".to_string(),
                    node: "control".to_string(),
                    flags: vec![
                        "read".to_string(),
                        "write-without-response".to_string(),
                    ],
                    value: None,
                },
            ],
        }
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path())
    }

    /// Load from `path`, writing the defaults there when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };
        config.config_path = path.to_path_buf();
        config.peripheral.validate()?;
        Ok(config)
    }

    /// Save configuration to the file it was loaded from.
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.config_path)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
