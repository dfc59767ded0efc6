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

//! BlueZ-facing components.
//!
//! Exports a GATT application and LE advertisement over D-Bus and tracks
//! the connected central through device property changes.

pub mod adapter;
pub mod advertisement;
pub mod ble_constants;
pub mod characteristic;
pub mod connection;
pub mod dbus;
pub mod device;
pub mod gatt_service;
pub mod monitor_feed;
pub mod peripheral;
pub mod properties;
pub mod transport;

pub use adapter::Adapter;
pub use advertisement::Advertisement;
pub use ble_constants::CharacteristicFlag;
pub use characteristic::{
    BooleanEncoding, CharValue, Characteristic, CharacteristicState, RequestOptions,
    SubscriptionId,
};
pub use connection::{ClientTracker, ConnectionMonitor, ConnectionObservers, ObserverId};
pub use dbus::DbusTransport;
pub use device::{Device, DeviceReader};
pub use gatt_service::GattService;
pub use peripheral::{Peripheral, PeripheralBuilder};
pub use transport::{BusTransport, PropertyChange, PropertyValue};
