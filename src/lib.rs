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

//! BLE GATT peripheral for Linux, driving BlueZ over D-Bus.
//!
//! ```no_run
//! use bluez_peripheral::bluetooth::{CharacteristicFlag, DbusTransport, Peripheral};
//! use bluez_peripheral::config::PeripheralConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let bus = DbusTransport::system().await?.into_shared();
//! let mut builder = Peripheral::setup(bus, PeripheralConfig::default()).await?;
//! let status = builder
//!     .characteristic(
//!         "00000001-94f3-4011-be53-6ac36bf22cf1",
//!         "status",
//!         &[CharacteristicFlag::Read, CharacteristicFlag::Notify],
//!     )
//!     .await?;
//! status.set_value("ready")?;
//! let peripheral = builder.start().await?;
//! peripheral.on_connection_change(|change| println!("connected: {}", change.connected));
//! # Ok(())
//! # }
//! ```

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod state;

pub use error::{Error, Result};
