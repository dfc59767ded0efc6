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

//! Connected-client state.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// Connection status of the tracked client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    /// Connected, `Paired` and `Name` not read yet.
    Connected,
    /// Connected with `Paired` and `Name` resolved (or defaulted).
    Verified,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Verified => "Connected (verified)",
        }
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self, ConnectionStatus::Disconnected)
    }
}

/// The single remote central this peripheral tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Client {
    /// BlueZ object path of the remote device. Kept after a disconnect.
    pub device_path: String,
    pub connected: bool,
    pub paired: bool,
    /// Empty when unknown.
    pub name: String,
}

impl Client {
    /// Name for display: the device name, or its path when the name is unknown.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.device_path
        } else {
            &self.name
        }
    }
}

/// Emitted to application code whenever the client record changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionChange {
    pub connected: bool,
    pub client: Client,
    pub status: ConnectionStatus,
    pub at: DateTime<Local>,
}

impl ConnectionChange {
    pub fn new(client: Client, status: ConnectionStatus) -> Self {
        Self {
            connected: client.connected,
            client,
            status,
            at: Local::now(),
        }
    }
}

/// Shared, read-mostly view of the client record. Only the connection
/// monitor writes it.
#[derive(Debug, Default)]
pub struct PeripheralState {
    client: RwLock<Client>,
    status: RwLock<ConnectionStatus>,
}

impl PeripheralState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_client(&self, client: Client, status: ConnectionStatus) {
        *self.client.write() = client;
        *self.status.write() = status;
    }

    pub fn get_client(&self) -> Client {
        self.client.read().clone()
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.client.read().connected
    }
}
