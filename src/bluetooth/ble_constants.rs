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

//! BlueZ D-Bus names, well-known paths and GATT limits.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// BlueZ bus name.
pub const BLUEZ_SERVICE: &str = "org.bluez";

/// Interface names.
pub mod iface {
    pub const ADAPTER: &str = "org.bluez.Adapter1";
    pub const DEVICE: &str = "org.bluez.Device1";
    pub const GATT_MANAGER: &str = "org.bluez.GattManager1";
    pub const GATT_SERVICE: &str = "org.bluez.GattService1";
    pub const GATT_CHARACTERISTIC: &str = "org.bluez.GattCharacteristic1";
    pub const GATT_DESCRIPTOR: &str = "org.bluez.GattDescriptor1";
    pub const LE_ADVERTISING_MANAGER: &str = "org.bluez.LEAdvertisingManager1";
    pub const LE_ADVERTISEMENT: &str = "org.bluez.LEAdvertisement1";
    pub const PROPERTIES: &str = "org.freedesktop.DBus.Properties";
    pub const OBJECT_MANAGER: &str = "org.freedesktop.DBus.ObjectManager";
}

/// Default local adapter object path.
pub const DEFAULT_ADAPTER_PATH: &str = "/org/bluez/hci0";

/// Node name prefix of remote device objects below an adapter.
pub const DEVICE_NODE_PREFIX: &str = "dev_";

/// Characteristic User Description descriptor UUID, exactly as exported.
pub const USER_DESCRIPTION_UUID: &str = "2901-0000-1000-8000-00805f9b34fb";

/// Node name of the user description descriptor below its characteristic.
pub const USER_DESCRIPTION_NODE: &str = "userDescription";

/// Node name of the advertisement below the service path.
pub const ADVERTISEMENT_NODE: &str = "advertisement";

/// Advertisement type exported to the advertising manager.
pub const ADVERTISEMENT_TYPE: &str = "peripheral";

/// Largest characteristic value accepted locally (ATT payload ceiling).
pub const MAX_VALUE_LEN: usize = 512;

/// Value a characteristic holds before anything sets it.
pub const DEFAULT_VALUE: &[u8] = b"Value not set";

/// Device properties read after a connect, in the order they must be requested.
pub const VERIFY_PROPERTIES: [&str; 3] = ["Paired", "Name", "Connected"];

/// Build the object path of a remote device from its MAC address.
pub fn device_path(adapter_path: &str, address: &str) -> String {
    format!("{}{}", device_prefix(adapter_path), address.replace(':', "_"))
}

/// Path prefix shared by every remote device object under `adapter_path`.
pub fn device_prefix(adapter_path: &str) -> String {
    format!("{}/{}", adapter_path, DEVICE_NODE_PREFIX)
}

/// Access-control flags from the BlueZ GATT API flag vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicFlag {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
    ReliableWrite,
    WritableAuxiliaries,
    EncryptRead,
    EncryptWrite,
    EncryptNotify,
    EncryptIndicate,
    EncryptAuthenticatedRead,
    EncryptAuthenticatedWrite,
    EncryptAuthenticatedNotify,
    EncryptAuthenticatedIndicate,
    SecureRead,
    SecureWrite,
    SecureNotify,
    SecureIndicate,
    Authorize,
}

impl CharacteristicFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CharacteristicFlag::Broadcast => "broadcast",
            CharacteristicFlag::Read => "read",
            CharacteristicFlag::WriteWithoutResponse => "write-without-response",
            CharacteristicFlag::Write => "write",
            CharacteristicFlag::Notify => "notify",
            CharacteristicFlag::Indicate => "indicate",
            CharacteristicFlag::AuthenticatedSignedWrites => "authenticated-signed-writes",
            CharacteristicFlag::ExtendedProperties => "extended-properties",
            CharacteristicFlag::ReliableWrite => "reliable-write",
            CharacteristicFlag::WritableAuxiliaries => "writable-auxiliaries",
            CharacteristicFlag::EncryptRead => "encrypt-read",
            CharacteristicFlag::EncryptWrite => "encrypt-write",
            CharacteristicFlag::EncryptNotify => "encrypt-notify",
            CharacteristicFlag::EncryptIndicate => "encrypt-indicate",
            CharacteristicFlag::EncryptAuthenticatedRead => "encrypt-authenticated-read",
            CharacteristicFlag::EncryptAuthenticatedWrite => "encrypt-authenticated-write",
            CharacteristicFlag::EncryptAuthenticatedNotify => "encrypt-authenticated-notify",
            CharacteristicFlag::EncryptAuthenticatedIndicate => "encrypt-authenticated-indicate",
            CharacteristicFlag::SecureRead => "secure-read",
            CharacteristicFlag::SecureWrite => "secure-write",
            CharacteristicFlag::SecureNotify => "secure-notify",
            CharacteristicFlag::SecureIndicate => "secure-indicate",
            CharacteristicFlag::Authorize => "authorize",
        }
    }

    /// Flags used when a characteristic is created without any.
    pub fn defaults() -> Vec<CharacteristicFlag> {
        vec![CharacteristicFlag::EncryptRead, CharacteristicFlag::EncryptWrite]
    }

    /// Parse a list of flag names, rejecting anything outside the vocabulary.
    pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Result<Vec<CharacteristicFlag>, Error> {
        names.iter().map(|name| name.as_ref().parse()).collect()
    }
}

impl FromStr for CharacteristicFlag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let flag = match s {
            "broadcast" => CharacteristicFlag::Broadcast,
            "read" => CharacteristicFlag::Read,
            "write-without-response" => CharacteristicFlag::WriteWithoutResponse,
            "write" => CharacteristicFlag::Write,
            "notify" => CharacteristicFlag::Notify,
            "indicate" => CharacteristicFlag::Indicate,
            "authenticated-signed-writes" => CharacteristicFlag::AuthenticatedSignedWrites,
            "extended-properties" => CharacteristicFlag::ExtendedProperties,
            "reliable-write" => CharacteristicFlag::ReliableWrite,
            "writable-auxiliaries" => CharacteristicFlag::WritableAuxiliaries,
            "encrypt-read" => CharacteristicFlag::EncryptRead,
            "encrypt-write" => CharacteristicFlag::EncryptWrite,
            "encrypt-notify" => CharacteristicFlag::EncryptNotify,
            "encrypt-indicate" => CharacteristicFlag::EncryptIndicate,
            "encrypt-authenticated-read" => CharacteristicFlag::EncryptAuthenticatedRead,
            "encrypt-authenticated-write" => CharacteristicFlag::EncryptAuthenticatedWrite,
            "encrypt-authenticated-notify" => CharacteristicFlag::EncryptAuthenticatedNotify,
            "encrypt-authenticated-indicate" => CharacteristicFlag::EncryptAuthenticatedIndicate,
            "secure-read" => CharacteristicFlag::SecureRead,
            "secure-write" => CharacteristicFlag::SecureWrite,
            "secure-notify" => CharacteristicFlag::SecureNotify,
            "secure-indicate" => CharacteristicFlag::SecureIndicate,
            "authorize" => CharacteristicFlag::Authorize,
            other => return Err(Error::UnknownFlag(other.to_string())),
        };
        Ok(flag)
    }
}

impl fmt::Display for CharacteristicFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
