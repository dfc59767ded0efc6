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

//! System bus transport seam.
//!
//! Every BlueZ-facing component talks to the bus through [`BusTransport`].
//! The production implementation lives in [`super::dbus`]; tests drive the
//! components with an in-memory implementation instead.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::advertisement::AdvertisementObject;
use super::ble_constants::iface;
use super::characteristic::{CharacteristicState, DescriptorObject};
use super::gatt_service::ServiceObject;
use crate::error::{Error, Result};

/// A property value as it crosses the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Str(String),
    ObjectPath(String),
    Bytes(Vec<u8>),
    StrArray(Vec<String>),
    U8(u8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    /// Anything this crate never inspects, kept in printable form.
    Other(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) | PropertyValue::ObjectPath(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::Str(s) | PropertyValue::ObjectPath(s) | PropertyValue::Other(s) => {
                f.write_str(s)
            }
            PropertyValue::Bytes(b) => write!(f, "[{}]", hex::encode(b)),
            PropertyValue::StrArray(v) => write!(f, "{:?}", v),
            PropertyValue::U8(n) => write!(f, "{}", n),
            PropertyValue::U16(n) => write!(f, "{}", n),
            PropertyValue::I16(n) => write!(f, "{}", n),
            PropertyValue::U32(n) => write!(f, "{}", n),
            PropertyValue::I32(n) => write!(f, "{}", n),
        }
    }
}

/// Property name to value.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Interface name to its properties.
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// Object path to its interfaces; the `GetManagedObjects` reply shape.
pub type ManagedObjects = BTreeMap<String, InterfaceMap>;

/// One `PropertiesChanged` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub path: String,
    pub interface: String,
    pub changed: Vec<(String, PropertyValue)>,
}

/// Objects this crate exports, one variant per BlueZ object kind.
#[derive(Clone)]
pub enum ExportedObject {
    Service(ServiceObject),
    Characteristic(Arc<CharacteristicState>),
    Descriptor(DescriptorObject),
    Advertisement(AdvertisementObject),
    /// `org.freedesktop.DBus.ObjectManager` answering with a fixed snapshot.
    ObjectManager(ManagedObjects),
}

impl ExportedObject {
    pub fn kind(&self) -> &'static str {
        match self {
            ExportedObject::Service(_) => "service",
            ExportedObject::Characteristic(_) => "characteristic",
            ExportedObject::Descriptor(_) => "descriptor",
            ExportedObject::Advertisement(_) => "advertisement",
            ExportedObject::ObjectManager(_) => "object manager",
        }
    }

    /// The bus interface the object is served under.
    pub fn interface(&self) -> &'static str {
        match self {
            ExportedObject::Service(_) => iface::GATT_SERVICE,
            ExportedObject::Characteristic(_) => iface::GATT_CHARACTERISTIC,
            ExportedObject::Descriptor(_) => iface::GATT_DESCRIPTOR,
            ExportedObject::Advertisement(_) => iface::LE_ADVERTISEMENT,
            ExportedObject::ObjectManager(_) => iface::OBJECT_MANAGER,
        }
    }
}

/// Arguments of the BlueZ manager calls this crate makes.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    /// `(o)`, used by the unregister calls.
    ObjectPath(String),
    /// `(o, a{sv})` with an empty options dictionary, used by the register calls.
    ObjectPathWithOptions(String),
}

/// Stream of property-change notifications.
pub type PropertyChangeStream = BoxStream<'static, PropertyChange>;

/// Primitives the peripheral needs from the system message bus.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Request a well-known bus name without queueing.
    async fn request_name(&self, name: &str) -> Result<()>;

    /// Export an object at `path`.
    async fn export(&self, path: &str, object: ExportedObject) -> Result<()>;

    /// Invoke a BlueZ method that returns nothing.
    async fn call_method(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: CallArgs,
    ) -> Result<()>;

    /// `org.freedesktop.DBus.Properties.Get` against BlueZ.
    async fn get_property(&self, path: &str, interface: &str, name: &str)
        -> Result<PropertyValue>;

    /// `org.freedesktop.DBus.Properties.GetAll` against BlueZ.
    async fn get_all_properties(&self, path: &str, interface: &str) -> Result<PropertyMap>;

    /// `org.freedesktop.DBus.Properties.Set` against BlueZ.
    async fn set_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<()>;

    /// Emit `PropertiesChanged` for one of our own exported objects.
    async fn emit_properties_changed(
        &self,
        path: &str,
        interface: &str,
        changed: Vec<(String, PropertyValue)>,
    ) -> Result<()>;

    /// Subscribe to BlueZ `PropertiesChanged` signals below `path_namespace`.
    async fn subscribe_properties_changed(
        &self,
        path_namespace: &str,
    ) -> Result<PropertyChangeStream>;
}

/// Run a bus call with an upper bound; expiry becomes [`Error::Timeout`].
pub async fn bounded<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}

/// Render a payload for I/O logging: text when it is UTF-8, hex otherwise.
pub fn describe_payload(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => hex::encode(bytes),
    }
}
