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

//! GATT characteristic state machine and its user description descriptor.
//!
//! A characteristic holds a value of at most [`MAX_VALUE_LEN`] bytes. BlueZ
//! calls `ReadValue`/`WriteValue`/`StartNotify`/`StopNotify` on the exported
//! object; application code observes those calls through `ReadValue` and
//! `WriteValue` observers and pushes updates with [`Characteristic::notify`].
//!
//! Reads carry an offset. A remote stack reading a value longer than one ATT
//! transfer issues successive reads with increasing offsets, so the read
//! observers only run for the offset-zero read and continuation reads return
//! the next slice of the value already set.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::ble_constants::{
    iface, CharacteristicFlag, DEFAULT_VALUE, MAX_VALUE_LEN, USER_DESCRIPTION_NODE,
    USER_DESCRIPTION_UUID,
};
use super::transport::{
    describe_payload, BusTransport, ExportedObject, PropertyMap, PropertyValue,
};
use crate::error::{Error, Result};

/// How booleans are turned into characteristic bytes.
///
/// Older peripherals wrote `true` as the bytes `"ture"`. New peripherals
/// default to the correct spelling; clients that still match on the old
/// bytes need `boolean_encoding = "legacy"` in the configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BooleanEncoding {
    /// `"true"` / `"false"`.
    #[default]
    Standard,
    /// `"ture"` / `"false"`. Compatibility mode for clients built against the
    /// historical misspelling; keep it only where a client depends on it.
    Legacy,
}

impl BooleanEncoding {
    pub fn encode(self, value: bool) -> &'static [u8] {
        match (self, value) {
            (_, false) => b"false",
            (BooleanEncoding::Standard, true) => b"true",
            (BooleanEncoding::Legacy, true) => b"ture",
        }
    }
}

/// A value handed to `set_value` or `notify`.
#[derive(Debug, Clone, PartialEq)]
pub enum CharValue {
    Bytes(Vec<u8>),
    Text(String),
    Bool(bool),
}

impl CharValue {
    /// Encode to raw bytes, enforcing the value size ceiling.
    pub fn encode(self, node: &str, booleans: BooleanEncoding) -> Result<Vec<u8>> {
        let bytes = match self {
            CharValue::Bytes(bytes) => bytes,
            CharValue::Text(text) => text.into_bytes(),
            CharValue::Bool(b) => booleans.encode(b).to_vec(),
        };
        if bytes.len() > MAX_VALUE_LEN {
            return Err(Error::ValueTooLarge {
                node: node.to_string(),
                size: bytes.len(),
                max_size: MAX_VALUE_LEN,
            });
        }
        Ok(bytes)
    }
}

impl From<Vec<u8>> for CharValue {
    fn from(bytes: Vec<u8>) -> Self {
        CharValue::Bytes(bytes)
    }
}

impl From<&[u8]> for CharValue {
    fn from(bytes: &[u8]) -> Self {
        CharValue::Bytes(bytes.to_vec())
    }
}

impl From<String> for CharValue {
    fn from(text: String) -> Self {
        CharValue::Text(text)
    }
}

impl From<&str> for CharValue {
    fn from(text: &str) -> Self {
        CharValue::Text(text.to_string())
    }
}

impl From<bool> for CharValue {
    fn from(b: bool) -> Self {
        CharValue::Bool(b)
    }
}

impl TryFrom<toml::Value> for CharValue {
    type Error = Error;

    fn try_from(value: toml::Value) -> Result<Self> {
        match value {
            toml::Value::String(text) => Ok(CharValue::Text(text)),
            toml::Value::Boolean(b) => Ok(CharValue::Bool(b)),
            toml::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    toml::Value::Integer(n) if (0..=255).contains(&n) => Ok(n as u8),
                    other => Err(Error::UnsupportedValueType(format!(
                        "{} inside a byte array",
                        other.type_str()
                    ))),
                })
                .collect::<Result<Vec<u8>>>()
                .map(CharValue::Bytes),
            other => Err(Error::UnsupportedValueType(other.type_str().to_string())),
        }
    }
}

/// Options BlueZ passes with `ReadValue` and `WriteValue`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Object path of the remote device, empty when BlueZ omits it.
    pub device: String,
    pub offset: usize,
    pub mtu: Option<u16>,
    pub link: Option<String>,
}

impl RequestOptions {
    pub fn from_properties(options: &PropertyMap) -> Self {
        let mut parsed = RequestOptions::default();
        for (key, value) in options {
            match (key.as_str(), value) {
                ("device", v) => parsed.device = v.as_str().unwrap_or_default().to_string(),
                ("offset", PropertyValue::U16(n)) => parsed.offset = *n as usize,
                ("offset", PropertyValue::U32(n)) => parsed.offset = *n as usize,
                ("mtu", PropertyValue::U16(n)) => parsed.mtu = Some(*n),
                ("link", v) => parsed.link = v.as_str().map(str::to_string),
                (other, v) => debug!("\t{} : {}", other, v),
            }
        }
        parsed
    }

    /// Offset-zero read options for a given device.
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Identifies one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Called for every offset-zero `ReadValue`, before the value is returned.
pub type ReadObserver = Arc<dyn Fn(&CharacteristicState, &RequestOptions) + Send + Sync>;

/// Called for every `WriteValue` with the raw bytes written.
pub type WriteObserver = Arc<dyn Fn(&CharacteristicState, &RequestOptions, &[u8]) + Send + Sync>;

/// Per-characteristic settings inherited from the peripheral.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacteristicOptions {
    /// Trace every read, write and notification payload.
    pub log_io: bool,
    pub boolean_encoding: BooleanEncoding,
}

struct ValueState {
    value: Vec<u8>,
    notifying: bool,
}

/// The state behind one exported `org.bluez.GattCharacteristic1` object.
pub struct CharacteristicState {
    uuid: Uuid,
    node: String,
    path: String,
    service_path: String,
    flags: Vec<CharacteristicFlag>,
    options: CharacteristicOptions,
    state: Mutex<ValueState>,
    read_observers: RwLock<Vec<(SubscriptionId, ReadObserver)>>,
    write_observers: RwLock<Vec<(SubscriptionId, WriteObserver)>>,
    next_subscription: AtomicU64,
}

impl CharacteristicState {
    /// Build the state for `node` below `service_path`. An empty `flags`
    /// slice selects the default `encrypt-read`, `encrypt-write`.
    pub fn new(
        service_path: &str,
        uuid: &str,
        node: &str,
        flags: &[CharacteristicFlag],
        options: CharacteristicOptions,
    ) -> Result<Self> {
        let uuid = Uuid::parse_str(uuid).map_err(|_| Error::InvalidUuid(uuid.to_string()))?;
        validate_node(node)?;
        let flags = if flags.is_empty() {
            CharacteristicFlag::defaults()
        } else {
            flags.to_vec()
        };

        Ok(Self {
            uuid,
            node: node.to_string(),
            path: format!("{}/{}", service_path, node),
            service_path: service_path.to_string(),
            flags,
            options,
            state: Mutex::new(ValueState {
                value: DEFAULT_VALUE.to_vec(),
                notifying: false,
            }),
            read_observers: RwLock::new(Vec::new()),
            write_observers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    pub fn uuid(&self) -> String {
        self.uuid.hyphenated().to_string()
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    pub fn flags(&self) -> &[CharacteristicFlag] {
        &self.flags
    }

    pub fn flag_names(&self) -> Vec<String> {
        self.flags.iter().map(|f| f.as_str().to_string()).collect()
    }

    pub fn value(&self) -> Vec<u8> {
        self.state.lock().value.clone()
    }

    pub fn is_notifying(&self) -> bool {
        self.state.lock().notifying
    }

    /// Replace the stored value. Oversized values leave the old value in place.
    pub fn set_value(&self, value: impl Into<CharValue>) -> Result<()> {
        let bytes = self.encode(value.into())?;
        self.state.lock().value = bytes;
        Ok(())
    }

    fn encode(&self, value: CharValue) -> Result<Vec<u8>> {
        value.encode(&self.node, self.options.boolean_encoding)
    }

    /// Register a `ReadValue` observer.
    pub fn on_read_value<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&CharacteristicState, &RequestOptions) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.read_observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Register a `WriteValue` observer. While any is registered, writes no
    /// longer replace the stored value on their own.
    pub fn on_write_value<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&CharacteristicState, &RequestOptions, &[u8]) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.write_observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer. Returns false when `id` was not registered here.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.read_observers.write().retain(|(sid, _)| {
            let keep = *sid != id;
            removed |= !keep;
            keep
        });
        self.write_observers.write().retain(|(sid, _)| {
            let keep = *sid != id;
            removed |= !keep;
            keep
        });
        removed
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    /// `ReadValue` from BlueZ.
    pub fn handle_read(&self, options: &RequestOptions) -> Vec<u8> {
        if options.offset == 0 {
            if self.options.log_io {
                debug!("<<<<<<< ReadValue for {}, from {}", self.node, options.device);
            }
            let observers: Vec<ReadObserver> =
                self.read_observers.read().iter().map(|(_, o)| o.clone()).collect();
            for observer in observers {
                observer(self, options);
            }
        } else if self.options.log_io {
            debug!("<<<<<<< Sending next data chunk to {}", options.device);
        }

        let value = self.state.lock().value.clone();
        let chunk = value.get(options.offset..).unwrap_or_default().to_vec();
        if self.options.log_io {
            debug!("<<<<<<< [{}]", describe_payload(&chunk));
        }
        chunk
    }

    /// `WriteValue` from BlueZ.
    pub fn handle_write(&self, data: Vec<u8>, options: &RequestOptions) {
        if self.options.log_io {
            debug!(">>>>>>> WriteValue for {}, from {}", self.node, options.device);
        }

        let observers: Vec<WriteObserver> =
            self.write_observers.read().iter().map(|(_, o)| o.clone()).collect();
        if observers.is_empty() {
            if data.len() > MAX_VALUE_LEN {
                warn!(
                    "Ignoring {} byte write to {}, larger than {} bytes",
                    data.len(),
                    self.node,
                    MAX_VALUE_LEN
                );
            } else {
                self.state.lock().value = data.clone();
            }
        }
        for observer in observers {
            observer(self, options, &data);
        }

        if self.options.log_io {
            debug!(">>>>>>> [{}]", describe_payload(&self.value()));
        }
    }

    /// `StartNotify` from BlueZ. No value is pushed here.
    pub fn handle_start_notify(&self) {
        if self.options.log_io {
            debug!("Notify on for {}", self.node);
        }
        self.state.lock().notifying = true;
    }

    /// `StopNotify` from BlueZ.
    pub fn handle_stop_notify(&self) {
        if self.options.log_io {
            debug!("Notify off for {}", self.node);
        }
        self.state.lock().notifying = false;
    }

    /// Encode a notification payload. `Ok(None)` means nobody is subscribed.
    fn prepare_notification(&self, value: Option<CharValue>) -> Result<Option<Vec<u8>>> {
        let payload = match value {
            Some(value) => self.encode(value)?,
            None => self.value(),
        };
        if !self.is_notifying() {
            if self.options.log_io {
                debug!("Skipping this notification. No one has requested to be notified.");
            }
            return Ok(None);
        }
        Ok(Some(payload))
    }

    /// Flip `notifying` off. Returns whether it was on.
    fn take_notifying(&self) -> bool {
        std::mem::replace(&mut self.state.lock().notifying, false)
    }

    /// Properties as they appear in the object-manager snapshot.
    pub fn properties(&self) -> PropertyMap {
        let state = self.state.lock();
        PropertyMap::from([
            ("UUID".to_string(), PropertyValue::Str(self.uuid())),
            (
                "Service".to_string(),
                PropertyValue::ObjectPath(self.service_path.clone()),
            ),
            ("Flags".to_string(), PropertyValue::StrArray(self.flag_names())),
            ("Value".to_string(), PropertyValue::Bytes(state.value.clone())),
            ("Notifying".to_string(), PropertyValue::Bool(state.notifying)),
        ])
    }

    /// The read-only user description descriptor carrying the node name.
    pub fn descriptor(&self) -> DescriptorObject {
        DescriptorObject {
            path: format!("{}/{}", self.path, USER_DESCRIPTION_NODE),
            uuid: USER_DESCRIPTION_UUID.to_string(),
            characteristic_path: self.path.clone(),
            value: self.node.as_bytes().to_vec(),
            flags: vec![CharacteristicFlag::Read.as_str().to_string()],
        }
    }
}

fn validate_node(node: &str) -> Result<()> {
    let valid = !node.is_empty()
        && node
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidObjectPath(node.to_string()))
    }
}

/// `org.bluez.GattDescriptor1` object for the Characteristic User Description.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorObject {
    pub path: String,
    pub uuid: String,
    pub characteristic_path: String,
    pub value: Vec<u8>,
    pub flags: Vec<String>,
}

impl DescriptorObject {
    pub fn read_value(&self) -> Vec<u8> {
        self.value.clone()
    }

    pub fn write_value(&self, _data: &[u8]) {
        warn!(
            "Write to user description {} ignored; it is read-only",
            self.path
        );
    }

    pub fn properties(&self) -> PropertyMap {
        PropertyMap::from([
            ("UUID".to_string(), PropertyValue::Str(self.uuid.clone())),
            (
                "Characteristic".to_string(),
                PropertyValue::ObjectPath(self.characteristic_path.clone()),
            ),
            ("Value".to_string(), PropertyValue::Bytes(self.value.clone())),
            ("Flags".to_string(), PropertyValue::StrArray(self.flags.clone())),
        ])
    }
}

/// An exported characteristic: its state plus the bus used to signal it.
#[derive(Clone)]
pub struct Characteristic {
    state: Arc<CharacteristicState>,
    bus: Arc<dyn BusTransport>,
}

impl Characteristic {
    /// Export the characteristic and its user description descriptor.
    pub async fn new(
        bus: Arc<dyn BusTransport>,
        service_path: &str,
        uuid: &str,
        node: &str,
        flags: &[CharacteristicFlag],
        options: CharacteristicOptions,
    ) -> Result<Self> {
        let state = Arc::new(CharacteristicState::new(
            service_path,
            uuid,
            node,
            flags,
            options,
        )?);

        debug!("Exporting D-Bus interface for {} characteristic", node);
        bus.export(state.path(), ExportedObject::Characteristic(state.clone()))
            .await?;
        let descriptor = state.descriptor();
        let descriptor_path = descriptor.path.clone();
        bus.export(&descriptor_path, ExportedObject::Descriptor(descriptor))
            .await?;

        Ok(Self { state, bus })
    }

    pub fn state(&self) -> &Arc<CharacteristicState> {
        &self.state
    }

    pub fn uuid(&self) -> String {
        self.state.uuid()
    }

    pub fn node(&self) -> &str {
        self.state.node()
    }

    pub fn path(&self) -> &str {
        self.state.path()
    }

    pub fn value(&self) -> Vec<u8> {
        self.state.value()
    }

    pub fn is_notifying(&self) -> bool {
        self.state.is_notifying()
    }

    pub fn set_value(&self, value: impl Into<CharValue>) -> Result<()> {
        self.state.set_value(value)
    }

    pub fn on_read_value<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&CharacteristicState, &RequestOptions) + Send + Sync + 'static,
    {
        self.state.on_read_value(observer)
    }

    pub fn on_write_value<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&CharacteristicState, &RequestOptions, &[u8]) + Send + Sync + 'static,
    {
        self.state.on_write_value(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.unsubscribe(id)
    }

    /// Notify subscribers with the stored value.
    pub async fn notify(&self) -> Result<()> {
        self.send_notification(None).await
    }

    /// Notify subscribers with `value` without storing it.
    pub async fn notify_value(&self, value: impl Into<CharValue>) -> Result<()> {
        self.send_notification(Some(value.into())).await
    }

    async fn send_notification(&self, value: Option<CharValue>) -> Result<()> {
        let Some(payload) = self.state.prepare_notification(value)? else {
            return Ok(());
        };
        if self.state.options.log_io {
            debug!("Sending notification for {}", self.node());
            debug!("<<<<<<< [{}]", describe_payload(&payload));
        }
        self.bus
            .emit_properties_changed(
                self.path(),
                iface::GATT_CHARACTERISTIC,
                vec![("Value".to_string(), PropertyValue::Bytes(payload))],
            )
            .await
    }

    /// Drop a stale subscription, signalling `Notifying = false` once.
    pub async fn clear_notify(&self) -> Result<()> {
        if !self.state.take_notifying() {
            return Ok(());
        }
        debug!("Notify cleared for {}", self.node());
        self.bus
            .emit_properties_changed(
                self.path(),
                iface::GATT_CHARACTERISTIC,
                vec![("Notifying".to_string(), PropertyValue::Bool(false))],
            )
            .await
    }
}
