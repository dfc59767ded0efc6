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

//! System bus transport on top of zbus.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zbus::fdo::{RequestNameFlags, RequestNameReply};
use zbus::names::BusName;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::{Connection, MatchRule, MessageStream};

use super::advertisement::AdvertisementObject;
use super::ble_constants::{iface, BLUEZ_SERVICE};
use super::characteristic::{CharacteristicState, DescriptorObject, RequestOptions};
use super::gatt_service::ServiceObject;
use super::transport::{
    BusTransport, CallArgs, ExportedObject, ManagedObjects, PropertyChange, PropertyChangeStream,
    PropertyMap, PropertyValue,
};
use crate::error::{Error, Result};

const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";

/// [`BusTransport`] over a zbus system bus connection.
#[derive(Clone)]
pub struct DbusTransport {
    conn: Connection,
}

impl DbusTransport {
    /// Connect to the system bus.
    pub async fn system() -> Result<Self> {
        let conn = Connection::system()
            .await
            .map_err(|e| Error::Bus(format!("Failed to connect to the system bus: {}", e)))?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_shared(self) -> Arc<dyn BusTransport> {
        Arc::new(self)
    }

    async fn call(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        body: &(impl serde::Serialize + zbus::zvariant::DynamicType + Sync),
    ) -> Result<zbus::Message> {
        self.conn
            .call_method(Some(BLUEZ_SERVICE), path, Some(interface), method, body)
            .await
            .map_err(|e| call_error(e, method, path))
    }
}

fn call_error(e: zbus::Error, method: &str, path: &str) -> Error {
    let no_reply = match &e {
        zbus::Error::MethodError(name, _, _) => name.as_str() == NO_REPLY,
        zbus::Error::FDO(fdo) => matches!(**fdo, zbus::fdo::Error::NoReply(_)),
        _ => false,
    };
    if no_reply {
        Error::NoReply {
            method: method.to_string(),
            path: path.to_string(),
        }
    } else {
        Error::MethodCall {
            method: method.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        }
    }
}

fn object_path(path: &str) -> Result<ObjectPath<'_>> {
    ObjectPath::try_from(path).map_err(|_| Error::InvalidObjectPath(path.to_string()))
}

/// Convert to a bus value.
pub fn to_value(value: &PropertyValue) -> Value<'static> {
    match value {
        PropertyValue::Bool(b) => Value::from(*b),
        PropertyValue::Str(s) | PropertyValue::Other(s) => Value::from(s.clone()),
        PropertyValue::ObjectPath(p) => match ObjectPath::try_from(p.clone()) {
            Ok(path) => Value::from(path),
            Err(_) => Value::from(p.clone()),
        },
        PropertyValue::Bytes(b) => Value::from(b.clone()),
        PropertyValue::StrArray(v) => Value::from(v.clone()),
        PropertyValue::U8(n) => Value::from(*n),
        PropertyValue::U16(n) => Value::from(*n),
        PropertyValue::I16(n) => Value::from(*n),
        PropertyValue::U32(n) => Value::from(*n),
        PropertyValue::I32(n) => Value::from(*n),
    }
}

/// Convert from a bus value. Types this crate never inspects become
/// [`PropertyValue::Other`].
pub fn from_value(value: &Value<'_>) -> PropertyValue {
    match value {
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::Str(s) => PropertyValue::Str(s.to_string()),
        Value::ObjectPath(p) => PropertyValue::ObjectPath(p.to_string()),
        Value::U8(n) => PropertyValue::U8(*n),
        Value::U16(n) => PropertyValue::U16(*n),
        Value::I16(n) => PropertyValue::I16(*n),
        Value::U32(n) => PropertyValue::U32(*n),
        Value::I32(n) => PropertyValue::I32(*n),
        Value::Value(inner) => from_value(inner),
        Value::Array(array) => match array.element_signature().as_str() {
            "y" => PropertyValue::Bytes(
                array
                    .iter()
                    .filter_map(|item| match item {
                        Value::U8(n) => Some(*n),
                        _ => None,
                    })
                    .collect(),
            ),
            "s" | "o" => PropertyValue::StrArray(
                array
                    .iter()
                    .filter_map(|item| match from_value(item) {
                        PropertyValue::Str(s) | PropertyValue::ObjectPath(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            _ => PropertyValue::Other(format!("{:?}", value)),
        },
        other => PropertyValue::Other(format!("{:?}", other)),
    }
}

fn to_property_map(map: &HashMap<String, OwnedValue>) -> PropertyMap {
    map.iter()
        .map(|(key, value)| (key.clone(), from_value(value)))
        .collect()
}

fn to_value_map(map: &PropertyMap) -> HashMap<String, Value<'static>> {
    map.iter()
        .map(|(key, value)| (key.clone(), to_value(value)))
        .collect()
}

fn owned_path(path: &str) -> zbus::fdo::Result<OwnedObjectPath> {
    OwnedObjectPath::try_from(path.to_string())
        .map_err(|e| zbus::fdo::Error::Failed(format!("Invalid object path {}: {}", path, e)))
}

struct ServiceInterface(ServiceObject);

#[zbus::interface(name = "org.bluez.GattService1")]
impl ServiceInterface {
    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.0.uuid.clone()
    }

    #[zbus(property)]
    fn primary(&self) -> bool {
        self.0.primary
    }
}

struct CharacteristicInterface(Arc<CharacteristicState>);

#[zbus::interface(name = "org.bluez.GattCharacteristic1")]
impl CharacteristicInterface {
    fn read_value(&self, options: HashMap<String, OwnedValue>) -> Vec<u8> {
        let options = RequestOptions::from_properties(&to_property_map(&options));
        self.0.handle_read(&options)
    }

    fn write_value(&self, value: Vec<u8>, options: HashMap<String, OwnedValue>) {
        let options = RequestOptions::from_properties(&to_property_map(&options));
        self.0.handle_write(value, &options);
    }

    fn start_notify(&self) {
        self.0.handle_start_notify();
    }

    fn stop_notify(&self) {
        self.0.handle_stop_notify();
    }

    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.0.uuid()
    }

    #[zbus(property)]
    fn service(&self) -> zbus::fdo::Result<OwnedObjectPath> {
        owned_path(self.0.service_path())
    }

    #[zbus(property)]
    fn flags(&self) -> Vec<String> {
        self.0.flag_names()
    }

    #[zbus(property)]
    fn value(&self) -> Vec<u8> {
        self.0.value()
    }

    #[zbus(property)]
    fn notifying(&self) -> bool {
        self.0.is_notifying()
    }
}

struct DescriptorInterface(DescriptorObject);

#[zbus::interface(name = "org.bluez.GattDescriptor1")]
impl DescriptorInterface {
    fn read_value(&self, _options: HashMap<String, OwnedValue>) -> Vec<u8> {
        self.0.read_value()
    }

    fn write_value(&self, value: Vec<u8>, _options: HashMap<String, OwnedValue>) {
        self.0.write_value(&value);
    }

    #[zbus(property, name = "UUID")]
    fn uuid(&self) -> String {
        self.0.uuid.clone()
    }

    #[zbus(property)]
    fn characteristic(&self) -> zbus::fdo::Result<OwnedObjectPath> {
        owned_path(&self.0.characteristic_path)
    }

    #[zbus(property)]
    fn value(&self) -> Vec<u8> {
        self.0.value.clone()
    }

    #[zbus(property)]
    fn flags(&self) -> Vec<String> {
        self.0.flags.clone()
    }
}

struct AdvertisementInterface(AdvertisementObject);

#[zbus::interface(name = "org.bluez.LEAdvertisement1")]
impl AdvertisementInterface {
    fn release(&self) {
        self.0.release();
    }

    #[zbus(property, name = "Type")]
    fn kind(&self) -> String {
        self.0.kind.clone()
    }

    #[zbus(property, name = "ServiceUUIDs")]
    fn service_uuids(&self) -> Vec<String> {
        self.0.service_uuids.clone()
    }
}

struct ObjectManagerInterface {
    path: String,
    objects: ManagedObjects,
}

#[zbus::interface(name = "org.freedesktop.DBus.ObjectManager")]
impl ObjectManagerInterface {
    fn get_managed_objects(
        &self,
    ) -> zbus::fdo::Result<HashMap<OwnedObjectPath, HashMap<String, HashMap<String, Value<'static>>>>>
    {
        info!("GetManagedObjects called on {}", self.path);
        if let Ok(dump) = serde_json::to_string_pretty(&self.objects) {
            debug!("{}", dump);
        }

        let mut reply = HashMap::new();
        for (path, interfaces) in &self.objects {
            let interfaces = interfaces
                .iter()
                .map(|(name, properties)| (name.clone(), to_value_map(properties)))
                .collect();
            reply.insert(owned_path(path)?, interfaces);
        }
        Ok(reply)
    }
}

#[async_trait]
impl BusTransport for DbusTransport {
    async fn request_name(&self, name: &str) -> Result<()> {
        let reply = self
            .conn
            .request_name_with_flags(name, RequestNameFlags::DoNotQueue.into())
            .await
            .map_err(|e| Error::NameRequest {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        match reply {
            RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner => {
                info!("Acquired bus name {}", name);
                Ok(())
            }
            other => Err(Error::NameRequest {
                name: name.to_string(),
                reason: format!("{:?}", other),
            }),
        }
    }

    async fn export(&self, path: &str, object: ExportedObject) -> Result<()> {
        let kind = object.kind();
        let interface = object.interface();
        let server = self.conn.object_server();
        let export_error = |e: zbus::Error| Error::Export {
            path: path.to_string(),
            reason: e.to_string(),
        };

        let added = match object {
            ExportedObject::Service(o) => server.at(path, ServiceInterface(o)).await,
            ExportedObject::Characteristic(state) => {
                server.at(path, CharacteristicInterface(state)).await
            }
            ExportedObject::Descriptor(o) => server.at(path, DescriptorInterface(o)).await,
            ExportedObject::Advertisement(o) => server.at(path, AdvertisementInterface(o)).await,
            ExportedObject::ObjectManager(objects) => {
                // A new snapshot replaces the previous one.
                let _ = server.remove::<ObjectManagerInterface, _>(path).await;
                server
                    .at(
                        path,
                        ObjectManagerInterface {
                            path: path.to_string(),
                            objects,
                        },
                    )
                    .await
            }
        }
        .map_err(export_error)?;

        if !added {
            return Err(Error::Export {
                path: path.to_string(),
                reason: format!("{} already exported", kind),
            });
        }
        debug!("Exported {} ({}) at {}", kind, interface, path);
        Ok(())
    }

    async fn call_method(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: CallArgs,
    ) -> Result<()> {
        match args {
            CallArgs::ObjectPath(target) => {
                let target = object_path(&target)?;
                self.call(path, interface, method, &(target,)).await?;
            }
            CallArgs::ObjectPathWithOptions(target) => {
                let target = object_path(&target)?;
                let options: HashMap<&str, Value<'_>> = HashMap::new();
                self.call(path, interface, method, &(target, options)).await?;
            }
        }
        Ok(())
    }

    async fn get_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
    ) -> Result<PropertyValue> {
        let reply = self
            .call(path, iface::PROPERTIES, "Get", &(interface, name))
            .await?;
        let value: OwnedValue = reply.body().deserialize().map_err(|e| Error::PropertyLookup {
            property: name.to_string(),
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(from_value(&value))
    }

    async fn get_all_properties(&self, path: &str, interface: &str) -> Result<PropertyMap> {
        let reply = self
            .call(path, iface::PROPERTIES, "GetAll", &(interface,))
            .await?;
        let values: HashMap<String, OwnedValue> =
            reply.body().deserialize().map_err(|e| Error::PropertyLookup {
                property: "*".to_string(),
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(to_property_map(&values))
    }

    async fn set_property(
        &self,
        path: &str,
        interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.call(path, iface::PROPERTIES, "Set", &(interface, name, to_value(&value)))
            .await?;
        Ok(())
    }

    async fn emit_properties_changed(
        &self,
        path: &str,
        interface: &str,
        changed: Vec<(String, PropertyValue)>,
    ) -> Result<()> {
        let changed: HashMap<String, Value<'static>> = changed
            .iter()
            .map(|(name, value)| (name.clone(), to_value(value)))
            .collect();
        self.conn
            .emit_signal(
                None::<BusName<'_>>,
                path,
                iface::PROPERTIES,
                "PropertiesChanged",
                &(interface, changed, Vec::<String>::new()),
            )
            .await
            .map_err(|e| Error::Bus(format!("PropertiesChanged on {}: {}", path, e)))
    }

    async fn subscribe_properties_changed(
        &self,
        path_namespace: &str,
    ) -> Result<PropertyChangeStream> {
        let rule_error = |e: zbus::Error| Error::Bus(format!("Bad match rule: {}", e));
        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .sender(BLUEZ_SERVICE)
            .map_err(rule_error)?
            .interface(iface::PROPERTIES)
            .map_err(rule_error)?
            .member("PropertiesChanged")
            .map_err(rule_error)?
            .path_namespace(path_namespace.to_string())
            .map_err(rule_error)?
            .build();

        let stream = MessageStream::for_match_rule(rule, &self.conn, Some(256))
            .await
            .map_err(|e| Error::Bus(format!("Failed to subscribe to PropertiesChanged: {}", e)))?;
        info!("Subscribed to PropertiesChanged below {}", path_namespace);

        Ok(Box::pin(stream.filter_map(|message| async move {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!("Error on signal stream: {}", e);
                    return None;
                }
            };
            let path = message.header().path()?.to_string();
            let (interface, changed, _invalidated): (
                String,
                HashMap<String, OwnedValue>,
                Vec<String>,
            ) = message.body().deserialize().ok()?;

            Some(PropertyChange {
                path,
                interface,
                changed: changed
                    .iter()
                    .map(|(name, value)| (name.clone(), from_value(value)))
                    .collect(),
            })
        })))
    }
}
