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

//! In-memory bus that records everything the peripheral does.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use bluez_peripheral::bluetooth::transport::{
    BusTransport, CallArgs, ExportedObject, ManagedObjects, PropertyChange, PropertyChangeStream,
    PropertyMap, PropertyValue,
};
use bluez_peripheral::error::{Error, Result};

pub const DEVICE: &str = "/org/bluez/hci0/dev_00_DB_70_C8_0C_7F";

/// One recorded interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    RequestName(String),
    Export {
        path: String,
        kind: &'static str,
    },
    Call {
        path: String,
        interface: String,
        method: String,
        args: CallArgs,
    },
    Get {
        path: String,
        name: String,
    },
    Set {
        path: String,
        name: String,
        value: PropertyValue,
    },
    Signal {
        path: String,
        interface: String,
        changed: Vec<(String, PropertyValue)>,
    },
}

/// How a scripted method call fails.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    NoReply,
    Error,
}

#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<BusEvent>>,
    object_managers: Mutex<Vec<ManagedObjects>>,
    properties: Mutex<HashMap<(String, String), PropertyValue>>,
    failures: Mutex<HashMap<String, Failure>>,
    name_taken: Mutex<bool>,
    change_tx: Mutex<Option<mpsc::UnboundedSender<PropertyChange>>>,
}

impl RecordingBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_property_value(&self, path: &str, name: &str, value: PropertyValue) {
        self.properties
            .lock()
            .insert((path.to_string(), name.to_string()), value);
    }

    pub fn fail_method(&self, method: &str, failure: Failure) {
        self.failures.lock().insert(method.to_string(), failure);
    }

    pub fn take_name(&self) {
        *self.name_taken.lock() = true;
    }

    /// Deliver a change to the subscribed monitor.
    pub fn push_change(&self, path: &str, interface: &str, changed: Vec<(&str, PropertyValue)>) {
        let change = PropertyChange {
            path: path.to_string(),
            interface: interface.to_string(),
            changed: changed
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        };
        if let Some(tx) = self.change_tx.lock().as_ref() {
            let _ = tx.unbounded_send(change);
        }
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Names of the methods called, in order.
    pub fn methods(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BusEvent::Call { method, .. } => Some(method.clone()),
                _ => None,
            })
            .collect()
    }

    /// Property names read from `path`, in order.
    pub fn gets(&self, path: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BusEvent::Get { path: p, name } if p == path => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn signals(&self) -> Vec<(String, Vec<(String, PropertyValue)>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BusEvent::Signal { path, changed, .. } => Some((path.clone(), changed.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn exported(&self) -> Vec<(String, &'static str)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                BusEvent::Export { path, kind } => Some((path.clone(), *kind)),
                _ => None,
            })
            .collect()
    }

    pub fn last_object_manager(&self) -> Option<ManagedObjects> {
        self.object_managers.lock().last().cloned()
    }

    fn record(&self, event: BusEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl BusTransport for RecordingBus {
    async fn request_name(&self, name: &str) -> Result<()> {
        self.record(BusEvent::RequestName(name.to_string()));
        if *self.name_taken.lock() {
            return Err(Error::NameRequest {
                name: name.to_string(),
                reason: "Exists".to_string(),
            });
        }
        Ok(())
    }

    async fn export(&self, path: &str, object: ExportedObject) -> Result<()> {
        self.record(BusEvent::Export {
            path: path.to_string(),
            kind: object.kind(),
        });
        if let ExportedObject::ObjectManager(objects) = object {
            self.object_managers.lock().push(objects);
        }
        Ok(())
    }

    async fn call_method(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: CallArgs,
    ) -> Result<()> {
        self.record(BusEvent::Call {
            path: path.to_string(),
            interface: interface.to_string(),
            method: method.to_string(),
            args,
        });
        match self.failures.lock().get(method) {
            Some(Failure::NoReply) => Err(Error::NoReply {
                method: method.to_string(),
                path: path.to_string(),
            }),
            Some(Failure::Error) => Err(Error::MethodCall {
                method: method.to_string(),
                path: path.to_string(),
                reason: "org.bluez.Error.Failed".to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn get_property(
        &self,
        path: &str,
        _interface: &str,
        name: &str,
    ) -> Result<PropertyValue> {
        self.record(BusEvent::Get {
            path: path.to_string(),
            name: name.to_string(),
        });
        self.properties
            .lock()
            .get(&(path.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::PropertyLookup {
                property: name.to_string(),
                path: path.to_string(),
                reason: "org.freedesktop.DBus.Error.InvalidArgs".to_string(),
            })
    }

    async fn get_all_properties(&self, path: &str, _interface: &str) -> Result<PropertyMap> {
        Ok(self
            .properties
            .lock()
            .iter()
            .filter(|((p, _), _)| p == path)
            .map(|((_, name), value)| (name.clone(), value.clone()))
            .collect())
    }

    async fn set_property(
        &self,
        path: &str,
        _interface: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.record(BusEvent::Set {
            path: path.to_string(),
            name: name.to_string(),
            value: value.clone(),
        });
        self.set_property_value(path, name, value);
        Ok(())
    }

    async fn emit_properties_changed(
        &self,
        path: &str,
        interface: &str,
        changed: Vec<(String, PropertyValue)>,
    ) -> Result<()> {
        self.record(BusEvent::Signal {
            path: path.to_string(),
            interface: interface.to_string(),
            changed,
        });
        Ok(())
    }

    async fn subscribe_properties_changed(
        &self,
        _path_namespace: &str,
    ) -> Result<PropertyChangeStream> {
        let (tx, rx) = mpsc::unbounded();
        *self.change_tx.lock() = Some(tx);
        Ok(Box::pin(rx))
    }
}
