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

//! Connection monitor.
//!
//! Property changes for remote devices are folded into a single [`Client`]
//! record. [`ClientTracker`] holds the transition rules and performs no I/O;
//! [`ConnectionMonitor`] is the task that owns the tracker, feeds it one
//! change at a time and carries out what it asks for (property reads,
//! observer callbacks, disconnect handling).

use futures::StreamExt;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::ble_constants::{device_prefix, iface, VERIFY_PROPERTIES};
use super::device::DeviceReader;
use super::transport::{PropertyChange, PropertyChangeStream, PropertyValue};
use crate::state::{Client, ConnectionChange, ConnectionStatus, PeripheralState};

/// A device property change relevant to connection tracking.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSignal {
    Connected(bool),
    ServicesResolved(bool),
    /// `AddressType` showed up, which BlueZ only reports for a live device.
    AddressType,
    Name(String),
    Paired(bool),
}

/// A [`DeviceSignal`] together with the device it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub device_path: String,
    pub signal: DeviceSignal,
}

/// Extract the signals this monitor cares about from one change.
///
/// Only `org.bluez.Device1` changes on paths below `device_prefix` count.
pub fn device_events(change: &PropertyChange, device_prefix: &str) -> Vec<DeviceEvent> {
    if change.interface != iface::DEVICE || !change.path.starts_with(device_prefix) {
        return Vec::new();
    }

    change
        .changed
        .iter()
        .filter_map(|(name, value)| {
            let signal = match (name.as_str(), value) {
                ("Connected", PropertyValue::Bool(b)) => DeviceSignal::Connected(*b),
                ("ServicesResolved", PropertyValue::Bool(b)) => DeviceSignal::ServicesResolved(*b),
                ("AddressType", _) => DeviceSignal::AddressType,
                ("Name", PropertyValue::Str(s)) => DeviceSignal::Name(s.clone()),
                ("Paired", PropertyValue::Bool(b)) => DeviceSignal::Paired(*b),
                _ => return None,
            };
            Some(DeviceEvent {
                device_path: change.path.clone(),
                signal,
            })
        })
        .collect()
}

/// Result of reading `Paired`, `Name` and `Connected` after a connect.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub device_path: String,
    /// Tracker generation the read was started for.
    pub generation: u64,
    pub paired: bool,
    pub name: String,
    pub connected: Option<bool>,
}

/// Read the verification properties in their fixed order. Failures
/// default the field instead of aborting.
pub async fn verify_device(
    reader: &dyn DeviceReader,
    device_path: &str,
    generation: u64,
) -> Verification {
    let mut verification = Verification {
        device_path: device_path.to_string(),
        generation,
        paired: false,
        name: String::new(),
        connected: None,
    };

    for property in VERIFY_PROPERTIES {
        match reader.get_property(device_path, property).await {
            Ok(value) => match (property, &value) {
                ("Paired", PropertyValue::Bool(b)) => verification.paired = *b,
                ("Name", PropertyValue::Str(s)) => verification.name = s.clone(),
                ("Connected", PropertyValue::Bool(b)) => verification.connected = Some(*b),
                _ => warn!("Unexpected {} value on {}: {}", property, device_path, value),
            },
            Err(e) => debug!("Defaulting {} for {}: {}", property, device_path, e),
        }
    }

    verification
}

/// What the tracker wants done after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerAction {
    /// Tell observers about the change.
    Emit(ConnectionChange),
    /// Read `Paired`/`Name`/`Connected` for the device.
    Verify { device_path: String, generation: u64 },
    /// The client went away.
    Disconnected(Client),
}

/// The single-client state machine.
#[derive(Debug, Default)]
pub struct ClientTracker {
    client: Client,
    status: ConnectionStatus,
    generation: u64,
    /// Generation of the verification still in flight.
    pending: Option<u64>,
}

impl ClientTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Whether a `Paired`/`Name`/`Connected` read is still outstanding.
    pub fn is_verifying(&self) -> bool {
        self.pending.is_some()
    }

    pub fn handle(&mut self, event: &DeviceEvent) -> Vec<TrackerAction> {
        match &event.signal {
            DeviceSignal::Connected(true)
            | DeviceSignal::ServicesResolved(true)
            | DeviceSignal::AddressType => self.connect(&event.device_path),
            DeviceSignal::Connected(false) | DeviceSignal::ServicesResolved(false) => {
                self.disconnect(&event.device_path)
            }
            DeviceSignal::Name(name) => self.name_changed(&event.device_path, name),
            DeviceSignal::Paired(paired) => self.paired_changed(*paired),
        }
    }

    /// Fold in a finished verification. Stale results (the client
    /// disconnected or another device took over meanwhile) are dropped.
    pub fn apply_verification(&mut self, verification: Verification) -> Option<ConnectionChange> {
        if self.pending != Some(verification.generation)
            || !self.client.connected
            || verification.device_path != self.client.device_path
        {
            debug!(
                "Dropping stale verification for {}",
                verification.device_path
            );
            return None;
        }

        if verification.connected == Some(false) {
            debug!(
                "{} reports Connected=false while verifying, waiting for the signal",
                verification.device_path
            );
        }

        self.client.paired = verification.paired;
        self.client.name = verification.name;
        self.status = ConnectionStatus::Verified;
        self.pending = None;
        Some(self.change())
    }

    fn change(&self) -> ConnectionChange {
        ConnectionChange::new(self.client.clone(), self.status)
    }

    fn connect(&mut self, device_path: &str) -> Vec<TrackerAction> {
        if self.client.connected && self.client.device_path == device_path {
            return Vec::new();
        }

        self.generation += 1;
        self.client = Client {
            device_path: device_path.to_string(),
            connected: true,
            paired: false,
            name: String::new(),
        };
        self.status = ConnectionStatus::Connected;
        self.pending = Some(self.generation);

        vec![TrackerAction::Verify {
            device_path: device_path.to_string(),
            generation: self.generation,
        }]
    }

    fn disconnect(&mut self, device_path: &str) -> Vec<TrackerAction> {
        if !self.client.connected {
            return Vec::new();
        }

        self.generation += 1;
        self.client = Client {
            device_path: device_path.to_string(),
            connected: false,
            paired: false,
            name: String::new(),
        };
        self.status = ConnectionStatus::Disconnected;
        self.pending = None;

        vec![
            TrackerAction::Emit(self.change()),
            TrackerAction::Disconnected(self.client.clone()),
        ]
    }

    fn name_changed(&mut self, device_path: &str, name: &str) -> Vec<TrackerAction> {
        if self.client.connected {
            self.client.name = name.to_string();
            return Vec::new();
        }

        // BlueZ does not always fire Connected; a name showing up means a live device.
        self.generation += 1;
        self.client = Client {
            device_path: device_path.to_string(),
            connected: true,
            paired: false,
            name: name.to_string(),
        };
        self.status = ConnectionStatus::Connected;
        self.pending = None;
        vec![TrackerAction::Emit(self.change())]
    }

    fn paired_changed(&mut self, paired: bool) -> Vec<TrackerAction> {
        let unchanged = self.client.paired == paired;
        self.client.paired = paired;

        // A pending verification reports pairing itself.
        if unchanged || self.pending.is_some() {
            return Vec::new();
        }
        vec![TrackerAction::Emit(self.change())]
    }
}

/// Callback for connection changes.
pub type ConnectionObserver = Arc<dyn Fn(&ConnectionChange) + Send + Sync>;

/// Called on every disconnect with the reset client record.
pub type DisconnectHook = Arc<dyn Fn(&Client) + Send + Sync>;

/// Handle returned by [`ConnectionObservers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Registered connection observers, called in registration order.
#[derive(Default)]
pub struct ConnectionObservers {
    observers: RwLock<Vec<(ObserverId, ConnectionObserver)>>,
    next_id: AtomicU64,
}

impl ConnectionObservers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, observer: ConnectionObserver) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn notify(&self, change: &ConnectionChange) {
        // Clone out so observers may subscribe or unsubscribe from inside a callback.
        let observers: Vec<ConnectionObserver> =
            self.observers.read().iter().map(|(_, o)| o.clone()).collect();

        if observers.is_empty() {
            info!(
                "Connection event at {}: connected={} paired={} name='{}' device={}",
                change.at.format("%H:%M:%S"),
                change.client.connected,
                change.client.paired,
                change.client.name,
                change.client.device_path
            );
            return;
        }

        for observer in observers {
            observer(change);
        }
    }
}

enum MonitorInput {
    Change(PropertyChange),
    Verified(Verification),
}

/// Task that owns the client record.
pub struct ConnectionMonitor {
    tracker: ClientTracker,
    reader: Arc<dyn DeviceReader>,
    state: Arc<PeripheralState>,
    observers: Arc<ConnectionObservers>,
    on_disconnect: Option<DisconnectHook>,
    device_prefix: String,
    log_all_messages: bool,
}

impl ConnectionMonitor {
    pub fn new(
        reader: Arc<dyn DeviceReader>,
        state: Arc<PeripheralState>,
        observers: Arc<ConnectionObservers>,
        adapter_path: &str,
    ) -> Self {
        Self {
            tracker: ClientTracker::new(),
            reader,
            state,
            observers,
            on_disconnect: None,
            device_prefix: device_prefix(adapter_path),
            log_all_messages: false,
        }
    }

    pub fn with_disconnect_hook(mut self, hook: DisconnectHook) -> Self {
        self.on_disconnect = Some(hook);
        self
    }

    /// Log every change received, relevant or not.
    pub fn with_message_logging(mut self, enabled: bool) -> Self {
        self.log_all_messages = enabled;
        self
    }

    /// Run the monitor until `changes` ends.
    pub fn spawn(self, changes: PropertyChangeStream) -> JoinHandle<()> {
        tokio::spawn(self.run(changes))
    }

    async fn run(mut self, mut changes: PropertyChangeStream) {
        info!("Connection monitor started for {}*", self.device_prefix);
        let (verified_tx, mut verified_rx) = mpsc::unbounded_channel();

        loop {
            let input = tokio::select! {
                change = changes.next() => match change {
                    Some(change) => MonitorInput::Change(change),
                    None => break,
                },
                Some(verification) = verified_rx.recv() => MonitorInput::Verified(verification),
            };

            match input {
                MonitorInput::Change(change) => self.ingest(change, &verified_tx),
                MonitorInput::Verified(verification) => {
                    if let Some(change) = self.tracker.apply_verification(verification) {
                        self.publish(change);
                    }
                }
            }
        }

        info!("Connection monitor stopped");
    }

    fn ingest(&mut self, change: PropertyChange, verified_tx: &mpsc::UnboundedSender<Verification>) {
        if self.log_all_messages {
            debug!(
                "PropertiesChanged {} {}: {:?}",
                change.path, change.interface, change.changed
            );
        }

        for event in device_events(&change, &self.device_prefix) {
            debug!("Device event {:?} from {}", event.signal, event.device_path);
            for action in self.tracker.handle(&event) {
                self.perform(action, verified_tx);
            }
        }
    }

    fn perform(&self, action: TrackerAction, verified_tx: &mpsc::UnboundedSender<Verification>) {
        match action {
            TrackerAction::Emit(change) => self.publish(change),
            TrackerAction::Verify {
                device_path,
                generation,
            } => {
                info!("Client connected: {}", device_path);
                self.sync_state();
                let reader = self.reader.clone();
                let tx = verified_tx.clone();
                tokio::spawn(async move {
                    let verification =
                        verify_device(reader.as_ref(), &device_path, generation).await;
                    let _ = tx.send(verification);
                });
            }
            TrackerAction::Disconnected(client) => {
                info!("Client disconnected: {}", client.device_path);
                if let Some(hook) = &self.on_disconnect {
                    hook(&client);
                }
            }
        }
    }

    fn sync_state(&self) {
        self.state
            .set_client(self.tracker.client().clone(), self.tracker.status());
    }

    fn publish(&self, change: ConnectionChange) {
        self.sync_state();
        self.observers.notify(&change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;

    const DEV: &str = "/org/bluez/hci0/dev_00_DB_70_C8_0C_7F";
    const PREFIX: &str = "/org/bluez/hci0/dev_";

    fn event(signal: DeviceSignal) -> DeviceEvent {
        DeviceEvent {
            device_path: DEV.to_string(),
            signal,
        }
    }

    fn emitted(actions: &[TrackerAction]) -> usize {
        actions
            .iter()
            .filter(|a| matches!(a, TrackerAction::Emit(_)))
            .count()
    }

    struct FixedReader(HashMap<&'static str, PropertyValue>);

    #[async_trait]
    impl DeviceReader for FixedReader {
        async fn get_property(&self, device_path: &str, name: &str) -> Result<PropertyValue> {
            self.0.get(name).cloned().ok_or_else(|| Error::PropertyLookup {
                property: name.to_string(),
                path: device_path.to_string(),
                reason: "unknown".into(),
            })
        }
    }

    #[test]
    fn test_device_events_filters_interface_and_path() {
        let change = PropertyChange {
            path: DEV.into(),
            interface: iface::DEVICE.into(),
            changed: vec![
                ("Connected".into(), PropertyValue::Bool(true)),
                ("RSSI".into(), PropertyValue::I16(-60)),
                ("Name".into(), PropertyValue::Str("iPad".into())),
            ],
        };
        let events = device_events(&change, PREFIX);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].signal, DeviceSignal::Connected(true));
        assert_eq!(events[1].signal, DeviceSignal::Name("iPad".into()));

        let other_iface = PropertyChange {
            interface: "org.bluez.MediaTransport1".into(),
            ..change.clone()
        };
        assert!(device_events(&other_iface, PREFIX).is_empty());

        let adapter = PropertyChange {
            path: "/org/bluez/hci0".into(),
            ..change
        };
        assert!(device_events(&adapter, PREFIX).is_empty());
    }

    #[test]
    fn test_connect_requests_verification_then_emits() {
        let mut tracker = ClientTracker::new();
        let actions = tracker.handle(&event(DeviceSignal::Connected(true)));
        assert_eq!(emitted(&actions), 0);
        let generation = match &actions[0] {
            TrackerAction::Verify {
                device_path,
                generation,
            } => {
                assert_eq!(device_path, DEV);
                *generation
            }
            other => panic!("expected verify, got {:?}", other),
        };
        assert_eq!(tracker.status(), ConnectionStatus::Connected);

        let change = tracker
            .apply_verification(Verification {
                device_path: DEV.into(),
                generation,
                paired: true,
                name: "X".into(),
                connected: Some(true),
            })
            .unwrap();
        assert!(change.connected);
        assert!(change.client.paired);
        assert_eq!(change.client.name, "X");
        assert_eq!(tracker.status(), ConnectionStatus::Verified);
    }

    #[test]
    fn test_connect_verify_disconnect_emits_twice() {
        let mut tracker = ClientTracker::new();
        let mut emissions = 0;

        let actions = tracker.handle(&event(DeviceSignal::Connected(true)));
        let generation = match &actions[0] {
            TrackerAction::Verify { generation, .. } => *generation,
            _ => unreachable!(),
        };
        // Change signals racing the verification only update.
        emissions += emitted(&tracker.handle(&event(DeviceSignal::Paired(true))));
        emissions += emitted(&tracker.handle(&event(DeviceSignal::Name("X".into()))));
        emissions += tracker
            .apply_verification(Verification {
                device_path: DEV.into(),
                generation,
                paired: true,
                name: "X".into(),
                connected: Some(true),
            })
            .map_or(0, |_| 1);
        let actions = tracker.handle(&event(DeviceSignal::Connected(false)));
        emissions += emitted(&actions);
        assert!(actions
            .iter()
            .any(|a| matches!(a, TrackerAction::Disconnected(_))));

        assert_eq!(emissions, 2);
        let client = tracker.client();
        assert!(!client.connected);
        assert!(!client.paired);
        assert_eq!(client.name, "");
        assert_eq!(client.device_path, DEV);
    }

    #[test]
    fn test_stale_verification_is_dropped() {
        let mut tracker = ClientTracker::new();
        tracker.handle(&event(DeviceSignal::Connected(true)));
        tracker.handle(&event(DeviceSignal::Connected(false)));
        let change = tracker.apply_verification(Verification {
            device_path: DEV.into(),
            generation: 1,
            paired: true,
            name: "X".into(),
            connected: Some(true),
        });
        assert!(change.is_none());
        assert!(!tracker.client().paired);
    }

    #[test]
    fn test_services_resolved_is_connect_equivalent() {
        let mut tracker = ClientTracker::new();
        let actions = tracker.handle(&event(DeviceSignal::ServicesResolved(true)));
        assert!(matches!(actions[0], TrackerAction::Verify { .. }));
        // Connected after ServicesResolved for the same device is a duplicate.
        assert!(tracker.handle(&event(DeviceSignal::Connected(true))).is_empty());
        assert!(tracker.handle(&event(DeviceSignal::AddressType)).is_empty());

        let actions = tracker.handle(&event(DeviceSignal::ServicesResolved(false)));
        assert_eq!(emitted(&actions), 1);
        assert!(tracker.handle(&event(DeviceSignal::Connected(false))).is_empty());
    }

    #[test]
    fn test_name_while_disconnected_is_implicit_connect() {
        let mut tracker = ClientTracker::new();
        let actions = tracker.handle(&event(DeviceSignal::Name("Pixel".into())));
        assert_eq!(emitted(&actions), 1);
        let client = tracker.client();
        assert!(client.connected);
        assert_eq!(client.name, "Pixel");
        assert_eq!(client.device_path, DEV);
    }

    #[test]
    fn test_paired_change_after_verification_re_emits() {
        let mut tracker = ClientTracker::new();
        tracker.handle(&event(DeviceSignal::Name("Pixel".into())));
        tracker.status = ConnectionStatus::Verified;

        let actions = tracker.handle(&event(DeviceSignal::Paired(true)));
        assert_eq!(emitted(&actions), 1);
        match &actions[0] {
            TrackerAction::Emit(change) => {
                assert!(change.connected);
                assert!(change.client.paired);
            }
            other => panic!("expected emit, got {:?}", other),
        }
        // Same value again is not a change.
        assert!(tracker.handle(&event(DeviceSignal::Paired(true))).is_empty());
    }

    #[test]
    fn test_paired_change_after_implicit_connect_emits() {
        let mut tracker = ClientTracker::new();
        tracker.handle(&event(DeviceSignal::Name("Pixel".into())));
        // Already connected on this path, so no second verification.
        assert!(tracker.handle(&event(DeviceSignal::Connected(true))).is_empty());
        assert!(!tracker.is_verifying());

        let actions = tracker.handle(&event(DeviceSignal::Paired(true)));
        assert_eq!(emitted(&actions), 1);
        match &actions[0] {
            TrackerAction::Emit(change) => {
                assert!(change.connected);
                assert!(change.client.paired);
                assert_eq!(change.client.name, "Pixel");
            }
            other => panic!("expected emit, got {:?}", other),
        }
    }

    #[test]
    fn test_paired_change_while_verifying_only_updates() {
        let mut tracker = ClientTracker::new();
        tracker.handle(&event(DeviceSignal::Connected(true)));
        assert!(tracker.is_verifying());
        assert!(tracker.handle(&event(DeviceSignal::Paired(true))).is_empty());
        assert!(tracker.client().paired);
    }

    #[test]
    fn test_paired_change_while_disconnected_keeps_connection_state() {
        let mut tracker = ClientTracker::new();
        let actions = tracker.handle(&event(DeviceSignal::Paired(true)));
        assert_eq!(emitted(&actions), 1);
        assert!(!tracker.client().connected);
    }

    #[test]
    fn test_second_device_overwrites_client() {
        let mut tracker = ClientTracker::new();
        tracker.handle(&event(DeviceSignal::Connected(true)));
        let other = DeviceEvent {
            device_path: format!("{}11_22_33_44_55_66", PREFIX),
            signal: DeviceSignal::Connected(true),
        };
        let actions = tracker.handle(&other);
        assert!(matches!(actions[0], TrackerAction::Verify { .. }));
        assert_eq!(tracker.client().device_path, other.device_path);
    }

    #[tokio::test]
    async fn test_verify_reads_defaults_on_failure() {
        let reader = FixedReader(HashMap::from([("Paired", PropertyValue::Bool(true))]));
        let verification = verify_device(&reader, DEV, 3).await;
        assert!(verification.paired);
        assert_eq!(verification.name, "");
        assert_eq!(verification.connected, None);
        assert_eq!(verification.generation, 3);
    }

    #[test]
    fn test_observers_in_order_and_unsubscribe() {
        let observers = ConnectionObservers::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let first = observers.subscribe(Arc::new(move |_| s1.lock().push(1)));
        let s2 = seen.clone();
        observers.subscribe(Arc::new(move |_| s2.lock().push(2)));

        let change = ConnectionChange::new(Client::default(), ConnectionStatus::Disconnected);
        observers.notify(&change);
        assert_eq!(*seen.lock(), vec![1, 2]);

        assert!(observers.unsubscribe(first));
        assert!(!observers.unsubscribe(first));
        observers.notify(&change);
        assert_eq!(*seen.lock(), vec![1, 2, 2]);
        assert_eq!(observers.len(), 1);
    }
}
