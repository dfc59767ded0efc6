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

//! Characteristic and service export against the recording bus.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bluez_peripheral::bluetooth::ble_constants::{iface, CharacteristicFlag};
use bluez_peripheral::bluetooth::characteristic::{
    Characteristic, CharacteristicOptions, RequestOptions,
};
use bluez_peripheral::bluetooth::gatt_service::GattService;
use bluez_peripheral::bluetooth::transport::{BusTransport, CallArgs, PropertyValue};
use bluez_peripheral::error::Error;
use common::{BusEvent, Failure, RecordingBus};

const SERVICE_PATH: &str = "/com/netConfig";
const SERVICE_UUID: &str = "27b5244f-94f3-4011-be53-6ac36bf22cf1";
const CHAR_UUID: &str = "00000001-94f3-4011-be53-6ac36bf22cf1";
const ADAPTER: &str = "/org/bluez/hci0";

async fn service(bus: &Arc<RecordingBus>) -> GattService {
    GattService::new(
        bus.clone(),
        SERVICE_PATH,
        SERVICE_UUID,
        ADAPTER,
        Duration::from_secs(1),
    )
    .await
    .unwrap()
}

async fn characteristic(
    bus: &Arc<RecordingBus>,
    uuid: &str,
    node: &str,
    flags: &[CharacteristicFlag],
) -> Characteristic {
    let bus: Arc<dyn BusTransport> = bus.clone();
    Characteristic::new(bus, SERVICE_PATH, uuid, node, flags, CharacteristicOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_object_tree_snapshot() {
    let bus = RecordingBus::new();
    let service = service(&bus).await;
    let control = characteristic(
        &bus,
        CHAR_UUID,
        "control",
        &[CharacteristicFlag::Read, CharacteristicFlag::WriteWithoutResponse],
    )
    .await;

    service.publish_object_tree(&[control]).await.unwrap();
    let objects = bus.last_object_manager().unwrap();

    let paths: Vec<&str> = objects.keys().map(String::as_str).collect();
    assert_eq!(
        paths,
        vec![
            "/com/netConfig",
            "/com/netConfig/control",
            "/com/netConfig/control/userDescription",
        ]
    );

    let svc = &objects["/com/netConfig"][iface::GATT_SERVICE];
    assert_eq!(svc["UUID"], PropertyValue::Str(SERVICE_UUID.into()));
    assert_eq!(svc["Primary"], PropertyValue::Bool(true));

    let chr = &objects["/com/netConfig/control"][iface::GATT_CHARACTERISTIC];
    assert_eq!(chr["UUID"], PropertyValue::Str(CHAR_UUID.into()));
    assert_eq!(chr["Service"], PropertyValue::ObjectPath(SERVICE_PATH.into()));
    assert_eq!(
        chr["Flags"],
        PropertyValue::StrArray(vec!["read".into(), "write-without-response".into()])
    );
    assert_eq!(chr["Value"], PropertyValue::Bytes(b"Value not set".to_vec()));
    assert_eq!(chr["Notifying"], PropertyValue::Bool(false));

    let desc = &objects["/com/netConfig/control/userDescription"][iface::GATT_DESCRIPTOR];
    assert_eq!(
        desc["UUID"],
        PropertyValue::Str("2901-0000-1000-8000-00805f9b34fb".into())
    );
    assert_eq!(desc["Value"], PropertyValue::Bytes(b"control".to_vec()));
    assert_eq!(
        desc["Characteristic"],
        PropertyValue::ObjectPath("/com/netConfig/control".into())
    );
}

#[tokio::test]
async fn test_snapshot_is_not_live() {
    let bus = RecordingBus::new();
    let service = service(&bus).await;
    let status = characteristic(&bus, CHAR_UUID, "status", &[CharacteristicFlag::Notify]).await;

    service.publish_object_tree(&[status.clone()]).await.unwrap();
    status.state().handle_start_notify();

    let objects = bus.last_object_manager().unwrap();
    assert_eq!(
        objects["/com/netConfig/status"][iface::GATT_CHARACTERISTIC]["Notifying"],
        PropertyValue::Bool(false)
    );
}

#[tokio::test]
async fn test_characteristic_exports_descriptor() {
    let bus = RecordingBus::new();
    let _c = characteristic(&bus, CHAR_UUID, "status", &[]).await;
    assert_eq!(
        bus.exported(),
        vec![
            ("/com/netConfig/status".to_string(), "characteristic"),
            (
                "/com/netConfig/status/userDescription".to_string(),
                "descriptor"
            ),
        ]
    );
}

#[tokio::test]
async fn test_write_without_observer_stores_bytes() {
    let bus = RecordingBus::new();
    let control = characteristic(
        &bus,
        CHAR_UUID,
        "control",
        &[CharacteristicFlag::Read, CharacteristicFlag::WriteWithoutResponse],
    )
    .await;

    control
        .state()
        .handle_write(b"3".to_vec(), &RequestOptions::for_device(common::DEVICE));
    assert_eq!(control.value(), b"3".to_vec());
}

#[tokio::test]
async fn test_write_observer_takes_over_storage() {
    let bus = RecordingBus::new();
    let control = characteristic(&bus, CHAR_UUID, "control", &[CharacteristicFlag::Write]).await;
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let s = seen.clone();
    control.on_write_value(move |_, _, data| s.lock().push(data.to_vec()));

    control
        .state()
        .handle_write(b"reboot".to_vec(), &RequestOptions::default());
    assert_eq!(*seen.lock(), vec![b"reboot".to_vec()]);
    assert_eq!(control.value(), b"Value not set".to_vec());
}

#[tokio::test]
async fn test_read_continuation_skips_observer() {
    let bus = RecordingBus::new();
    let status = characteristic(&bus, CHAR_UUID, "status", &[CharacteristicFlag::Read]).await;
    let reads = Arc::new(AtomicUsize::new(0));
    let r = reads.clone();
    status.on_read_value(move |state, _| {
        r.fetch_add(1, Ordering::SeqCst);
        state.set_value("0123456789").unwrap();
    });

    let first = status.state().handle_read(&RequestOptions::default());
    assert_eq!(first, b"0123456789".to_vec());
    let rest = status
        .state()
        .handle_read(&RequestOptions::default().with_offset(4));
    assert_eq!(rest, b"456789".to_vec());
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_notify_is_noop_when_not_notifying() {
    let bus = RecordingBus::new();
    let status = characteristic(&bus, CHAR_UUID, "status", &[CharacteristicFlag::Notify]).await;
    status.set_value("idle").unwrap();

    status.notify_value("busy").await.unwrap();
    status.notify().await.unwrap();
    assert!(bus.signals().is_empty());
    assert_eq!(status.value(), b"idle".to_vec());
}

#[tokio::test]
async fn test_notify_emits_value_without_storing() {
    let bus = RecordingBus::new();
    let status = characteristic(&bus, CHAR_UUID, "status", &[CharacteristicFlag::Notify]).await;
    status.set_value("idle").unwrap();
    status.state().handle_start_notify();

    status.notify_value("busy").await.unwrap();
    assert_eq!(
        bus.signals(),
        vec![(
            "/com/netConfig/status".to_string(),
            vec![("Value".to_string(), PropertyValue::Bytes(b"busy".to_vec()))]
        )]
    );
    assert_eq!(status.value(), b"idle".to_vec());
}

#[tokio::test]
async fn test_oversized_values_rejected() {
    let bus = RecordingBus::new();
    let status = characteristic(&bus, CHAR_UUID, "status", &[CharacteristicFlag::Notify]).await;
    status.set_value(vec![7u8; 512]).unwrap();
    status.state().handle_start_notify();

    let err = status.set_value(vec![0u8; 513]).unwrap_err();
    assert!(matches!(err, Error::ValueTooLarge { size: 513, .. }));
    let err = status.notify_value(vec![0u8; 513]).await.unwrap_err();
    assert!(matches!(err, Error::ValueTooLarge { .. }));

    assert_eq!(status.value(), vec![7u8; 512]);
    assert!(bus.signals().is_empty());
}

#[tokio::test]
async fn test_clear_notify_is_idempotent() {
    let bus = RecordingBus::new();
    let status = characteristic(&bus, CHAR_UUID, "status", &[CharacteristicFlag::Notify]).await;
    status.state().handle_start_notify();

    status.clear_notify().await.unwrap();
    status.clear_notify().await.unwrap();
    assert_eq!(
        bus.signals(),
        vec![(
            "/com/netConfig/status".to_string(),
            vec![("Notifying".to_string(), PropertyValue::Bool(false))]
        )]
    );
    assert!(!status.is_notifying());
}

#[tokio::test]
async fn test_clear_all_notifications() {
    let bus = RecordingBus::new();
    let a = characteristic(&bus, CHAR_UUID, "cpu", &[CharacteristicFlag::Notify]).await;
    let b = characteristic(
        &bus,
        "00000002-94f3-4011-be53-6ac36bf22cf1",
        "ip",
        &[CharacteristicFlag::Notify],
    )
    .await;
    let chars = vec![a, b];
    for c in &chars {
        c.state().handle_start_notify();
    }
    assert!(GattService::is_anyone_notifying(&chars));

    GattService::clear_all_notifications(&chars).await;
    assert!(!GattService::is_anyone_notifying(&chars));
    assert_eq!(bus.signals().len(), 2);
}

#[tokio::test]
async fn test_register_application_arguments() {
    let bus = RecordingBus::new();
    let service = service(&bus).await;
    bus.clear_events();

    assert!(service.register_application().await);
    assert!(service.is_registered().await);
    assert_eq!(
        bus.events(),
        vec![BusEvent::Call {
            path: ADAPTER.into(),
            interface: iface::GATT_MANAGER.into(),
            method: "RegisterApplication".into(),
            args: CallArgs::ObjectPathWithOptions(SERVICE_PATH.into()),
        }]
    );
}

#[tokio::test]
async fn test_register_no_reply_counts_as_success() {
    let bus = RecordingBus::new();
    bus.fail_method("RegisterApplication", Failure::NoReply);
    let service = service(&bus).await;
    assert!(service.register_application().await);
}

#[tokio::test]
async fn test_register_failure_is_logged_not_raised() {
    let bus = RecordingBus::new();
    bus.fail_method("RegisterApplication", Failure::Error);
    let service = service(&bus).await;
    assert!(!service.register_application().await);
    assert!(!service.is_registered().await);
}

#[tokio::test]
async fn test_restart_service_sequence() {
    let bus = RecordingBus::new();
    let service = service(&bus).await;
    let status = characteristic(&bus, CHAR_UUID, "status", &[CharacteristicFlag::Notify]).await;
    let chars = vec![status];
    chars[0].state().handle_start_notify();
    bus.clear_events();

    assert!(service.restart_service(&chars).await);
    assert!(!GattService::is_anyone_notifying(&chars));
    assert_eq!(bus.signals().len(), 1);
    assert_eq!(
        bus.methods(),
        vec!["UnregisterApplication", "RegisterApplication"]
    );

    // Safe to repeat with nobody connected.
    assert!(service.restart_service(&chars).await);
    assert_eq!(bus.signals().len(), 1);
}

#[tokio::test]
async fn test_invalid_inputs_rejected() {
    let bus = RecordingBus::new();
    let dyn_bus: Arc<dyn BusTransport> = bus.clone();

    let err = Characteristic::new(
        dyn_bus.clone(),
        SERVICE_PATH,
        "not-a-uuid",
        "status",
        &[],
        CharacteristicOptions::default(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, Error::InvalidUuid(_)));

    let err = Characteristic::new(
        dyn_bus,
        SERVICE_PATH,
        CHAR_UUID,
        "bad/node",
        &[],
        CharacteristicOptions::default(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, Error::InvalidObjectPath(_)));
    assert!(bus.exported().is_empty());
}
