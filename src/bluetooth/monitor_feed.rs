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

//! Property changes from a `gdbus monitor` feed.
//!
//! Alternative to the signal subscription in [`super::dbus`]: the monitor
//! prints one line per signal, e.g.
//!
//! ```text
//! /org/bluez/hci0/dev_00_DB_70_C8_0C_7F: org.freedesktop.DBus.Properties.PropertiesChanged ('org.bluez.Device1', {'Connected': <true>}, @as [])
//! ```
//!
//! Lines are parsed into the same [`PropertyChange`] the subscription yields,
//! so the connection monitor does not know which source it is reading.
//! [`GdbusDeviceReader`] does the matching property reads through
//! `gdbus call`.

use async_trait::async_trait;
use futures::stream;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::ble_constants::{iface, BLUEZ_SERVICE};
use super::device::DeviceReader;
use super::transport::{bounded, PropertyChange, PropertyChangeStream, PropertyValue};
use crate::error::{Error, Result};

const PROPERTIES_CHANGED: &str = "org.freedesktop.DBus.Properties.PropertiesChanged";
const INTERFACES_ADDED: &str = "org.freedesktop.DBus.ObjectManager.InterfacesAdded";

/// Parse one monitor line. Lines that are not property changes or new
/// interfaces give `None`.
pub fn parse_line(line: &str) -> Option<PropertyChange> {
    let (sender_path, rest) = line.trim().split_once(": ")?;

    if let Some(args) = rest.strip_prefix(PROPERTIES_CHANGED) {
        let args = strip_parens(args.trim())?;
        let parts = split_top_level(args);
        let interface = unquote(parts.first()?)?;
        let changed = parse_property_blob(parts.get(1)?);
        return Some(PropertyChange {
            path: sender_path.to_string(),
            interface: interface.to_string(),
            changed,
        });
    }

    if let Some(args) = rest.strip_prefix(INTERFACES_ADDED) {
        // (objectpath '/org/bluez/hci0/dev_..', {'org.bluez.Device1': {...}, ...})
        let args = strip_parens(args.trim())?;
        let parts = split_top_level(args);
        let path = unquote(parts.first()?.trim().strip_prefix("objectpath")?.trim())?;
        let interfaces = strip_braces(parts.get(1)?)?;
        // Only the first interface is reported; BlueZ lists Device1 first.
        let entry = split_top_level(interfaces).into_iter().next()?;
        let (interface, properties) = entry.split_once(':')?;
        return Some(PropertyChange {
            path: path.to_string(),
            interface: unquote(interface.trim())?.to_string(),
            changed: parse_property_blob(properties.trim()),
        });
    }

    None
}

/// Parse a printed `a{sv}` such as `{'Connected': <true>, 'Name': <'iPad'>}`.
pub fn parse_property_blob(blob: &str) -> Vec<(String, PropertyValue)> {
    let Some(inner) = strip_braces(blob.trim()) else {
        return Vec::new();
    };

    split_top_level(inner)
        .into_iter()
        .filter_map(|entry| {
            let (key, value) = entry.split_once(": ")?;
            let key = unquote(key.trim())?;
            let value = value.trim();
            let value = value
                .strip_prefix('<')
                .and_then(|v| v.strip_suffix('>'))
                .unwrap_or(value);
            Some((key.to_string(), parse_value(value.trim())))
        })
        .collect()
}

/// Parse the printed reply of `Properties.GetAll`, `({...},)`.
pub fn parse_get_all_output(output: &str) -> Vec<(String, PropertyValue)> {
    let trimmed = output.trim();
    let inner = strip_parens(trimmed).unwrap_or(trimmed);
    let inner = inner.trim().trim_end_matches(',');
    parse_property_blob(inner)
}

/// Parse one printed GVariant value.
pub fn parse_value(text: &str) -> PropertyValue {
    match text {
        "true" => return PropertyValue::Bool(true),
        "false" => return PropertyValue::Bool(false),
        "@as []" | "[]" => return PropertyValue::StrArray(Vec::new()),
        _ => {}
    }

    if let Some(s) = unquote(text) {
        return PropertyValue::Str(unescape(s));
    }

    if let Some((type_name, literal)) = text.split_once(' ') {
        let literal = literal.trim();
        let parsed = match type_name {
            "objectpath" => unquote(literal).map(|p| PropertyValue::ObjectPath(p.to_string())),
            "byte" => parse_byte(literal).map(PropertyValue::U8),
            "uint16" => literal.parse().ok().map(PropertyValue::U16),
            "int16" => literal.parse().ok().map(PropertyValue::I16),
            "uint32" => literal.parse().ok().map(PropertyValue::U32),
            "int32" => literal.parse().ok().map(PropertyValue::I32),
            _ => None,
        };
        if let Some(value) = parsed {
            return value;
        }
    }

    if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        let items: Option<Vec<String>> = split_top_level(inner)
            .into_iter()
            .map(|item| unquote(item.trim()).map(unescape))
            .collect();
        if let Some(items) = items {
            return PropertyValue::StrArray(items);
        }
    }

    PropertyValue::Other(text.to_string())
}

fn parse_byte(literal: &str) -> Option<u8> {
    match literal.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => literal.parse().ok(),
    }
}

/// Strip GVariant string quotes. Strings that contain `'` are printed in
/// double quotes.
fn unquote(text: &str) -> Option<&str> {
    let quote = text.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    text.strip_prefix(quote)?.strip_suffix(quote)
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            _ => out.push(c),
        }
    }
    out
}

fn strip_parens(text: &str) -> Option<&str> {
    text.strip_prefix('(')?.strip_suffix(')')
}

fn strip_braces(text: &str) -> Option<&str> {
    text.strip_prefix('{')?.strip_suffix('}')
}

/// Split on commas that are not nested in brackets or quotes.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if let Some(open) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                _ if c == open => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth == 0 => {
                let part = text[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
    }

    let last = text[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

/// Command line of the monitor process.
pub fn monitor_command() -> Command {
    let mut command = Command::new("gdbus");
    command
        .args(["monitor", "--system", "--dest", BLUEZ_SERVICE])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    command
}

/// Spawn `gdbus monitor` and stream the changes it reports. The child is
/// killed when the stream is dropped.
pub fn spawn_monitor() -> Result<PropertyChangeStream> {
    let mut child = monitor_command()
        .spawn()
        .map_err(|e| Error::Bus(format!("Failed to start gdbus monitor: {}", e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Bus("gdbus monitor has no stdout".to_string()))?;
    info!("Listening to BlueZ through gdbus monitor");

    let lines = BufReader::new(stdout).lines();
    Ok(Box::pin(stream::unfold(
        (lines, child),
        |(mut lines, child): (_, Child)| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(change) = parse_line(&line) {
                            return Some((change, (lines, child)));
                        }
                        debug!("Ignoring monitor line: {}", line);
                    }
                    Ok(None) => {
                        warn!("gdbus monitor exited");
                        return None;
                    }
                    Err(e) => {
                        warn!("Error reading gdbus monitor output: {}", e);
                        return None;
                    }
                }
            }
        },
    )))
}

/// Reads `org.bluez.Device1` properties by running `gdbus call … GetAll`.
#[derive(Debug, Clone)]
pub struct GdbusDeviceReader {
    timeout: Duration,
}

impl GdbusDeviceReader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Command line fetching every device property of `device_path`.
    pub fn get_all_command(device_path: &str) -> Command {
        let mut command = Command::new("gdbus");
        command
            .args([
                "call",
                "--system",
                "--dest",
                BLUEZ_SERVICE,
                "--object-path",
                device_path,
                "--method",
                "org.freedesktop.DBus.Properties.GetAll",
                iface::DEVICE,
            ])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Raw `GetAll` reply text for `device_path`.
    pub async fn get_all_output(&self, device_path: &str) -> Result<String> {
        let operation = format!("gdbus GetAll on {}", device_path);
        let output = bounded(self.timeout, &operation, async {
            Self::get_all_command(device_path)
                .output()
                .await
                .map_err(|e| Error::Bus(format!("Failed to run gdbus call: {}", e)))
        })
        .await?;

        if !output.status.success() {
            return Err(Error::PropertyLookup {
                property: "*".to_string(),
                path: device_path.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DeviceReader for GdbusDeviceReader {
    async fn get_property(&self, device_path: &str, name: &str) -> Result<PropertyValue> {
        let output = self.get_all_output(device_path).await?;
        property_from_get_all(&output, device_path, name)
    }
}

/// Pick `name` out of a printed `GetAll` reply.
pub fn property_from_get_all(output: &str, device_path: &str, name: &str) -> Result<PropertyValue> {
    parse_get_all_output(output)
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
        .ok_or_else(|| Error::PropertyLookup {
            property: name.to_string(),
            path: device_path.to_string(),
            reason: "not in GetAll reply".to_string(),
        })
}
