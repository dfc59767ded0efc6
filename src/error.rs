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

//! Error types for the peripheral.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the peripheral and its BlueZ helpers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Could not request service name {name}: {reason}")]
    NameRequest { name: String, reason: String },

    #[error("Failed to export {path}: {reason}")]
    Export { path: String, reason: String },

    #[error("Characteristic {node} value is {size} bytes, greater than max buf size of {max_size} bytes")]
    ValueTooLarge {
        node: String,
        size: usize,
        max_size: usize,
    },

    #[error("Unsupported value type: {0}. Values must be bytes, a string, or a boolean")]
    UnsupportedValueType(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Unknown characteristic flag: {0}")]
    UnknownFlag(String),

    #[error("Invalid object path: {0}")]
    InvalidObjectPath(String),

    #[error("Error looking up {property} for {path}: {reason}")]
    PropertyLookup {
        property: String,
        path: String,
        reason: String,
    },

    #[error("Error setting {property} for {path}: {reason}")]
    PropertySet {
        property: String,
        path: String,
        reason: String,
    },

    #[error("Error while calling {method} on {path}: {reason}")]
    MethodCall {
        method: String,
        path: String,
        reason: String,
    },

    #[error("No reply to {method} on {path}")]
    NoReply { method: String, path: String },

    #[error("Timed out after {timeout:?} waiting for {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The daemon's "no reply" class, treated as success-equivalent for registration.
    pub fn is_no_reply(&self) -> bool {
        matches!(self, Error::NoReply { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
