// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-format command builders for the cloud's batched JSON-RPC-over-MQTT
//! protocol.
//!
//! Every outbound operation is one `WireCommand` inside a batch of the shape
//! `{ "1": {"command": ..., "params": {...}}, "2": ... }`. Parameter keys
//! follow the cloud's camelCase convention and are omitted when absent.

use serde_json::{Map, Value};

/// A single command inside an outbound batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WireCommand {
    /// The opcode, e.g. `"property.publish"`.
    pub command: &'static str,
    /// The command's parameters, already camelCased and null-filtered.
    pub params: Map<String, Value>,
}

impl WireCommand {
    fn new(command: &'static str, params: Map<String, Value>) -> Self {
        Self { command, params }
    }

    /// Serializes this command to `{"command": ..., "params": {...}}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(Map::from_iter([
            ("command".to_string(), Value::String(self.command.to_string())),
            ("params".to_string(), Value::Object(self.params.clone())),
        ]))
    }
}

/// Builds a parameter map from `(key, value)` pairs, dropping any pair
/// whose value is `None`.
fn params(pairs: impl IntoIterator<Item = (&'static str, Option<Value>)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v)))
        .collect()
}

/// Batches commands into the outbound request envelope
/// `{ "1": cmd1, "2": cmd2, ... }`, 1-based.
#[must_use]
pub fn generate_request(commands: &[WireCommand]) -> Value {
    let mut batch = Map::with_capacity(commands.len());
    for (idx, command) in commands.iter().enumerate() {
        batch.insert((idx + 1).to_string(), command.to_value());
    }
    Value::Object(batch)
}

/// `alarm.publish`
#[must_use]
pub fn create_alarm_publish(
    thing_key: &str,
    name: &str,
    state: i64,
    message: Option<&str>,
    timestamp: &str,
) -> WireCommand {
    WireCommand::new(
        "alarm.publish",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("key", Some(Value::String(name.to_string()))),
            ("state", Some(Value::from(state))),
            ("msg", message.map(|m| Value::String(m.to_string()))),
            ("ts", Some(Value::String(timestamp.to_string()))),
        ]),
    )
}

/// `attribute.publish`
#[must_use]
pub fn create_attribute_publish(
    thing_key: &str,
    name: &str,
    value: &str,
    timestamp: &str,
) -> WireCommand {
    WireCommand::new(
        "attribute.publish",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("key", Some(Value::String(name.to_string()))),
            ("value", Some(Value::String(value.to_string()))),
            ("ts", Some(Value::String(timestamp.to_string()))),
        ]),
    )
}

/// `property.publish` (telemetry)
#[must_use]
pub fn create_telemetry_publish(
    thing_key: &str,
    name: &str,
    value: f64,
    timestamp: &str,
) -> WireCommand {
    WireCommand::new(
        "property.publish",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("key", Some(Value::String(name.to_string()))),
            ("value", Some(Value::from(value))),
            ("ts", Some(Value::String(timestamp.to_string()))),
        ]),
    )
}

/// `location.publish`
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn create_location_publish(
    thing_key: &str,
    latitude: f64,
    longitude: f64,
    heading: Option<f64>,
    altitude: Option<f64>,
    speed: Option<f64>,
    accuracy: Option<f64>,
    fix_type: Option<&str>,
    timestamp: &str,
) -> WireCommand {
    WireCommand::new(
        "location.publish",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("lat", Some(Value::from(latitude))),
            ("lng", Some(Value::from(longitude))),
            ("heading", heading.map(Value::from)),
            ("altitude", altitude.map(Value::from)),
            ("speed", speed.map(Value::from)),
            ("fixAcc", accuracy.map(Value::from)),
            ("fixType", fix_type.map(|s| Value::String(s.to_string()))),
            ("ts", Some(Value::String(timestamp.to_string()))),
        ]),
    )
}

/// `log.publish` (event)
#[must_use]
pub fn create_event_publish(thing_key: &str, message: &str, timestamp: &str) -> WireCommand {
    WireCommand::new(
        "log.publish",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("msg", Some(Value::String(message.to_string()))),
            ("ts", Some(Value::String(timestamp.to_string()))),
        ]),
    )
}

/// `file.get`
#[must_use]
pub fn create_file_get(thing_key: &str, file_name: &str, global: bool) -> WireCommand {
    WireCommand::new(
        "file.get",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("fileName", Some(Value::String(file_name.to_string()))),
            ("global", Some(Value::Bool(global))),
        ]),
    )
}

/// `file.put`
#[must_use]
pub fn create_file_put(thing_key: &str, file_name: &str, crc32: u32, global: bool) -> WireCommand {
    WireCommand::new(
        "file.put",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("fileName", Some(Value::String(file_name.to_string()))),
            ("crc32", Some(Value::from(crc32))),
            ("global", Some(Value::Bool(global))),
        ]),
    )
}

/// `mailbox.check`
#[must_use]
pub fn create_mailbox_check(thing_key: &str, auto_complete: bool) -> WireCommand {
    WireCommand::new(
        "mailbox.check",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("autoComplete", Some(Value::Bool(auto_complete))),
        ]),
    )
}

/// `mailbox.ack`
#[must_use]
pub fn create_mailbox_ack(
    thing_key: &str,
    mail_id: &str,
    error_code: i32,
    error_message: &str,
    params_out: Option<Value>,
) -> WireCommand {
    WireCommand::new(
        "mailbox.ack",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("id", Some(Value::String(mail_id.to_string()))),
            ("errorCode", Some(Value::from(error_code))),
            (
                "errorMessage",
                Some(Value::String(error_message.to_string())),
            ),
            ("params", params_out),
        ]),
    )
}

/// `mailbox.update` (progress report)
#[must_use]
pub fn create_mailbox_update(thing_key: &str, mail_id: &str, message: &str) -> WireCommand {
    WireCommand::new(
        "mailbox.update",
        params([
            ("thingKey", Some(Value::String(thing_key.to_string()))),
            ("id", Some(Value::String(mail_id.to_string()))),
            ("msg", Some(Value::String(message.to_string()))),
        ]),
    )
}

/// `diag.ping`
#[must_use]
pub fn create_diag_ping(thing_key: &str) -> WireCommand {
    WireCommand::new(
        "diag.ping",
        params([("thingKey", Some(Value::String(thing_key.to_string())))]),
    )
}

/// `diag.time`
#[must_use]
pub fn create_diag_time(thing_key: &str) -> WireCommand {
    WireCommand::new(
        "diag.time",
        params([("thingKey", Some(Value::String(thing_key.to_string())))]),
    )
}
