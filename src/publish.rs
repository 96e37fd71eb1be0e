// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Publish Queue & Flush: buffers outgoing telemetry/attribute/alarm/
//! location/event reports and encodes them into a single batched request on
//! flush.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::rpc::tracker::RequestData;
use crate::rpc::wire::{
    create_alarm_publish, create_attribute_publish, create_event_publish,
    create_location_publish, create_telemetry_publish, WireCommand,
};

/// One buffered publish, tagged by kind. Every variant carries the UTC
/// timestamp captured at `queue_publish` time.
#[derive(Debug, Clone)]
pub enum PublishItem {
    /// An alarm state change, with an optional message.
    Alarm {
        /// Alarm key.
        name: String,
        /// Alarm state/severity.
        state: i64,
        /// Optional free-text message.
        message: Option<String>,
        /// Enqueue timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A string-valued attribute.
    Attribute {
        /// Attribute key.
        name: String,
        /// Attribute value.
        value: String,
        /// Enqueue timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A numeric telemetry sample.
    Telemetry {
        /// Property key.
        name: String,
        /// Sample value.
        value: f64,
        /// Enqueue timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A location fix.
    Location {
        /// Latitude.
        latitude: f64,
        /// Longitude.
        longitude: f64,
        /// Heading in degrees, if known.
        heading: Option<f64>,
        /// Altitude in meters, if known.
        altitude: Option<f64>,
        /// Speed, if known.
        speed: Option<f64>,
        /// Fix accuracy, if known.
        accuracy: Option<f64>,
        /// Fix type descriptor, if known.
        fix_type: Option<String>,
        /// Enqueue timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A free-text log event.
    Event {
        /// Event message.
        message: String,
        /// Enqueue timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl PublishItem {
    /// Returns true for the variant that should trigger an immediate flush
    /// rather than waiting for the driver loop's end-of-tick flush.
    #[must_use]
    pub fn triggers_immediate_flush(&self) -> bool {
        matches!(self, Self::Alarm { .. })
    }

    fn encode(&self, thing_key: &str) -> WireCommand {
        fn ts(t: &DateTime<Utc>) -> String {
            t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        }

        match self {
            Self::Alarm {
                name,
                state,
                message,
                timestamp,
            } => create_alarm_publish(thing_key, name, *state, message.as_deref(), &ts(timestamp)),
            Self::Attribute {
                name,
                value,
                timestamp,
            } => create_attribute_publish(thing_key, name, value, &ts(timestamp)),
            Self::Telemetry {
                name,
                value,
                timestamp,
            } => create_telemetry_publish(thing_key, name, *value, &ts(timestamp)),
            Self::Location {
                latitude,
                longitude,
                heading,
                altitude,
                speed,
                accuracy,
                fix_type,
                timestamp,
            } => create_location_publish(
                thing_key,
                *latitude,
                *longitude,
                *heading,
                *altitude,
                *speed,
                *accuracy,
                fix_type.as_deref(),
                &ts(timestamp),
            ),
            Self::Event { message, timestamp } => {
                create_event_publish(thing_key, message, &ts(timestamp))
            }
        }
    }
}

/// An unbounded FIFO of buffered publish items.
///
/// Guarded by a `parking_lot::Mutex`: every critical section is a
/// synchronous push/drain, never spanning an `.await`.
#[derive(Default)]
pub struct PublishQueue {
    items: Mutex<Vec<PublishItem>>,
}

impl PublishQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item`. Returns true if this item should trigger an
    /// immediate flush.
    pub fn queue_publish(&self, item: PublishItem) -> bool {
        let immediate = item.triggers_immediate_flush();
        self.items.lock().push(item);
        immediate
    }

    /// Returns true if the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drains every buffered item, encoding each into its wire command and
    /// pairing it with a human-readable description for the Reply Tracker.
    /// Returns `None` if the queue was empty.
    #[must_use]
    pub fn drain_encoded(
        &self,
        thing_key: &str,
    ) -> Option<Vec<(WireCommand, String, Option<RequestData>)>> {
        let drained = std::mem::take(&mut *self.items.lock());
        if drained.is_empty() {
            return None;
        }
        Some(
            drained
                .iter()
                .map(|item| {
                    let command = item.encode(thing_key);
                    let description = format!("{command:?}");
                    (command, description, None)
                })
                .collect(),
        )
    }
}
