// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reply Tracker: correlates inbound replies with outstanding requests.
//!
//! Mirrors `response_collector.rs`'s timeout/collection idiom, but keyed by
//! correlation key rather than topic suffix, and backed by `OutTracker`'s
//! semantics from the original handler: the tracker is drained only at
//! disconnect, never swept on a periodic deadline while connected.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ProtocolError;

use super::wire::{generate_request, WireCommand};

/// Uniquely identifies one command inside one outbound batch:
/// `<topic-counter>-<batch-index>`, 1-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationKey {
    /// Monotonic topic counter for the owning batch.
    pub topic_counter: u32,
    /// 1-based position of the command within the batch.
    pub index: u32,
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{}", self.topic_counter, self.index)
    }
}

/// Opaque attachment carried by an [`OutboundRequest`], letting the File
/// Transfer Engine recognize its own replies without the tracker needing
/// to know about file transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestData {
    /// Reply to a `file.get` request; value is the logical file name.
    FileDownload(String),
    /// Reply to a `file.put` request; value is the logical file name.
    FileUpload(String),
}

/// A request awaiting its reply.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// The wire command that was sent.
    pub command: WireCommand,
    /// Human-readable description, for unanswered-request logging.
    pub description: String,
    /// When the batch containing this request was sent.
    pub sent_at: DateTime<Utc>,
    /// This request's correlation key.
    pub correlation_key: CorrelationKey,
    /// Optional attachment for follow-up work (e.g. a file transfer).
    pub data: Option<RequestData>,
}

#[derive(Debug, Default)]
struct TrackerState {
    next_topic_counter: u32,
    by_key: BTreeMap<CorrelationKey, OutboundRequest>,
    by_mid: HashMap<u16, u32>,
}

/// Correlates outbound requests to inbound replies.
///
/// The send lock ([`ReplyTracker::send_batch`]) is a `tokio::sync::Mutex`
/// because its critical section spans the (fire-and-forget) MQTT publish
/// call — it must never be held across I/O longer than that.
#[derive(Debug, Default)]
pub struct ReplyTracker {
    state: Mutex<TrackerState>,
}

impl ReplyTracker {
    /// Creates an empty tracker with the topic counter starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                next_topic_counter: 1,
                ..TrackerState::default()
            }),
        }
    }

    /// Assigns a topic counter and correlation keys to `commands`,
    /// publishes the batch via `publish`, then inserts every request into
    /// the tracker — all under the send lock, so no reply can be consumed
    /// before its request is tracked.
    ///
    /// `publish` receives the topic (`api/TTTT`) and the batched JSON body,
    /// and must return the broker's message identifier for the publish.
    ///
    /// # Errors
    ///
    /// Propagates whatever `publish` returns.
    pub async fn send_batch<F, Fut>(
        &self,
        commands: Vec<(WireCommand, String, Option<RequestData>)>,
        sent_at: DateTime<Utc>,
        publish: F,
    ) -> Result<u32, ProtocolError>
    where
        F: FnOnce(String, Value) -> Fut,
        Fut: Future<Output = Result<u16, ProtocolError>>,
    {
        let mut state = self.state.lock().await;

        let topic_counter = state.next_topic_counter;
        state.next_topic_counter += 1;

        let wire_commands: Vec<WireCommand> = commands.iter().map(|(c, _, _)| c.clone()).collect();
        let body = generate_request(&wire_commands);
        let topic = format!("api/{topic_counter:04}");

        let mid = publish(topic, body).await?;

        for (index, (command, description, data)) in commands.into_iter().enumerate() {
            let correlation_key = CorrelationKey {
                topic_counter,
                #[allow(clippy::cast_possible_truncation)]
                index: (index + 1) as u32,
            };
            state.by_key.insert(
                correlation_key,
                OutboundRequest {
                    command,
                    description,
                    sent_at,
                    correlation_key,
                    data,
                },
            );
        }
        state.by_mid.insert(mid, topic_counter);

        Ok(topic_counter)
    }

    /// Resolves a broker message identifier to the topic counter it
    /// belongs to, for diagnostics.
    pub async fn resolve_mid(&self, mid: u16) -> Option<u32> {
        self.state.lock().await.by_mid.get(&mid).copied()
    }

    /// Consumes (removes and returns) the request under `key`, if any.
    /// A reply consumes its request exactly once.
    pub async fn consume(&self, key: CorrelationKey) -> Option<OutboundRequest> {
        self.state.lock().await.by_key.remove(&key)
    }

    /// Drains and returns every still-tracked request, in the order they
    /// were sent (topic counter, then index). Called at disconnect; does
    /// not run while the session remains connected (see design notes).
    pub async fn drain_unanswered(&self) -> Vec<OutboundRequest> {
        let mut state = self.state.lock().await;
        std::mem::take(&mut state.by_key)
            .into_values()
            .collect()
    }

    /// Number of requests currently awaiting a reply.
    pub async fn len(&self) -> usize {
        self.state.lock().await.by_key.len()
    }

    /// Returns true if no requests are currently awaiting a reply.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
