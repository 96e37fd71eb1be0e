// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session Manager: the connection state machine and the single driver
//! loop that pumps reconnection and publish flushing.
//!
//! Exactly one driver task mutates [`ConnectionState`]; everyone else reads
//! it through a `parking_lot::RwLock` without blocking, the way
//! `managed_device.rs` holds its `ConnectionState` for the same reason.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;

use crate::config::ClientConfig;
use crate::error::{ProtocolError, StatusCode};
use crate::publish::PublishQueue;
use crate::rpc::tracker::{CorrelationKey, OutboundRequest, ReplyTracker, RequestData};
use crate::rpc::wire::{create_diag_ping, create_diag_time, WireCommand};
use crate::transport::Transport;
use crate::work::{WorkItem, WorkQueue};

/// The connection's lifecycle state. Initial: [`ConnectionState::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No broker connection.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and able to publish/subscribe.
    Connected,
}

/// Owns the broker connection, the Reply Tracker, and the driver loop.
pub struct Session {
    config: ClientConfig,
    transport: RwLock<Option<Transport>>,
    tracker: ReplyTracker,
    state: RwLock<ConnectionState>,
    last_connected: RwLock<Option<Instant>>,
    quit: Arc<AtomicBool>,
    work_queue: WorkQueue,
    publish_queue: Arc<PublishQueue>,
}

impl Session {
    /// Creates a session bound to `config`, sharing the given work queue
    /// handle and publish queue with the rest of the Client Facade.
    #[must_use]
    pub fn new(config: ClientConfig, work_queue: WorkQueue, publish_queue: Arc<PublishQueue>) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport: RwLock::new(None),
            tracker: ReplyTracker::new(),
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected: RwLock::new(None),
            quit: Arc::new(AtomicBool::new(false)),
            work_queue,
            publish_queue,
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// True if [`Session::state`] is [`ConnectionState::Connected`].
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True if the session has not been told to shut down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.quit.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::info!(?previous, ?state, "connection state transition");
        }
    }

    /// Opens the broker connection and starts the driver loop, blocking up
    /// to `timeout` (zero = unbounded) for the first CONNACK.
    ///
    /// Returns [`StatusCode::Success`], [`StatusCode::TimedOut`], or
    /// [`StatusCode::Failure`]/[`StatusCode::BadParameter`]/
    /// [`StatusCode::NotFound`] depending on how the attempt failed.
    pub async fn connect(self: &Arc<Self>, timeout: Duration) -> StatusCode {
        self.set_state(ConnectionState::Connecting);

        let wait = if timeout.is_zero() {
            Duration::from_secs(60 * 60 * 24)
        } else {
            timeout
        };

        match Transport::connect(&self.config, wait).await {
            Ok((transport, inbound_rx)) => {
                if let Err(e) = transport.subscribe("reply/+").await {
                    tracing::error!(error = %e, "failed to subscribe to reply topic");
                    self.set_state(ConnectionState::Disconnected);
                    return StatusCode::Failure;
                }
                if let Err(e) = transport.subscribe("notify/+").await {
                    tracing::error!(error = %e, "failed to subscribe to notify topic");
                    self.set_state(ConnectionState::Disconnected);
                    return StatusCode::Failure;
                }

                *self.transport.write() = Some(transport);
                *self.last_connected.write() = Some(Instant::now());
                self.set_state(ConnectionState::Connected);
                self.spawn_inbound_router(inbound_rx);
                self.spawn_driver_loop();
                StatusCode::Success
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                protocol_error_to_status(&e)
            }
        }
    }

    /// Drains the publish queue, optionally waits for the Reply Tracker to
    /// empty, then closes the transport and stops the driver loop.
    pub async fn disconnect(self: &Arc<Self>, wait_for_replies: bool, timeout: Duration) -> StatusCode {
        self.quit.store(true, Ordering::Release);
        let _ = self.work_queue.enqueue(WorkItem::FlushPublish).await;

        if wait_for_replies {
            let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
            while !self.tracker.is_empty().await {
                if let Some(deadline) = deadline
                    && Instant::now() >= deadline
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        if let Some(transport) = self.transport.write().take() {
            let _ = transport.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);

        for request in self.tracker.drain_unanswered().await {
            log_unanswered(&request);
        }

        StatusCode::Success
    }

    /// Sends a batch of commands through the Reply Tracker and the
    /// Transport Adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ConnectionFailed`] if no transport is
    /// currently attached.
    pub async fn send_batch(
        &self,
        commands: Vec<(WireCommand, String, Option<RequestData>)>,
    ) -> Result<u32, ProtocolError> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or_else(|| ProtocolError::ConnectionFailed("session is not connected".to_string()))?;

        self.tracker
            .send_batch(commands, Utc::now(), move |topic, body| {
                let transport = transport.clone();
                async move { transport.publish(topic, body).await }
            })
            .await
    }

    /// Consumes the outstanding request under `key`, if any, for the Client
    /// Facade's reply routing.
    pub async fn consume_reply(&self, key: CorrelationKey) -> Option<OutboundRequest> {
        self.tracker.consume(key).await
    }

    /// This session's thing key, used as the MQTT username and as the
    /// `thingKey` parameter on every outbound command.
    #[must_use]
    pub fn thing_key(&self) -> &str {
        self.config.thing_key()
    }

    /// The work queue handle, shared with the rest of the Client Facade.
    #[must_use]
    pub fn work_queue(&self) -> &WorkQueue {
        &self.work_queue
    }

    /// The publish queue handle, shared with the rest of the Client Facade.
    #[must_use]
    pub fn publish_queue(&self) -> &Arc<PublishQueue> {
        &self.publish_queue
    }

    /// The broker host, used by the File Transfer Engine to build its
    /// `https://<host>/file/<id>` URLs.
    #[must_use]
    pub fn broker_host(&self) -> &str {
        self.config.broker_host()
    }

    /// The configuration this session was built from.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Issues a `diag.ping`. The reply is not surfaced to the application;
    /// it is logged at `debug!` wherever the reply is routed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the session is not connected.
    pub async fn ping_diagnostic(&self) -> Result<(), ProtocolError> {
        let command = create_diag_ping(self.thing_key());
        self.send_batch(vec![(command, "diag.ping".to_string(), None)])
            .await
            .map(|_| ())
    }

    /// Issues a `diag.time`. See [`Session::ping_diagnostic`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] if the session is not connected.
    pub async fn time_diagnostic(&self) -> Result<(), ProtocolError> {
        let command = create_diag_time(self.thing_key());
        self.send_batch(vec![(command, "diag.time".to_string(), None)])
            .await
            .map(|_| ())
    }

    fn spawn_inbound_router(self: &Arc<Self>, mut inbound_rx: tokio::sync::mpsc::Receiver<crate::transport::InboundMessage>) {
        let work_queue = self.work_queue.clone();
        tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                let item = WorkItem::InboundMessage {
                    topic: message.topic,
                    payload: message.payload,
                };
                if work_queue.enqueue(item).await.is_err() {
                    break;
                }
            }
        });
    }

    fn spawn_driver_loop(self: &Arc<Self>) {
        let session = self.clone();
        tokio::spawn(async move { session.driver_loop().await });
    }

    async fn driver_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.loop_time()).await;

            if self.quit.load(Ordering::Acquire) {
                break;
            }

            let transport_connected = self.transport.read().as_ref().is_some_and(Transport::is_connected);

            if !transport_connected {
                if self.state() == ConnectionState::Connected {
                    self.set_state(ConnectionState::Disconnected);
                }

                if self.reconnect_budget_exceeded() {
                    tracing::error!("reconnect budget exceeded, giving up");
                    self.quit.store(true, Ordering::Release);
                    break;
                }

                tracing::warn!("attempting reconnect");
                self.set_state(ConnectionState::Connecting);
                match Transport::connect(&self.config, self.config.loop_time()).await {
                    Ok((transport, inbound_rx)) => {
                        let _ = transport.subscribe("reply/+").await;
                        let _ = transport.subscribe("notify/+").await;
                        *self.transport.write() = Some(transport);
                        *self.last_connected.write() = Some(Instant::now());
                        self.set_state(ConnectionState::Connected);
                        self.spawn_inbound_router(inbound_rx);
                        tracing::info!("reconnected");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reconnect attempt failed");
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
                continue;
            }

            if !self.publish_queue.is_empty() {
                let _ = self.work_queue.enqueue(WorkItem::FlushPublish).await;
            }
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        for request in self.tracker.drain_unanswered().await {
            log_unanswered(&request);
        }
    }

    fn reconnect_budget_exceeded(&self) -> bool {
        let Some(budget) = self.config.keep_alive_budget() else {
            return false;
        };
        self.last_connected
            .read()
            .is_some_and(|last| last.elapsed() > budget)
    }
}

fn log_unanswered(request: &OutboundRequest) {
    tracing::warn!(
        correlation_key = %request.correlation_key,
        description = %request.description,
        "unanswered request at shutdown"
    );
}

fn protocol_error_to_status(error: &ProtocolError) -> StatusCode {
    match error {
        ProtocolError::ProxyUnsupported(_) => StatusCode::BadParameter,
        ProtocolError::TlsConfig(_) => StatusCode::NotFound,
        ProtocolError::ConnectionFailed(message) if message.contains("timed out") => {
            StatusCode::TimedOut
        }
        _ => StatusCode::Failure,
    }
}
