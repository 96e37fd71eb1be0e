// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Client Facade: the application-facing entry point composing the Session
//! Manager, Publish Queue, Work Dispatcher, Action Registry, and File
//! Transfer Engine.
//!
//! Mirrors `device.rs`'s `Device<P>` composition: one struct holding every
//! subsystem, with the facade itself doing the routing a protocol handler
//! would otherwise need direct access to each subsystem for.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::Client as HttpClient;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::action::{ActionOutcome, ActionRegistry, ActionRequest, HandlerKind, UserData};
use crate::config::ClientConfig;
use crate::error::{ActionError, ClientError, StatusCode};
use crate::file_transfer::{self, CompletionCallback, FileTransfer, build_http_client};
use crate::mailbox;
use crate::publish::PublishItem;
use crate::rpc::{self, CommandReply, CorrelationKey, RequestData};
use crate::rpc::wire::{create_file_get, create_file_put};
use crate::session::Session;
use crate::work::{WorkItem, WorkQueue, run_worker_pool};

/// Default capacity of the bounded work queue between the inbound router
/// and the worker pool.
const WORK_QUEUE_CAPACITY: usize = 256;

/// Composes every subsystem behind the operations an application calls.
pub struct Client {
    session: Arc<Session>,
    actions: Arc<ActionRegistry>,
    http_client: HttpClient,
    pending_downloads: Mutex<HashMap<String, Arc<FileTransfer>>>,
    pending_uploads: Mutex<HashMap<String, Arc<FileTransfer>>>,
    work_rx: tokio::sync::Mutex<Option<mpsc::Receiver<WorkItem>>>,
    quit: Arc<AtomicBool>,
}

impl Client {
    /// Builds a client from `config`. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileTransfer`] if the HTTP client for the file
    /// service cannot be built from the configured TLS policy.
    pub fn new(config: ClientConfig) -> Result<Arc<Self>, ClientError> {
        let http_client = build_http_client(config.tls())?;
        let (work_queue, work_rx) = WorkQueue::new(WORK_QUEUE_CAPACITY);
        let publish_queue = Arc::new(crate::publish::PublishQueue::new());
        let session = Session::new(config, work_queue, publish_queue);

        Ok(Arc::new(Self {
            session,
            actions: Arc::new(ActionRegistry::new()),
            http_client,
            pending_downloads: Mutex::new(HashMap::new()),
            pending_uploads: Mutex::new(HashMap::new()),
            work_rx: tokio::sync::Mutex::new(Some(work_rx)),
            quit: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Opens the connection and, on success, starts the worker pool that
    /// drains the work queue.
    pub async fn connect(self: &Arc<Self>, timeout: Duration) -> StatusCode {
        let status = self.session.connect(timeout).await;
        if status != StatusCode::Success {
            return status;
        }

        let Some(rx) = self.work_rx.lock().await.take() else {
            return status;
        };

        let worker_count = self.session.config().worker_count();
        let tick = self.session.config().loop_time();
        let quit = self.quit.clone();
        let client = self.clone();

        tokio::spawn(async move {
            run_worker_pool(rx, worker_count, tick, quit, move |item| {
                let client = client.clone();
                async move { client.handle_work_item(item).await }
            })
            .await;
        });

        status
    }

    /// Stops the worker pool, drains the publish queue, and closes the
    /// connection. See [`Session::disconnect`].
    pub async fn disconnect(&self, wait_for_replies: bool, timeout: Duration) -> StatusCode {
        self.quit.store(true, Ordering::Release);
        self.session.disconnect(wait_for_replies, timeout).await
    }

    /// True if the broker connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// True if neither the session nor this facade has been told to shut
    /// down.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.session.is_alive() && !self.quit.load(Ordering::Acquire)
    }

    /// Registers a handler under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Exists`] if `name` is already registered.
    pub fn register_callback(
        &self,
        name: impl Into<String>,
        handler: HandlerKind,
        user_data: Option<UserData>,
    ) -> Result<(), ActionError> {
        self.actions.register(name, handler, user_data)
    }

    /// Registers a subprocess action under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Exists`] if `name` is already registered.
    pub fn register_command(&self, name: impl Into<String>, argv: Vec<String>) -> Result<(), ActionError> {
        self.actions.register_command(name, argv)
    }

    /// Removes the handler bound to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotFound`] if no handler is registered.
    pub fn deregister(&self, name: &str) -> Result<(), ActionError> {
        self.actions.deregister(name)
    }

    /// Sends the terminal `mailbox.ack` for a mail id whose handler
    /// returned [`StatusCode::Invoked`] and is now reporting its real
    /// result out of band.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if the session is not connected.
    pub async fn acknowledge(&self, mail_id: &str, outcome: &ActionOutcome) -> Result<(), ClientError> {
        let command = mailbox::report_result(self.session.thing_key(), mail_id, outcome);
        self.session
            .send_batch(vec![(command, "mailbox.ack".to_string(), None)])
            .await?;
        Ok(())
    }

    /// Sends a `mailbox.update` progress report for a still-running action.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if the session is not connected.
    pub async fn progress_update(&self, mail_id: &str) -> Result<(), ClientError> {
        let command = mailbox::report_invoked(self.session.thing_key(), mail_id);
        self.session
            .send_batch(vec![(command, "mailbox.update".to_string(), None)])
            .await?;
        Ok(())
    }

    /// Queues a numeric telemetry sample.
    pub async fn publish_telemetry(&self, name: impl Into<String>, value: f64) {
        self.queue_publish(PublishItem::Telemetry {
            name: name.into(),
            value,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Queues a string-valued attribute.
    pub async fn publish_attribute(&self, name: impl Into<String>, value: impl Into<String>) {
        self.queue_publish(PublishItem::Attribute {
            name: name.into(),
            value: value.into(),
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Queues an alarm. Alarms trigger an immediate flush rather than
    /// waiting for the driver loop's end-of-tick flush.
    pub async fn publish_alarm(&self, name: impl Into<String>, state: i64, message: Option<String>) {
        self.queue_publish(PublishItem::Alarm {
            name: name.into(),
            state,
            message,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Queues a location fix.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish_location(
        &self,
        latitude: f64,
        longitude: f64,
        heading: Option<f64>,
        altitude: Option<f64>,
        speed: Option<f64>,
        accuracy: Option<f64>,
        fix_type: Option<String>,
    ) {
        self.queue_publish(PublishItem::Location {
            latitude,
            longitude,
            heading,
            altitude,
            speed,
            accuracy,
            fix_type,
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Queues a free-text log event.
    pub async fn publish_event(&self, message: impl Into<String>) {
        self.queue_publish(PublishItem::Event {
            message: message.into(),
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Requests a file download. The transfer starts once the cloud's
    /// `file.get` reply attaches a file id; track its progress with
    /// [`FileTransfer::wait`] or the `callback` passed here.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Protocol`] if the session is not connected.
    pub async fn file_download(
        &self,
        name: impl Into<String>,
        destination: impl Into<PathBuf>,
        global: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<Arc<FileTransfer>, ClientError> {
        let name = name.into();
        let transfer = FileTransfer::download(name.clone(), destination, global, callback);
        self.pending_downloads.lock().insert(name.clone(), transfer.clone());

        let command = create_file_get(self.session.thing_key(), &name, global);
        self.session
            .send_batch(vec![(
                command,
                format!("file.get:{name}"),
                Some(RequestData::FileDownload(name)),
            )])
            .await?;
        Ok(transfer)
    }

    /// Requests a file upload from an existing absolute local path.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::FileTransfer`] if `local_path` is not an
    /// existing absolute path, or [`ClientError::Protocol`] if the session
    /// is not connected.
    pub async fn file_upload(
        &self,
        name: impl Into<String>,
        local_path: impl Into<PathBuf>,
        global: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<Arc<FileTransfer>, ClientError> {
        let name = name.into();
        let transfer = FileTransfer::upload(name.clone(), local_path, global, callback)?;
        self.pending_uploads.lock().insert(name.clone(), transfer.clone());

        let crc32 = transfer.local_crc32.unwrap_or(0);
        let command = create_file_put(self.session.thing_key(), &name, crc32, global);
        self.session
            .send_batch(vec![(
                command,
                format!("file.put:{name}"),
                Some(RequestData::FileUpload(name)),
            )])
            .await?;
        Ok(transfer)
    }

    async fn queue_publish(&self, item: PublishItem) {
        let immediate = self.session.publish_queue().queue_publish(item);
        if immediate && self.session.work_queue().enqueue(WorkItem::FlushPublish).await.is_err() {
            tracing::debug!("work queue closed, dropping immediate flush request");
        }
    }

    /// Drains the Publish Queue and sends the batch over the session.
    /// A no-op if the queue is empty or the session is not connected.
    async fn flush_publish(&self) {
        let Some(commands) = self.session.publish_queue().drain_encoded(self.session.thing_key()) else {
            return;
        };

        if let Err(e) = self.session.send_batch(commands).await {
            tracing::warn!(error = %e, "failed to flush publish queue");
        }
    }

    async fn handle_work_item(&self, item: WorkItem) {
        match item {
            WorkItem::InboundMessage { topic, payload } => self.handle_inbound(&topic, &payload).await,
            WorkItem::FlushPublish => self.flush_publish().await,
            WorkItem::ActionRequest(request) => self.handle_action_request(request).await,
            WorkItem::FileDownload(transfer) => {
                if let Err(e) = file_transfer::run_download(&transfer, &self.http_client, self.session.broker_host()).await {
                    tracing::warn!(error = %e, name = %transfer.name, "download worker failed");
                }
            }
            WorkItem::FileUpload(transfer) => {
                if let Err(e) = file_transfer::run_upload(&transfer, &self.http_client, self.session.broker_host()).await {
                    tracing::warn!(error = %e, name = %transfer.name, "upload worker failed");
                }
            }
        }
    }

    async fn handle_inbound(&self, topic: &str, payload: &str) {
        if let Some(topic_counter) = rpc::parse_reply_topic(topic) {
            self.handle_reply(topic_counter, payload).await;
        } else if let Some(event) = rpc::parse_notify_topic(topic) {
            self.handle_notify(event).await;
        } else {
            tracing::debug!(topic, "ignoring message on unrecognized topic");
        }
    }

    async fn handle_reply(&self, topic_counter: u32, payload: &str) {
        let replies = match rpc::parse_reply_batch(payload) {
            Ok(replies) => replies,
            Err(e) => {
                tracing::warn!(error = %e, topic_counter, "malformed reply payload");
                return;
            }
        };

        for (index, reply) in replies {
            let key = CorrelationKey { topic_counter, index };
            let Some(request) = self.session.consume_reply(key).await else {
                tracing::debug!(%key, "reply for unknown or already-consumed request");
                continue;
            };
            self.route_reply(&request.description, &request.data, &reply).await;
        }
    }

    async fn route_reply(&self, description: &str, data: &Option<RequestData>, reply: &CommandReply) {
        match description {
            "mailbox.check" => {
                if let Some(params) = &reply.params {
                    for action_request in mailbox::parse_entries(params) {
                        let _ = self
                            .session
                            .work_queue()
                            .enqueue(WorkItem::ActionRequest(action_request))
                            .await;
                    }
                }
            }
            "diag.ping" | "diag.time" => {
                tracing::debug!(status = %reply.status(), description, "diagnostic reply");
            }
            _ => match data {
                Some(RequestData::FileDownload(name)) => self.on_file_reply(name, reply, true).await,
                Some(RequestData::FileUpload(name)) => self.on_file_reply(name, reply, false).await,
                None => {
                    tracing::debug!(status = %reply.status(), description, "publish reply");
                }
            },
        }
    }

    async fn on_file_reply(&self, name: &str, reply: &CommandReply, is_download: bool) {
        let transfer = if is_download {
            self.pending_downloads.lock().remove(name)
        } else {
            self.pending_uploads.lock().remove(name)
        };
        let Some(transfer) = transfer else {
            tracing::warn!(name, "file reply for untracked transfer");
            return;
        };

        if !reply.status().is_ok() {
            transfer.mark_failed(reply.status());
            return;
        }

        let file_id = reply
            .params
            .as_ref()
            .and_then(|p| p.get("fileId"))
            .and_then(Value::as_str);
        let Some(file_id) = file_id else {
            transfer.mark_failed(StatusCode::ParseError);
            return;
        };

        let expected_crc32 = reply
            .params
            .as_ref()
            .and_then(|p| p.get("crc32"))
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        transfer.attach_reply(file_id.to_string(), if is_download { expected_crc32 } else { None });

        let item = if is_download {
            WorkItem::FileDownload(transfer)
        } else {
            WorkItem::FileUpload(transfer)
        };
        let _ = self.session.work_queue().enqueue(item).await;
    }

    async fn handle_notify(&self, event: &str) {
        if event == "mailbox_activity" {
            let command = mailbox::check_command(self.session.thing_key());
            if let Err(e) = self
                .session
                .send_batch(vec![(command, "mailbox.check".to_string(), None)])
                .await
            {
                tracing::warn!(error = %e, "failed to send mailbox.check");
            }
        } else {
            tracing::debug!(event, "ignoring unrecognized notify event");
        }
    }

    async fn handle_action_request(&self, request: ActionRequest) {
        let outcome = self.actions.invoke(&request).await;
        let (command, description) = if outcome.status == StatusCode::Invoked {
            (
                mailbox::report_invoked(self.session.thing_key(), &request.mail_id),
                "mailbox.update",
            )
        } else {
            (
                mailbox::report_result(self.session.thing_key(), &request.mail_id, &outcome),
                "mailbox.ack",
            )
        };

        if let Err(e) = self
            .session
            .send_batch(vec![(command, description.to_string(), None)])
            .await
        {
            tracing::warn!(error = %e, mail_id = %request.mail_id, "failed to report action result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::builder("myapp", "broker.example.com", 1883, "tok")
            .device_id("dev123")
            .build()
            .unwrap()
    }

    #[test]
    fn new_client_starts_disconnected() {
        let client = Client::new(config()).unwrap();
        assert!(!client.is_connected());
        assert!(client.is_alive());
    }

    #[test]
    fn register_and_deregister_round_trip() {
        let client = Client::new(config()).unwrap();
        client.register_command("reboot", vec!["/bin/reboot".to_string()]).unwrap();
        assert!(client.deregister("reboot").is_ok());
        assert!(matches!(client.deregister("reboot"), Err(ActionError::NotFound(_))));
    }

    #[tokio::test]
    async fn disconnect_before_connect_marks_not_alive() {
        let client = Client::new(config()).unwrap();
        let status = client.disconnect(false, Duration::from_millis(10)).await;
        assert_eq!(status, StatusCode::Success);
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn publish_without_connection_just_queues() {
        let client = Client::new(config()).unwrap();
        client.publish_telemetry("temp", 21.5).await;
        assert!(!client.session.publish_queue().is_empty());
    }
}
