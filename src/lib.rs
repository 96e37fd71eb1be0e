// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `cloudlink` - a Rust library connecting a thing to a cloud IoT platform
//! over MQTT, with an HTTP-backed file transfer side channel.
//!
//! The cloud speaks a batched JSON-RPC-over-MQTT protocol: outbound
//! commands are grouped into a numbered batch and published to
//! `api/TTTT`, and the matching `reply/TTTT` carries one reply per batch
//! index. Inbound `notify/<event>` messages drive reactive behavior —
//! most commonly `notify/mailbox_activity`, which triggers a
//! `mailbox.check` and turns each pending entry into an action invocation.
//!
//! # Module map
//!
//! - [`config`] — [`ClientConfig`]/[`ClientConfigBuilder`], TLS and proxy
//!   policy, device-id persistence.
//! - [`transport`] — the Transport Adapter: the live MQTT connection.
//! - [`rpc`] — wire-format command builders, the Reply Tracker, and
//!   reply/notify topic parsing.
//! - [`session`] — the connection state machine and reconnect driver loop.
//! - [`publish`] — the Publish Queue for telemetry/attribute/alarm/
//!   location/event reports.
//! - [`work`] — the Work Dispatcher's bounded queue and worker pool.
//! - [`action`] — the Action Registry invoked by mailbox entries.
//! - [`mailbox`] — the mailbox check/ack/update protocol handler.
//! - [`file_transfer`] — chunked, CRC-32 validated file download/upload.
//! - [`client`] — [`Client`], the facade composing all of the above.
//!
//! # Quick start
//!
//! ```no_run
//! use cloudlink::{Client, ClientConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder("myapp", "broker.example.com", 8883, "token")
//!         .build()?;
//!     let client = Client::new(config)?;
//!
//!     client.connect(Duration::from_secs(30)).await;
//!     client.publish_telemetry("temperature", 21.5).await;
//!     client.disconnect(true, Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod client;
pub mod config;
pub mod error;
pub mod file_transfer;
pub mod mailbox;
pub mod publish;
pub mod rpc;
pub mod session;
pub mod transport;
pub mod work;

pub use action::{ActionOutcome, ActionRegistry, ActionRequest, HandlerKind, UserData};
pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder, ProxyConfig, ProxyKind, TlsPolicy};
pub use error::{ActionError, ClientError, ConfigError, FileTransferError, ParseError, ProtocolError, Result, StatusCode};
pub use file_transfer::{CompletionCallback, Direction, FileTransfer};
pub use publish::{PublishItem, PublishQueue};
pub use session::{ConnectionState, Session};
pub use transport::{InboundMessage, Transport};
pub use work::{WorkItem, WorkQueue};
