// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request Encoder & Reply Tracker.
//!
//! This module builds outbound batches ([`wire`]), tracks them until their
//! replies arrive ([`tracker`]), and parses inbound `reply/`/`notify/`
//! topics back into structured data.

pub mod tracker;
pub mod wire;

pub use tracker::{CorrelationKey, OutboundRequest, ReplyTracker, RequestData};
pub use wire::WireCommand;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;

/// One command's reply inside a `reply/TTTT` batch.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandReply {
    /// Whether the command succeeded.
    pub success: bool,
    /// Output parameters, if any.
    #[serde(default)]
    pub params: Option<Value>,
    /// Cloud-side error codes, if the command failed.
    #[serde(rename = "errorCodes", default)]
    pub error_codes: Option<Vec<i32>>,
}

/// Cloud-side sentinel for "file not found" on a file-related reply. The
/// only inbound error code this module gives special meaning to; every
/// other failure is reported as a plain failure.
const FILE_NOT_FOUND_SENTINEL: i32 = -90_008;

impl CommandReply {
    /// This reply's status: `Success` if the command succeeded, `NotFound`
    /// if it failed with the file-not-found sentinel, otherwise `Failure`.
    ///
    /// Unlike [`crate::error::StatusCode::as_cloud_code`] (an identity
    /// mapping used for *outbound* status reporting), inbound replies don't
    /// otherwise interpret cloud error codes — a reply failing with
    /// `errorCodes: [5]` is a `Failure`, not an `Exists`.
    #[must_use]
    pub fn status(&self) -> crate::error::StatusCode {
        if self.success {
            return crate::error::StatusCode::Success;
        }
        let not_found = self
            .error_codes
            .as_ref()
            .is_some_and(|codes| codes.contains(&FILE_NOT_FOUND_SENTINEL));
        if not_found {
            crate::error::StatusCode::NotFound
        } else {
            crate::error::StatusCode::Failure
        }
    }
}

/// Parses a `reply/TTTT` payload into its per-index command replies.
///
/// # Errors
///
/// Returns [`ParseError::Json`] if the payload is not valid JSON, or
/// [`ParseError::UnexpectedFormat`] if a key is not a positive integer.
pub fn parse_reply_batch(payload: &str) -> Result<BTreeMap<u32, CommandReply>, ParseError> {
    let raw: BTreeMap<String, CommandReply> = serde_json::from_str(payload)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.parse::<u32>()
                .map(|idx| (idx, v))
                .map_err(|_| ParseError::UnexpectedFormat(format!("non-numeric reply index {k}")))
        })
        .collect()
}

/// Extracts the topic counter from a `reply/TTTT` topic, e.g.
/// `reply/0007` → `Some(7)`.
#[must_use]
pub fn parse_reply_topic(topic: &str) -> Option<u32> {
    topic.strip_prefix("reply/").and_then(|s| s.parse().ok())
}

/// Extracts the event name from a `notify/<event>` topic, e.g.
/// `notify/mailbox_activity` → `Some("mailbox_activity")`.
#[must_use]
pub fn parse_notify_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix("notify/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reply_batch_by_index() {
        let payload = r#"{"1":{"success":true},"2":{"success":false,"errorCodes":[12]}}"#;
        let replies = parse_reply_batch(payload).unwrap();
        assert!(replies[&1].success);
        assert!(!replies[&2].success);
        assert_eq!(replies[&2].error_codes.as_ref().unwrap(), &[12]);
    }

    #[test]
    fn command_reply_status_success() {
        let reply = CommandReply {
            success: true,
            params: None,
            error_codes: None,
        };
        assert_eq!(reply.status(), crate::error::StatusCode::Success);
    }

    #[test]
    fn command_reply_status_file_not_found_sentinel() {
        let reply = CommandReply {
            success: false,
            params: None,
            error_codes: Some(vec![-90_008]),
        };
        assert_eq!(reply.status(), crate::error::StatusCode::NotFound);
    }

    #[test]
    fn command_reply_status_other_codes_map_to_failure() {
        let reply = CommandReply {
            success: false,
            params: None,
            error_codes: Some(vec![12]),
        };
        assert_eq!(reply.status(), crate::error::StatusCode::Failure);
    }

    #[test]
    fn command_reply_status_missing_codes_map_to_failure() {
        let reply = CommandReply {
            success: false,
            params: None,
            error_codes: None,
        };
        assert_eq!(reply.status(), crate::error::StatusCode::Failure);
    }

    #[test]
    fn parses_reply_topic_counter() {
        assert_eq!(parse_reply_topic("reply/0007"), Some(7));
        assert_eq!(parse_reply_topic("api/0007"), None);
    }

    #[test]
    fn parses_notify_topic_event() {
        assert_eq!(
            parse_notify_topic("notify/mailbox_activity"),
            Some("mailbox_activity")
        );
    }
}
