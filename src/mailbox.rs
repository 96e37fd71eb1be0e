// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mailbox Protocol Handler.
//!
//! On `notify/mailbox_activity`, the core issues a `mailbox.check` with
//! auto-complete disabled. Each `method.exec` entry in the reply becomes an
//! [`ActionRequest`] enqueued as work; everything else in the reply is
//! ignored. Progress/result reporting builds the matching `mailbox.update`
//! (fire-and-forget "Invoked") or `mailbox.ack` (terminal) wire commands —
//! never the other way around, since `mailbox.ack` is terminal and would
//! cut off a cloud-side trigger still waiting on progress.

use serde_json::Value;

use crate::action::{ActionOutcome, ActionRequest};
use crate::rpc::wire::{create_mailbox_ack, create_mailbox_update, create_mailbox_check, WireCommand};

/// Builds the `mailbox.check` command issued in response to
/// `notify/mailbox_activity`. Auto-complete is always disabled so that
/// entries remain pending until explicitly acknowledged.
#[must_use]
pub fn check_command(thing_key: &str) -> WireCommand {
    create_mailbox_check(thing_key, false)
}

/// Extracts every `method.exec` entry from a `mailbox.check` reply's
/// `params` into an [`ActionRequest`]. Entries missing `id` or `method` are
/// skipped; anything other than `method.exec` is ignored.
///
/// Each entry's `method`/`params` live one level down, under the entry's own
/// `params` object — not on the entry itself.
#[must_use]
pub fn parse_entries(reply_params: &Value) -> Vec<ActionRequest> {
    let Some(entries) = reply_params.get("messages").and_then(Value::as_array) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter(|entry| entry.get("command").and_then(Value::as_str) == Some("method.exec"))
        .filter_map(|entry| {
            let mail_id = entry.get("id")?.as_str()?.to_string();
            let entry_params = entry.get("params")?;
            let name = entry_params.get("method")?.as_str()?.to_string();
            let params = entry_params.get("params").cloned().unwrap_or(Value::Null);
            Some(ActionRequest {
                mail_id,
                name,
                params,
            })
        })
        .collect()
}

/// Builds the progress report sent while an action's status is
/// [`crate::error::StatusCode::Invoked`].
#[must_use]
pub fn report_invoked(thing_key: &str, mail_id: &str) -> WireCommand {
    create_mailbox_update(thing_key, mail_id, "Invoked")
}

/// Builds the terminal `mailbox.ack` for a completed action.
#[must_use]
pub fn report_result(thing_key: &str, mail_id: &str, outcome: &ActionOutcome) -> WireCommand {
    create_mailbox_ack(
        thing_key,
        mail_id,
        outcome.status.as_cloud_code(),
        &outcome.message,
        outcome.params.clone(),
    )
}
