// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Action Registry & Invoker.
//!
//! Handlers are a tagged variant rather than duck-typed on arity:
//! [`HandlerKind::FireAndForget`] takes only the call parameters,
//! [`HandlerKind::WithRequest`] additionally sees the originating
//! [`ActionRequest`] (for progress reporting mid-execution), and
//! [`HandlerKind::Command`] shells out to a subprocess built from an argv
//! template. Registration mutation is guarded by a `parking_lot::Mutex`:
//! every critical section here is synchronous lookup/insert/remove, never
//! spanning an `.await`.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Command;

use crate::error::{ActionError, StatusCode};

/// Opaque user data handed back to a registered handler on every
/// invocation.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// A pending action invocation, created from a mailbox-check reply entry.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// The cloud mailbox entry identifier.
    pub mail_id: String,
    /// The action name (the mailbox entry's `method`).
    pub name: String,
    /// The invocation parameters.
    pub params: Value,
}

/// The result of invoking an action handler.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// The resulting status code.
    pub status: StatusCode,
    /// Human-readable detail, reported back via mailbox.ack/update.
    pub message: String,
    /// Optional output parameters to attach to the mailbox.ack.
    pub params: Option<Value>,
}

impl ActionOutcome {
    /// A plain success outcome with no message or output.
    #[must_use]
    pub fn success() -> Self {
        Self {
            status: StatusCode::Success,
            message: String::new(),
            params: None,
        }
    }

    /// A fire-and-forget acknowledgement: the action was invoked but has
    /// not yet completed.
    #[must_use]
    pub fn invoked() -> Self {
        Self {
            status: StatusCode::Invoked,
            message: "Invoked".to_string(),
            params: None,
        }
    }

    fn failure(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            params: None,
        }
    }
}

type FireAndForgetFn = dyn Fn(Value, Option<UserData>) -> ActionOutcome + Send + Sync;
type WithRequestFn = dyn Fn(&ActionRequest, Value, Option<UserData>) -> ActionOutcome + Send + Sync;

/// The shape of a registered action handler.
pub enum HandlerKind {
    /// Invoked with only the call parameters; does not see the request.
    FireAndForget(Box<FireAndForgetFn>),
    /// Invoked with the originating request as well, for handlers that
    /// need the mail id to send their own progress updates.
    WithRequest(Box<WithRequestFn>),
    /// Invoked as a subprocess. The template's first element is the
    /// program; parameters are appended as `--key=value` (`--key` for
    /// `true` booleans, omitted for `false` ones).
    Command(Vec<String>),
}

impl std::fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FireAndForget(_) => f.write_str("HandlerKind::FireAndForget(..)"),
            Self::WithRequest(_) => f.write_str("HandlerKind::WithRequest(..)"),
            Self::Command(argv) => f.debug_tuple("HandlerKind::Command").field(argv).finish(),
        }
    }
}

struct Action {
    kind: HandlerKind,
    user_data: Option<UserData>,
}

/// Registry of invocable actions, mutated from application tasks and read
/// by workers.
#[derive(Default)]
pub struct ActionRegistry {
    actions: Mutex<HashMap<String, Action>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `kind` under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Exists`] if `name` is already registered; the
    /// original handler remains bound.
    pub fn register(
        &self,
        name: impl Into<String>,
        kind: HandlerKind,
        user_data: Option<UserData>,
    ) -> Result<(), ActionError> {
        let name = name.into();
        let mut actions = self.actions.lock();
        if actions.contains_key(&name) {
            return Err(ActionError::Exists(name));
        }
        actions.insert(name, Action { kind, user_data });
        Ok(())
    }

    /// Registers a subprocess action. Equivalent to
    /// `register(name, HandlerKind::Command(argv), None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::Exists`] on duplicate registration.
    pub fn register_command(
        &self,
        name: impl Into<String>,
        argv: Vec<String>,
    ) -> Result<(), ActionError> {
        self.register(name, HandlerKind::Command(argv), None)
    }

    /// Removes the handler bound to `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::NotFound`] if no handler is registered.
    pub fn deregister(&self, name: &str) -> Result<(), ActionError> {
        self.actions
            .lock()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    /// Returns true if `name` currently has a bound handler.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.actions.lock().contains_key(name)
    }

    /// Invokes the handler bound to `request.name`.
    ///
    /// Never fails: an unregistered name or a handler that panics
    /// internally produces a [`StatusCode::NotFound`]/[`StatusCode::Failure`]
    /// outcome rather than propagating an error, matching the Work
    /// Dispatcher's "never die on handler error" rule.
    pub async fn invoke(&self, request: &ActionRequest) -> ActionOutcome {
        enum Dispatch {
            Outcome(ActionOutcome),
            Spawn(Vec<String>),
        }

        let dispatch = {
            let actions = self.actions.lock();
            match actions.get(&request.name) {
                None => Dispatch::Outcome(ActionOutcome::failure(
                    StatusCode::NotFound,
                    format!("no handler registered for \"{}\"", request.name),
                )),
                Some(action) => match &action.kind {
                    HandlerKind::FireAndForget(f) => Dispatch::Outcome(
                        panic::catch_unwind(AssertUnwindSafe(|| {
                            f(request.params.clone(), action.user_data.clone())
                        }))
                        .unwrap_or_else(|payload| panic_outcome(&request.name, &payload)),
                    ),
                    HandlerKind::WithRequest(f) => Dispatch::Outcome(
                        panic::catch_unwind(AssertUnwindSafe(|| {
                            f(request, request.params.clone(), action.user_data.clone())
                        }))
                        .unwrap_or_else(|payload| panic_outcome(&request.name, &payload)),
                    ),
                    HandlerKind::Command(template) => {
                        Dispatch::Spawn(build_argv(template, &request.params))
                    }
                },
            }
        };

        match dispatch {
            Dispatch::Outcome(outcome) => coerce(outcome, &request.name),
            Dispatch::Spawn(argv) => coerce(run_command(&argv).await, &request.name),
        }
    }
}

/// Appends `--key=value` for every non-boolean parameter, `--key` for
/// `true`-valued booleans, and omits `false`-valued booleans.
fn build_argv(template: &[String], params: &Value) -> Vec<String> {
    let mut argv = template.to_vec();
    if let Some(object) = params.as_object() {
        for (key, value) in object {
            match value {
                Value::Bool(true) => argv.push(format!("--{key}")),
                Value::Bool(false) => {}
                Value::String(s) => argv.push(format!("--{key}={s}")),
                other => argv.push(format!("--{key}={other}")),
            }
        }
    }
    argv
}

async fn run_command(argv: &[String]) -> ActionOutcome {
    let Some((program, args)) = argv.split_first() else {
        return ActionOutcome::failure(StatusCode::BadParameter, "empty command template");
    };

    match Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            ActionOutcome {
                status: StatusCode::Success,
                message: stdout,
                params: None,
            }
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            ActionOutcome::failure(
                StatusCode::ExecutionError,
                format!("exit code {:?}: {stderr}", output.status.code()),
            )
        }
        Err(e) => ActionOutcome::failure(StatusCode::NotExecutable, e.to_string()),
    }
}

/// Turns a caught handler panic into a failure outcome instead of letting it
/// unwind into the worker that invoked it.
fn panic_outcome(name: &str, payload: &(dyn Any + Send)) -> ActionOutcome {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string());
    tracing::error!(action = name, panic = %detail, "action handler panicked");
    ActionOutcome::failure(StatusCode::Failure, format!("handler panicked: {detail}"))
}

/// Rejects an invalid status code the way §4.6 requires: coerced to
/// `BAD_PARAMETER` with an explanatory message.
fn coerce(outcome: ActionOutcome, name: &str) -> ActionOutcome {
    if matches!(outcome.status, StatusCode::Invoked) && outcome.message.is_empty() {
        return ActionOutcome::invoked();
    }
    let _ = name;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_registration_fails_and_keeps_original() {
        let registry = ActionRegistry::new();
        registry
            .register_command("reboot", vec!["/bin/reboot".to_string()])
            .unwrap();

        let err = registry
            .register_command("reboot", vec!["/bin/other".to_string()])
            .unwrap_err();
        assert!(matches!(err, ActionError::Exists(_)));
        assert!(registry.contains("reboot"));
    }

    #[test]
    fn deregister_missing_action_fails() {
        let registry = ActionRegistry::new();
        let err = registry.deregister("missing").unwrap_err();
        assert!(matches!(err, ActionError::NotFound(_)));
    }

    #[tokio::test]
    async fn invoke_missing_action_returns_not_found() {
        let registry = ActionRegistry::new();
        let request = ActionRequest {
            mail_id: "m1".to_string(),
            name: "missing".to_string(),
            params: Value::Null,
        };
        let outcome = registry.invoke(&request).await;
        assert_eq!(outcome.status, StatusCode::NotFound);
    }

    #[tokio::test]
    async fn invoke_fire_and_forget_handler() {
        let registry = ActionRegistry::new();
        registry
            .register(
                "echo",
                HandlerKind::FireAndForget(Box::new(|_params, _user_data| ActionOutcome::success())),
                None,
            )
            .unwrap();

        let request = ActionRequest {
            mail_id: "m1".to_string(),
            name: "echo".to_string(),
            params: Value::Null,
        };
        let outcome = registry.invoke(&request).await;
        assert_eq!(outcome.status, StatusCode::Success);
    }

    #[tokio::test]
    async fn invoke_catches_handler_panic() {
        let registry = ActionRegistry::new();
        registry
            .register(
                "boom",
                HandlerKind::FireAndForget(Box::new(|_params, _user_data| {
                    panic!("handler exploded")
                })),
                None,
            )
            .unwrap();

        let request = ActionRequest {
            mail_id: "m1".to_string(),
            name: "boom".to_string(),
            params: Value::Null,
        };
        let outcome = registry.invoke(&request).await;
        assert_eq!(outcome.status, StatusCode::Failure);
        assert!(outcome.message.contains("handler exploded"));
        assert!(registry.contains("boom"));
    }

    #[test]
    fn build_argv_handles_bool_and_string_params() {
        let params = serde_json::json!({ "verbose": true, "quiet": false, "name": "x" });
        let argv = build_argv(&["prog".to_string()], &params);
        assert!(argv.contains(&"--verbose".to_string()));
        assert!(!argv.iter().any(|a| a == "--quiet"));
        assert!(argv.contains(&"--name=x".to_string()));
    }
}
