// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-command state machine.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::message::InboundCommand;
use super::response::ResponseMessage;
use super::ErrorCode;
use crate::config::TopicScheme;
use crate::connection::{ConnectionHandle, OutboundMessage};
use crate::schema::{SchemaNode, validate_and_default};
use crate::status::{OperationalStatus, StatusPublisher};
use crate::types::IsoTimestamp;

/// An application-level error returned by a command handler.
///
/// The message is carried verbatim in the `error_msg` field of an
/// `EXECUTION_ERROR` completion.
#[derive(Debug, Clone)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// What a command handler returns: a result object (logged, not put on
/// the wire) or an application error.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
type BoxedHandler = Arc<dyn Fn(Map<String, Value>) -> BoxedHandlerFuture + Send + Sync>;

/// An inbound message the router identified as a command, before the
/// payload has been looked at.
#[derive(Debug)]
pub(crate) struct RawCommand {
    pub topic: String,
    pub device_id: String,
    /// Command name from the topic, absent for a bare `…/cmd` topic.
    pub command: Option<String>,
    pub payload: Vec<u8>,
}

/// Runs the two-phase ack/completion lifecycle for inbound commands.
///
/// Commands are processed concurrently, one task per message. The
/// processor keeps the in-flight count that drives the device's
/// `operational_status`.
pub struct CommandProcessor {
    handlers: RwLock<HashMap<String, BoxedHandler>>,
    schemas: HashMap<String, SchemaNode>,
    scheme: Arc<TopicScheme>,
    connection: ConnectionHandle,
    status: Arc<StatusPublisher>,
    in_flight: AtomicUsize,
    idle_notify: Notify,
    cancel: CancellationToken,
}

impl CommandProcessor {
    pub(crate) fn new(
        scheme: Arc<TopicScheme>,
        schemas: HashMap<String, SchemaNode>,
        connection: ConnectionHandle,
        status: Arc<StatusPublisher>,
    ) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            schemas,
            scheme,
            connection,
            status,
            in_flight: AtomicUsize::new(0),
            idle_notify: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers a handler for a command name.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: BoxedHandler = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers.write().insert(name.into(), boxed);
    }

    /// Returns the registered command names, sorted.
    #[must_use]
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of commands currently between ack and completion.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Cancels every in-flight handler. Their completions are suppressed.
    pub(crate) fn cancel_in_flight(&self) {
        self.cancel.cancel();
    }

    /// Resolves once no command is in flight.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle_notify.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Drives one inbound command through the state machine.
    pub(crate) async fn process(self: Arc<Self>, raw: RawCommand) {
        let received_at = IsoTimestamp::now();

        // Phase 0: the payload must be a JSON object.
        let payload = match serde_json::from_slice::<Value>(&raw.payload) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                self.send_ack_error(
                    &raw.device_id,
                    "unknown",
                    &received_at.to_string(),
                    ErrorCode::InvalidJson,
                    "Invalid JSON payload: expected a JSON object. \
                     Please check JSON syntax and formatting.",
                );
                return;
            }
            Err(e) => {
                self.send_ack_error(
                    &raw.device_id,
                    "unknown",
                    &received_at.to_string(),
                    ErrorCode::InvalidJson,
                    format!(
                        "Invalid JSON payload: {e}. Please check JSON syntax and formatting."
                    ),
                );
                return;
            }
        };

        // The command name comes from the topic, or from the payload when
        // the publisher used the bare `…/cmd` topic.
        let name = raw
            .command
            .clone()
            .or_else(|| payload.get("command").and_then(Value::as_str).map(String::from));
        let Some(name) = name else {
            let cmd_id = payload
                .get("cmd_id")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            self.send_ack_error(
                &raw.device_id,
                cmd_id,
                &received_at.to_string(),
                ErrorCode::InvalidPayload,
                "Missing required field 'command'. Include command field in payload \
                 or specify command in topic.",
            );
            return;
        };

        let Some(cmd_id) = payload.get("cmd_id").and_then(Value::as_str) else {
            let timestamp = InboundCommand::timestamp_of(&payload)
                .map_or_else(|| received_at.to_string(), String::from);
            self.send_ack_error(
                &raw.device_id,
                "unknown",
                &timestamp,
                ErrorCode::InvalidPayload,
                "Missing required field 'cmd_id'. Include cmd_id field in command payload.",
            );
            return;
        };

        let command_timestamp = InboundCommand::timestamp_of(&payload)
            .map_or_else(|| received_at.to_string(), String::from);

        let command = InboundCommand {
            topic: raw.topic,
            device_id: raw.device_id,
            name,
            cmd_id: cmd_id.to_string(),
            command_timestamp,
            payload,
        };

        tracing::debug!(
            command = %command.name,
            cmd_id = %command.cmd_id,
            device = %command.device_id,
            "command received"
        );

        // Phase 1: acknowledge before touching the handler.
        self.send_ack(&command);
        self.begin(&command);

        // Phase 2: validate, execute, complete.
        let failed = self.execute(&command).await;
        match failed {
            Some(failed) => self.finish(failed),
            None => self.finish_cancelled(),
        }
    }

    /// Validation and execution. Returns `Some(failed)` once a completion
    /// has been published, or `None` if the handler was cancelled and the
    /// completion suppressed.
    async fn execute(&self, command: &InboundCommand) -> Option<bool> {
        let handler = self.handlers.read().get(&command.name).cloned();
        let Some(handler) = handler else {
            let names = self.command_names();
            let available = if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            };
            self.send_completion(
                ResponseMessage::completion_error(
                    &command.cmd_id,
                    &command.command_timestamp,
                    ErrorCode::UnknownCommand,
                    format!(
                        "Unknown command '{}'. Available commands: {available}",
                        command.name
                    ),
                ),
                &command.device_id,
            );
            return Some(true);
        };

        let validated = match self.schemas.get(&command.name) {
            Some(schema) => match validate_and_default(&command.payload, schema) {
                Ok(validated) => validated,
                Err(e) => {
                    self.send_completion(
                        ResponseMessage::completion_error(
                            &command.cmd_id,
                            &command.command_timestamp,
                            ErrorCode::ValidationError,
                            e.to_string(),
                        ),
                        &command.device_id,
                    );
                    return Some(true);
                }
            },
            None => command.payload.clone(),
        };

        // Run the handler in its own task so a panic is contained.
        let mut task = tokio::spawn(handler(validated));
        let result = tokio::select! {
            () = self.cancel.cancelled() => {
                task.abort();
                tracing::debug!(
                    command = %command.name,
                    cmd_id = %command.cmd_id,
                    "handler cancelled, completion suppressed"
                );
                return None;
            }
            result = &mut task => result,
        };

        let (message, failed) = match result {
            Ok(Ok(outcome)) => {
                tracing::info!(
                    command = %command.name,
                    cmd_id = %command.cmd_id,
                    result = %outcome,
                    "command completed"
                );
                (
                    ResponseMessage::completion(&command.cmd_id, &command.command_timestamp),
                    false,
                )
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    command = %command.name,
                    cmd_id = %command.cmd_id,
                    error = %e,
                    "command failed"
                );
                (
                    ResponseMessage::completion_error(
                        &command.cmd_id,
                        &command.command_timestamp,
                        ErrorCode::ExecutionError,
                        e.to_string(),
                    ),
                    true,
                )
            }
            Err(join_error) => {
                tracing::error!(
                    command = %command.name,
                    cmd_id = %command.cmd_id,
                    error = %join_error,
                    "command handler aborted unexpectedly"
                );
                let msg = if join_error.is_panic() {
                    "Command handler panicked".to_string()
                } else {
                    format!("Command task failed: {join_error}")
                };
                (
                    ResponseMessage::completion_error(
                        &command.cmd_id,
                        &command.command_timestamp,
                        ErrorCode::InternalError,
                        msg,
                    ),
                    true,
                )
            }
        };

        self.send_completion(message, &command.device_id);
        Some(failed)
    }

    fn begin(&self, command: &InboundCommand) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.status.set_operational(OperationalStatus::Busy);
        self.status.set_last_command_time(&command.command_timestamp);
    }

    fn finish(&self, failed: bool) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            let next = if failed {
                OperationalStatus::Error
            } else {
                OperationalStatus::Idle
            };
            self.status.set_operational(next);
            self.idle_notify.notify_waiters();
        }
    }

    fn finish_cancelled(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.idle_notify.notify_waiters();
        }
    }

    fn send_ack(&self, command: &InboundCommand) {
        let message = ResponseMessage::ack(&command.cmd_id, &command.command_timestamp);
        self.connection.publish(OutboundMessage::command_response(
            self.scheme.ack(&command.device_id),
            message.to_bytes(),
        ));
    }

    fn send_ack_error(
        &self,
        device_id: &str,
        cmd_id: &str,
        command_timestamp: &str,
        code: ErrorCode,
        msg: impl Into<String>,
    ) {
        let msg = msg.into();
        tracing::warn!(device = %device_id, code = %code, %msg, "rejecting command at ack");
        let message = ResponseMessage::ack_error(cmd_id, command_timestamp, code, msg);
        self.connection.publish(OutboundMessage::command_response(
            self.scheme.ack(device_id),
            message.to_bytes(),
        ));
    }

    fn send_completion(&self, message: ResponseMessage, device_id: &str) {
        self.connection.publish(OutboundMessage::command_response(
            self.scheme.completion(device_id),
            message.to_bytes(),
        ));
    }
}
