// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The status snapshot and its publishing schedule.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::{StatusSettings, TopicScheme};
use crate::connection::{ConnectionHandle, OutboundMessage};
use crate::error::StatusValidationError;
use crate::schema::{SchemaNode, build_status_template, validate_status_update};
use crate::types::IsoTimestamp;

/// Framework-managed operational state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalStatus {
    /// No command in flight.
    Idle,
    /// At least one command between ack and completion.
    Busy,
    /// The most recent command batch ended in failure.
    Error,
}

impl OperationalStatus {
    /// The wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for OperationalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State guarded by the snapshot mutex.
///
/// The lock is only ever held for merges and equality checks, never
/// across I/O.
#[derive(Debug)]
struct Snapshot {
    fields: Map<String, Value>,
    operational: OperationalStatus,
    last_command_time: Option<String>,
    /// Floor for the next published timestamp.
    last_published: Option<IsoTimestamp>,
}

/// Maintains the status snapshot and publishes it.
pub struct StatusPublisher {
    scheme: Arc<TopicScheme>,
    schema: SchemaNode,
    snapshot: Mutex<Snapshot>,
    dirty: AtomicBool,
    changed: Notify,
    connection: ConnectionHandle,
    publish_interval: Duration,
    keepalive: bool,
}

impl StatusPublisher {
    pub(crate) fn new(
        scheme: Arc<TopicScheme>,
        schema: SchemaNode,
        settings: &StatusSettings,
        connection: ConnectionHandle,
    ) -> Self {
        let fields = build_status_template(&schema);
        Self {
            scheme,
            schema,
            snapshot: Mutex::new(Snapshot {
                fields,
                operational: OperationalStatus::Idle,
                last_command_time: None,
                last_published: None,
            }),
            dirty: AtomicBool::new(false),
            changed: Notify::new(),
            connection,
            publish_interval: settings.publish_interval(),
            keepalive: settings.keepalive_publishing,
        }
    }

    /// Deep-merges a partial update into the snapshot.
    ///
    /// Object values merge recursively; scalars and arrays replace. The
    /// update is validated against the status schema first and rejected
    /// atomically on mismatch. A publish is triggered only when a value
    /// actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`StatusValidationError`] if a declared field has the
    /// wrong type or a nested object is incomplete.
    pub fn update(&self, partial: &Map<String, Value>) -> Result<(), StatusValidationError> {
        validate_status_update(partial, &self.schema)?;

        let changed = {
            let mut snapshot = self.snapshot.lock();
            deep_merge(&mut snapshot.fields, partial)
        };
        if changed {
            self.mark_dirty();
        }
        Ok(())
    }

    /// Sets the operational status, marking the snapshot dirty on change.
    pub fn set_operational(&self, value: OperationalStatus) {
        let changed = {
            let mut snapshot = self.snapshot.lock();
            let changed = snapshot.operational != value;
            snapshot.operational = value;
            changed
        };
        if changed {
            self.mark_dirty();
        }
    }

    /// Current operational status.
    #[must_use]
    pub fn operational(&self) -> OperationalStatus {
        self.snapshot.lock().operational
    }

    /// Records the `command_timestamp` of the most recently received
    /// command.
    pub fn set_last_command_time(&self, timestamp: &str) {
        let changed = {
            let mut snapshot = self.snapshot.lock();
            let changed = snapshot.last_command_time.as_deref() != Some(timestamp);
            snapshot.last_command_time = Some(timestamp.to_string());
            changed
        };
        if changed {
            self.mark_dirty();
        }
    }

    /// A copy of the user-visible snapshot fields.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        self.snapshot.lock().fields.clone()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.changed.notify_one();
    }

    /// Builds the wire payload and hands it to the supervisor.
    ///
    /// The published `timestamp` is clamped to be non-decreasing across
    /// publishes from this process.
    pub(crate) fn publish_now(&self) {
        let payload = {
            let mut snapshot = self.snapshot.lock();
            let timestamp = match snapshot.last_published {
                Some(floor) => IsoTimestamp::now().at_least(floor),
                None => IsoTimestamp::now(),
            };
            snapshot.last_published = Some(timestamp);

            let mut payload = snapshot.fields.clone();
            payload.insert(
                "operational_status".to_string(),
                Value::String(snapshot.operational.as_str().to_string()),
            );
            payload.insert("timestamp".to_string(), Value::String(timestamp.to_string()));
            if let Some(last_command_time) = &snapshot.last_command_time {
                payload.insert(
                    "last_command_time".to_string(),
                    Value::String(last_command_time.clone()),
                );
            }
            payload
        };
        self.dirty.store(false, Ordering::Release);

        let bytes = serde_json::to_vec(&Value::Object(payload)).unwrap_or_default();
        tracing::trace!(len = bytes.len(), "publishing status snapshot");
        self.connection
            .publish(OutboundMessage::status(self.scheme.status_current(), bytes));
    }

    /// The periodic publishing task.
    ///
    /// Emits one initial snapshot after the first successful connect,
    /// then publishes immediately on change and on every wake when dirty
    /// (change-only mode) or unconditionally (keep-alive mode).
    pub(crate) async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut connected = self.connection.connected_watch();
        loop {
            if *connected.borrow_and_update() {
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
        self.publish_now();

        let mut ticker = tokio::time::interval(self.publish_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.reset();

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if self.keepalive || self.dirty.load(Ordering::Acquire) {
                        self.publish_now();
                    }
                }
                () = self.changed.notified() => {
                    if self.dirty.load(Ordering::Acquire) {
                        self.publish_now();
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for StatusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusPublisher")
            .field("topic", &self.scheme.status_current())
            .field("keepalive", &self.keepalive)
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .finish()
    }
}

/// Merges `patch` into `target`. Objects merge recursively; everything
/// else replaces. Returns whether anything changed.
fn deep_merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) -> bool {
    let mut changed = false;
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                changed |= deep_merge(existing, incoming);
            }
            (Some(existing), incoming) if existing == incoming => {}
            _ => {
                target.insert(key.clone(), value.clone());
                changed = true;
            }
        }
    }
    changed
}
