// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The application façade device programs build on.
//!
//! ```no_run
//! use icsia_lib::{AppConfig, HandlerError, MqttApplication};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> icsia_lib::Result<()> {
//!     let config = AppConfig::from_yaml_file("config.yaml")?;
//!     let mut app = MqttApplication::new(config)?;
//!
//!     app.register_command("move", |payload| async move {
//!         let target = payload
//!             .get("target_position")
//!             .ok_or_else(|| HandlerError::new("no target"))?;
//!         Ok(json!({"moved_to": target}))
//!     });
//!
//!     let handle = app.handle();
//!     handle.update_status(&serde_json::Map::new())?;
//!
//!     app.run().await
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::command::{CommandProcessor, HandlerResult};
use crate::config::{AppConfig, TopicScheme};
use crate::connection::{
    ConnectionHandle, ConnectionManager, DEFAULT_STATUS_LANE_CAP, OutboundMessage, PublishQueue,
    run_drainer,
};
use crate::dispatch::{CallbackRegistry, MessageRouter, SubscriptionId};
use crate::error::{ConfigError, Error, Result, StatusValidationError};
use crate::schema::SchemaNode;
use crate::status::StatusPublisher;
use crate::topic::FilterError;
use crate::transport::{MessageProperties, QoS, RumqttTransport, Transport};
use crate::types::IsoTimestamp;

/// Grace period for in-flight command handlers at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// An MQTT device application.
///
/// Owns the five core subsystems (transport supervision, validation,
/// command lifecycle, status publishing, dispatch) and exposes the
/// registration surface device code uses. Register commands and
/// callbacks, then call [`run`](Self::run).
pub struct MqttApplication<T: Transport = RumqttTransport> {
    config: AppConfig,
    transport: Option<T>,
    scheme: Arc<TopicScheme>,
    connection: ConnectionHandle,
    processor: Arc<CommandProcessor>,
    status: Arc<StatusPublisher>,
    callbacks: Arc<CallbackRegistry>,
    router: Arc<MessageRouter>,
    shutdown: CancellationToken,
    subscribe_rx: Option<mpsc::UnboundedReceiver<(String, QoS)>>,
    connected_tx: Option<watch::Sender<bool>>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
}

impl MqttApplication<RumqttTransport> {
    /// Creates an application connected through `rumqttc`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is incomplete or a
    /// schema/filter in it is malformed.
    pub fn new(config: AppConfig) -> Result<Self> {
        if config.mqtt.broker.is_empty() {
            return Err(ConfigError::MissingField("mqtt.broker").into());
        }
        let transport = RumqttTransport::new(config.mqtt.clone());
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> MqttApplication<T> {
    /// Creates an application over a caller-supplied transport.
    ///
    /// This is the seam tests and alternative MQTT stacks plug into.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is incomplete or a
    /// schema/filter in it is malformed.
    pub fn with_transport(config: AppConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let scheme = Arc::new(TopicScheme::from_config(&config)?);

        let mut command_schemas = HashMap::new();
        for (name, raw) in &config.commands {
            let node = SchemaNode::from_value(raw).map_err(|e| ConfigError::InvalidSchema {
                name: name.clone(),
                message: e.to_string(),
            })?;
            command_schemas.insert(name.clone(), node);
        }
        let status_schema =
            SchemaNode::from_value(&config.status.payload).map_err(|e| {
                ConfigError::InvalidSchema {
                    name: "status".to_string(),
                    message: e.to_string(),
                }
            })?;

        let queue = Arc::new(PublishQueue::new(DEFAULT_STATUS_LANE_CAP));
        let (subscribe_tx, subscribe_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);
        let subscriptions = Arc::new(RwLock::new(HashMap::new()));

        let connection = ConnectionHandle::new(
            queue,
            subscribe_tx,
            connected_rx,
            Arc::clone(&subscriptions),
        );

        let status = Arc::new(StatusPublisher::new(
            Arc::clone(&scheme),
            status_schema,
            &config.status,
            connection.clone(),
        ));
        let processor = Arc::new(CommandProcessor::new(
            Arc::clone(&scheme),
            command_schemas,
            connection.clone(),
            Arc::clone(&status),
        ));
        let callbacks = Arc::new(CallbackRegistry::new());
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&callbacks),
            Arc::clone(&scheme),
            Arc::clone(&processor),
        ));

        connection.subscribe(scheme.command_filter().as_str(), QoS::AtLeastOnce);

        Ok(Self {
            config,
            transport: Some(transport),
            scheme,
            connection,
            processor,
            status,
            callbacks,
            router,
            shutdown: CancellationToken::new(),
            subscribe_rx: Some(subscribe_rx),
            connected_tx: Some(connected_tx),
            subscriptions,
        })
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Registers a command handler.
    ///
    /// Registrations belong before [`run`](Self::run); a later
    /// registration under the same name replaces the earlier one.
    pub fn register_command<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.processor.register(name, handler);
    }

    /// Registers a callback for every message matching a topic pattern
    /// and subscribes to the pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is not a valid MQTT filter.
    pub fn register_callback<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&str, &str, Option<&MessageProperties>) + Send + Sync + 'static,
    {
        let id = self
            .callbacks
            .add(pattern, callback)
            .map_err(|e: FilterError| Error::Config(ConfigError::InvalidFilter(e)))?;
        self.connection.subscribe(pattern, QoS::AtMostOnce);
        Ok(id)
    }

    /// Registers a callback under a named subscription from the
    /// configuration's `subscriptions` section.
    ///
    /// The name selects the topic pattern; the supplied function takes
    /// the place of the configured callback name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unknown or its pattern invalid.
    pub fn register_callback_handler<F>(&self, name: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&str, &str, Option<&MessageProperties>) + Send + Sync + 'static,
    {
        let spec = self
            .config
            .subscriptions
            .get(name)
            .ok_or_else(|| ConfigError::UnknownSubscription(name.to_string()))?;
        let topic = spec.topic.clone();
        self.register_callback(&topic, callback)
    }

    /// Deep-merges a partial update into the status snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StatusValidationError`] if the update violates the
    /// status schema; nothing is applied in that case.
    pub fn update_status(
        &self,
        partial: &Map<String, Value>,
    ) -> std::result::Result<(), StatusValidationError> {
        self.status.update(partial)
    }

    /// A cloneable handle for use from handlers and background tasks.
    #[must_use]
    pub fn handle(&self) -> AppHandle {
        AppHandle {
            scheme: Arc::clone(&self.scheme),
            status: Arc::clone(&self.status),
            connection: self.connection.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Requests shutdown; [`run`](Self::run) then tears down and returns.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Runs the application until [`shutdown`](Self::shutdown) is called.
    ///
    /// Starts the connection supervisor, the publish drainer, and the
    /// status publisher, then parks. On shutdown the teardown order is:
    /// stop inbound intake, cancel in-flight commands (bounded grace,
    /// completions of cancelled handlers suppressed), stop the status
    /// task, flush queued publishes best-effort (QoS 1 first), and
    /// disconnect the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRunning`] if called twice.
    pub async fn run(&mut self) -> Result<()> {
        let transport = self.transport.take().ok_or(Error::AlreadyRunning)?;
        let subscribe_rx = self.subscribe_rx.take().ok_or(Error::AlreadyRunning)?;
        let connected_tx = self.connected_tx.take().ok_or(Error::AlreadyRunning)?;

        let intake_cancel = CancellationToken::new();
        let transport_cancel = CancellationToken::new();
        let status_cancel = CancellationToken::new();
        let drain_cancel = CancellationToken::new();

        let (publisher_tx, publisher_rx) = watch::channel(None);

        let manager = ConnectionManager {
            transport,
            reconnect_interval: self.config.mqtt.reconnect_interval(),
            max_reconnect_attempts: self.config.mqtt.max_reconnect_attempts,
            subscriptions: Arc::clone(&self.subscriptions),
            subscribe_rx,
            connected_tx,
            publisher_tx,
            router: Arc::clone(&self.router),
            intake_cancel: intake_cancel.clone(),
            shutdown: transport_cancel.clone(),
        };
        let supervisor_task = tokio::spawn(manager.run());

        let drainer_task = tokio::spawn(run_drainer(
            self.connection.queue(),
            publisher_rx,
            self.config.mqtt.throttle_interval(),
            drain_cancel.clone(),
        ));

        let status_task = tokio::spawn(Arc::clone(&self.status).run(status_cancel.clone()));

        tracing::info!(
            device = %self.scheme.device_id(),
            namespace = %self.scheme.namespace(),
            "application running"
        );
        self.shutdown.cancelled().await;
        tracing::info!("shutting down");

        // 1. Stop feeding new messages into dispatch.
        intake_cancel.cancel();

        // 2. Cancel in-flight commands, bounded by the grace period.
        self.processor.cancel_in_flight();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.processor.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!("in-flight commands did not finish within the grace period");
        }

        // 3. Stop the periodic status task.
        status_cancel.cancel();
        let _ = status_task.await;

        // 4. Flush queued publishes best-effort.
        drain_cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, drainer_task).await.is_err() {
            tracing::warn!("publish queue flush did not finish within the grace period");
        }

        // 5. Disconnect the transport.
        transport_cancel.cancel();
        let _ = supervisor_task.await;

        tracing::info!("application stopped");
        Ok(())
    }
}

impl<T: Transport> std::fmt::Debug for MqttApplication<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttApplication")
            .field("device_id", &self.scheme.device_id())
            .field("namespace", &self.scheme.namespace())
            .field("commands", &self.processor.command_names())
            .field("running", &self.transport.is_none())
            .finish()
    }
}

/// Cloneable handle into a running application.
///
/// Handlers and background tasks use this to update status, publish log
/// records, and request shutdown.
#[derive(Debug, Clone)]
pub struct AppHandle {
    scheme: Arc<TopicScheme>,
    status: Arc<StatusPublisher>,
    connection: ConnectionHandle,
    shutdown: CancellationToken,
}

impl AppHandle {
    /// Deep-merges a partial update into the status snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StatusValidationError`] if the update violates the
    /// status schema.
    pub fn update_status(
        &self,
        partial: &Map<String, Value>,
    ) -> std::result::Result<(), StatusValidationError> {
        self.status.update(partial)
    }

    /// Publishes a log record on `{ns}/{dev}/logs` (QoS 0, not retained).
    pub fn publish_log(&self, level: &str, message: &str) {
        let record = json!({
            "level": level,
            "message": message,
            "device_id": self.scheme.device_id(),
            "timestamp": IsoTimestamp::now().to_string(),
        });
        let bytes = serde_json::to_vec(&record).unwrap_or_default();
        self.connection
            .publish(OutboundMessage::log(self.scheme.logs(), bytes));
    }

    /// Whether a broker session is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Requests shutdown of the application.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
