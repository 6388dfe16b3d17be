// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `icsia_lib` - A Rust library for building MQTT device applications.
//!
//! The library turns an MQTT broker connection into a structured
//! command/response/status protocol for IoT device programs (motor
//! controllers, cameras, orchestrators). Device code supplies command
//! handlers and status updates; the framework supplies everything else:
//!
//! - **Two-phase command protocol**: every inbound command is
//!   acknowledged on `status/ack` before its handler runs and reported
//!   on `status/completion` afterwards, with a structured error taxonomy.
//! - **Schema validation**: command payloads are validated and defaulted
//!   against a declarative schema dialect from the configuration.
//! - **Status publishing**: a retained device status snapshot on
//!   `status/current`, published on change and optionally on a
//!   keep-alive interval.
//! - **Topic-pattern callbacks**: user callbacks dispatched by MQTT
//!   wildcard matching (`+`, `#`).
//! - **Connection supervision**: automatic reconnect with subscription
//!   replay, and a throttled FIFO publish queue.
//!
//! # Topic layout
//!
//! With namespace `icsia` and device id `motor_01`:
//!
//! | Direction | Topic | QoS | Retain |
//! |---|---|---|---|
//! | subscribe | `icsia/+/cmd/#` | 1 | n/a |
//! | publish | `icsia/{dev}/status/ack` | 1 | no |
//! | publish | `icsia/{dev}/status/completion` | 1 | no |
//! | publish | `icsia/motor_01/status/current` | 0 | yes |
//! | publish | `icsia/motor_01/logs` | 0 | no |
//!
//! # Quick Start
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
//!     // Handlers receive the validated payload, defaults filled in.
//!     app.register_command("move", |payload| async move {
//!         let target = payload["target_position"].clone();
//!         // ... drive the motor ...
//!         Ok(json!({"final_position": target}))
//!     });
//!
//!     app.register_command("stop", |_payload| async move {
//!         Err(HandlerError::new("POSITION_OUT_OF_BOUNDS: not homed"))
//!     });
//!
//!     // Watch other devices' acknowledgments.
//!     app.register_callback("icsia/+/status/ack", |topic, payload, _props| {
//!         println!("{topic}: {payload}");
//!     })?;
//!
//!     app.run().await
//! }
//! ```
//!
//! # Testing
//!
//! The framework reaches the network only through the
//! [`Transport`](transport::Transport) trait.
//! [`MqttApplication::with_transport`] accepts any implementation, so
//! integration tests drive the full application against an in-memory
//! transport with no broker involved.

mod application;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod schema;
pub mod status;
pub mod topic;
pub mod transport;
pub mod types;

pub use application::{AppHandle, MqttApplication};
pub use command::{CommandProcessor, ErrorCode, HandlerError, HandlerResult, InboundCommand};
pub use config::{AppConfig, MqttSettings, StatusSettings, SubscriptionSpec, TopicScheme};
pub use connection::{ConnectionHandle, MessageClass, OutboundMessage};
pub use dispatch::{CallbackRegistry, SubscriptionId};
pub use error::{ConfigError, Error, Result, StatusValidationError, TransportError, ValidationError};
pub use schema::SchemaNode;
pub use status::OperationalStatus;
pub use topic::TopicFilter;
pub use transport::{
    MessageProperties, QoS, RumqttTransport, Transport, TransportEvent, TransportPublisher,
};
pub use types::IsoTimestamp;
