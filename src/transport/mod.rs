// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The transport contract the framework runs on.
//!
//! The framework never touches an MQTT client directly; everything goes
//! through [`Transport`] and the [`TransportPublisher`] handle it yields
//! on connect. The production implementation is [`RumqttTransport`];
//! tests substitute an in-memory transport.
//!
//! The split mirrors the shape of async MQTT clients: one half owns the
//! session and yields events, the other is a cheap cloneable handle for
//! subscribe/publish.

mod rumqtt;

use std::future::Future;

pub use rumqtt::{RumqttPublisher, RumqttTransport};

use crate::error::TransportError;

/// Quality-of-service level for subscriptions and publishes.
///
/// QoS 2 is deliberately absent; the protocol only uses levels 0 and 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Acknowledged delivery.
    AtLeastOnce,
}

/// Optional MQTT v5 message properties passed through to callbacks.
///
/// The v3.1.1 transport always delivers `None`; the type exists so the
/// callback contract does not change when a v5 transport is plugged in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Content type of the payload.
    pub content_type: Option<String>,
    /// Topic the receiver should respond on.
    pub response_topic: Option<String>,
    /// Opaque correlation data.
    pub correlation_data: Option<Vec<u8>>,
    /// Free-form user properties.
    pub user_properties: Vec<(String, String)>,
}

/// An event from the transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An inbound message on a subscribed topic.
    Message {
        /// Full topic the message arrived on.
        topic: String,
        /// Raw payload bytes.
        payload: Vec<u8>,
        /// Optional v5 properties.
        properties: Option<MessageProperties>,
    },
    /// The connection was lost. The supervisor will reconnect.
    Disconnected,
}

/// A connection-owning transport.
///
/// Implementations own the session lifecycle: `connect` establishes a
/// fresh session and resolves once the broker has acknowledged it,
/// yielding the publish/subscribe handle for that session.
pub trait Transport: Send + 'static {
    /// The cloneable publish/subscribe handle for an established session.
    type Publisher: TransportPublisher;

    /// Connects to the broker.
    ///
    /// A previous session, if any, is discarded.
    fn connect(&mut self) -> impl Future<Output = Result<Self::Publisher, TransportError>> + Send;

    /// Returns the next event of the current session.
    ///
    /// Cancel-safe. Returns `None` when no session was ever established
    /// or the event stream has ended.
    fn next_event(&mut self) -> impl Future<Output = Option<TransportEvent>> + Send;

    /// Tears down the current session.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

/// The publish/subscribe half of a transport session.
pub trait TransportPublisher: Clone + Send + Sync + 'static {
    /// Subscribes to a topic filter. Idempotent.
    fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Publishes a message, returning once the transport has accepted it
    /// for delivery.
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
