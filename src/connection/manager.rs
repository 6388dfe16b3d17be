// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The connection supervisor and the publish drainer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::publish_queue::{OutboundMessage, PublishQueue};
use crate::dispatch::MessageRouter;
use crate::transport::{QoS, Transport, TransportEvent, TransportPublisher};

/// Cloneable handle through which the rest of the framework talks to the
/// supervisor.
///
/// Publishing enqueues; subscribing records the filter for replay and
/// forwards it to the live session when one exists.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    queue: Arc<PublishQueue>,
    subscribe_tx: mpsc::UnboundedSender<(String, QoS)>,
    connected_rx: watch::Receiver<bool>,
    subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        queue: Arc<PublishQueue>,
        subscribe_tx: mpsc::UnboundedSender<(String, QoS)>,
        connected_rx: watch::Receiver<bool>,
        subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    ) -> Self {
        Self {
            queue,
            subscribe_tx,
            connected_rx,
            subscriptions,
        }
    }

    /// Enqueues an outbound message.
    pub fn publish(&self, message: OutboundMessage) {
        self.queue.push(message);
    }

    /// The queue shared with the drainer task.
    pub(crate) fn queue(&self) -> Arc<PublishQueue> {
        Arc::clone(&self.queue)
    }

    /// Registers a topic filter.
    ///
    /// The filter is remembered for replay on every reconnect; if a
    /// session is live it is subscribed right away. Re-registering the
    /// same filter is a no-op.
    pub fn subscribe(&self, filter: &str, qos: QoS) {
        let newly_added = self
            .subscriptions
            .write()
            .insert(filter.to_string(), qos)
            .is_none();
        if newly_added {
            let _ = self.subscribe_tx.send((filter.to_string(), qos));
        }
    }

    /// Whether a broker session is currently live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// A watch on the connection state.
    #[must_use]
    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }
}

/// Owns the transport: connect loop, subscription replay, receive pump.
pub(crate) struct ConnectionManager<T: Transport> {
    pub transport: T,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: i32,
    pub subscriptions: Arc<RwLock<HashMap<String, QoS>>>,
    pub subscribe_rx: mpsc::UnboundedReceiver<(String, QoS)>,
    pub connected_tx: watch::Sender<bool>,
    pub publisher_tx: watch::Sender<Option<T::Publisher>>,
    pub router: Arc<MessageRouter>,
    /// Stops routing inbound messages while the session stays up.
    pub intake_cancel: CancellationToken,
    /// Tears the session down and exits.
    pub shutdown: CancellationToken,
}

impl<T: Transport> ConnectionManager<T> {
    pub async fn run(mut self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let Some(publisher) = self.connect_with_retry().await else {
                break;
            };

            Self::replay_subscriptions(&self.subscriptions, &publisher).await;
            let _ = self.publisher_tx.send(Some(publisher.clone()));
            let _ = self.connected_tx.send(true);

            if self.pump(&publisher).await {
                // Shutdown requested from inside the pump.
                self.transport.disconnect().await;
                break;
            }

            // Session lost; go back to the connect loop.
            let _ = self.connected_tx.send(false);
            let _ = self.publisher_tx.send(None);
            tracing::warn!("broker session lost, reconnecting");
        }

        let _ = self.connected_tx.send(false);
        tracing::debug!("connection supervisor stopped");
    }

    /// Connects, sleeping `reconnect_interval` between failed attempts.
    ///
    /// Returns `None` on shutdown or when `max_reconnect_attempts` is
    /// exhausted.
    async fn connect_with_retry(&mut self) -> Option<T::Publisher> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                () = self.shutdown.cancelled() => return None,
                result = self.transport.connect() => result,
            };

            match result {
                Ok(publisher) => return Some(publisher),
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "broker connect failed");
                    if self.max_reconnect_attempts >= 0
                        && attempt >= self.max_reconnect_attempts as u32
                    {
                        tracing::error!(
                            attempts = attempt,
                            "giving up on reconnecting to the broker"
                        );
                        return None;
                    }
                    tokio::select! {
                        () = self.shutdown.cancelled() => return None,
                        () = tokio::time::sleep(self.reconnect_interval) => {}
                    }
                }
            }
        }
    }

    /// Re-applies every registered filter to a fresh session, before any
    /// inbound message is consumed.
    async fn replay_subscriptions(
        subscriptions: &Arc<RwLock<HashMap<String, QoS>>>,
        publisher: &T::Publisher,
    ) {
        let filters: Vec<(String, QoS)> = subscriptions
            .read()
            .iter()
            .map(|(filter, qos)| (filter.clone(), *qos))
            .collect();

        for (filter, qos) in filters {
            match publisher.subscribe(&filter, qos).await {
                Ok(()) => tracing::debug!(filter = %filter, "subscription replayed"),
                Err(e) => tracing::warn!(filter = %filter, error = %e, "subscription replay failed"),
            }
        }
    }

    /// Consumes session events until the session drops or shutdown is
    /// requested. Returns `true` on shutdown.
    async fn pump(&mut self, publisher: &T::Publisher) -> bool {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return true,
                Some((filter, qos)) = self.subscribe_rx.recv() => {
                    if let Err(e) = publisher.subscribe(&filter, qos).await {
                        tracing::warn!(filter = %filter, error = %e, "subscribe failed");
                    }
                }
                event = self.transport.next_event() => match event {
                    Some(TransportEvent::Message { topic, payload, properties }) => {
                        if !self.intake_cancel.is_cancelled() {
                            self.router.route(topic, payload, properties);
                        }
                    }
                    Some(TransportEvent::Disconnected) | None => return false,
                }
            }
        }
    }
}

/// Drains the publish queue through the live session.
///
/// Strict FIFO; adjacent publishes are separated by at least `throttle`.
/// Messages popped while disconnected wait for the next session. A
/// failed QoS-1 publish is retried once before the failure is logged.
/// On cancellation the remaining queue is flushed best-effort, QoS-1
/// first.
pub(crate) async fn run_drainer<P: TransportPublisher>(
    queue: Arc<PublishQueue>,
    mut publisher_rx: watch::Receiver<Option<P>>,
    throttle: Duration,
    cancel: CancellationToken,
) {
    let mut last_publish: Option<Instant> = None;

    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => break,
            message = queue.pop() => message,
        };

        let publisher = tokio::select! {
            () = cancel.cancelled() => {
                queue.push_front(message);
                break;
            }
            publisher = wait_for_publisher(&mut publisher_rx) => match publisher {
                Some(publisher) => publisher,
                None => {
                    queue.push_front(message);
                    break;
                }
            }
        };

        if let Some(last) = last_publish {
            tokio::time::sleep_until(last + throttle).await;
        }

        publish_with_retry(&publisher, &message).await;
        last_publish = Some(Instant::now());
    }

    flush_remaining(&queue, &publisher_rx).await;
}

/// Publishes one message, retrying a failed QoS-1 publish once.
///
/// The failure stays non-fatal either way; a lost command response is
/// logged, never allowed to stall the queue.
async fn publish_with_retry<P: TransportPublisher>(publisher: &P, message: &OutboundMessage) {
    let attempts = if message.qos == QoS::AtLeastOnce { 2 } else { 1 };
    for attempt in 1..=attempts {
        match publisher
            .publish(&message.topic, message.payload.clone(), message.qos, message.retain)
            .await
        {
            Ok(()) => {
                tracing::trace!(topic = %message.topic, "published");
                return;
            }
            Err(e) if attempt < attempts => {
                tracing::debug!(topic = %message.topic, error = %e, "publish failed, retrying once");
            }
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "publish failed");
            }
        }
    }
}

/// Best-effort flush at shutdown: QoS-1 command responses first, then
/// QoS-0 status and logs, no throttle.
async fn flush_remaining<P: TransportPublisher>(
    queue: &PublishQueue,
    publisher_rx: &watch::Receiver<Option<P>>,
) {
    let publisher = publisher_rx.borrow().clone();
    let Some(publisher) = publisher else {
        if !queue.is_empty() {
            tracing::debug!(
                dropped = queue.len(),
                "no broker session at shutdown, discarding queued publishes"
            );
        }
        return;
    };

    for message in queue.drain_by_priority() {
        if let Err(e) = publisher
            .publish(&message.topic, message.payload, message.qos, message.retain)
            .await
        {
            tracing::debug!(topic = %message.topic, error = %e, "flush publish failed");
        }
    }
}

async fn wait_for_publisher<P: Clone>(rx: &mut watch::Receiver<Option<P>>) -> Option<P> {
    loop {
        if let Some(publisher) = rx.borrow_and_update().as_ref() {
            return Some(publisher.clone());
        }
        if rx.changed().await.is_err() {
            return None;
        }
    }
}
