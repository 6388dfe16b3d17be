// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The outbound publish queue.
//!
//! All publishes leave the process through this queue, in strict FIFO
//! order, drained by a single task that enforces the throttle interval.
//!
//! The queue is unbounded except for one lane: pending QoS-0 status
//! snapshots are capped and dropped oldest-first, so a long disconnect
//! cannot pile up stale retained states. Command responses and log
//! records are never dropped.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::transport::QoS;

/// Default cap on pending status snapshots.
pub(crate) const DEFAULT_STATUS_LANE_CAP: usize = 8;

/// Classification of an outbound message, used for queue overflow and
/// shutdown-drain priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// QoS-1 ack or completion.
    CommandResponse,
    /// QoS-0 retained status snapshot.
    Status,
    /// QoS-0 log record.
    Log,
}

/// A message queued for publishing.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
    /// Delivery guarantee.
    pub qos: QoS,
    /// Retain flag.
    pub retain: bool,
    /// Message class.
    pub class: MessageClass,
}

impl OutboundMessage {
    /// A QoS-1, non-retained command response (ack or completion).
    #[must_use]
    pub fn command_response(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            payload,
            qos: QoS::AtLeastOnce,
            retain: false,
            class: MessageClass::CommandResponse,
        }
    }

    /// A QoS-0, retained status snapshot.
    #[must_use]
    pub fn status(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            payload,
            qos: QoS::AtMostOnce,
            retain: true,
            class: MessageClass::Status,
        }
    }

    /// A QoS-0, non-retained log record.
    #[must_use]
    pub fn log(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            payload,
            qos: QoS::AtMostOnce,
            retain: false,
            class: MessageClass::Log,
        }
    }
}

/// FIFO queue between publish producers and the drainer task.
#[derive(Debug)]
pub struct PublishQueue {
    inner: Mutex<VecDeque<OutboundMessage>>,
    notify: Notify,
    status_lane_cap: usize,
}

impl PublishQueue {
    /// Creates a queue with the given cap on pending status snapshots.
    #[must_use]
    pub fn new(status_lane_cap: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            status_lane_cap,
        }
    }

    /// Enqueues a message.
    ///
    /// If the message is a status snapshot and the pending status count
    /// is at the cap, the oldest pending status is dropped.
    pub fn push(&self, message: OutboundMessage) {
        {
            let mut queue = self.inner.lock();
            if message.class == MessageClass::Status {
                let pending = queue
                    .iter()
                    .filter(|m| m.class == MessageClass::Status)
                    .count();
                if pending >= self.status_lane_cap
                    && let Some(oldest) = queue
                        .iter()
                        .position(|m| m.class == MessageClass::Status)
                {
                    tracing::debug!("dropping oldest pending status snapshot");
                    queue.remove(oldest);
                }
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Puts a message back at the head of the queue.
    ///
    /// Used by the drainer when shutdown interrupts it between popping
    /// and publishing.
    pub fn push_front(&self, message: OutboundMessage) {
        self.inner.lock().push_front(message);
        self.notify.notify_one();
    }

    /// Removes and returns the next message, waiting if the queue is
    /// empty. Single-consumer.
    pub async fn pop(&self) -> OutboundMessage {
        loop {
            if let Some(message) = self.inner.lock().pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    /// Takes every queued message, QoS-1 first.
    ///
    /// Relative order within each QoS level is preserved. Used for the
    /// best-effort flush at shutdown.
    #[must_use]
    pub fn drain_by_priority(&self) -> Vec<OutboundMessage> {
        let drained: Vec<OutboundMessage> = self.inner.lock().drain(..).collect();
        let (urgent, rest): (Vec<_>, Vec<_>) = drained
            .into_iter()
            .partition(|m| m.qos == QoS::AtLeastOnce);
        urgent.into_iter().chain(rest).collect()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for PublishQueue {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_LANE_CAP)
    }
}
