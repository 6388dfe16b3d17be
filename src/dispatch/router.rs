// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Routes inbound messages to callbacks and the command processor.

use std::sync::Arc;

use crate::command::{CommandProcessor, RawCommand};
use crate::config::TopicScheme;
use crate::dispatch::CallbackRegistry;
use crate::topic::CommandTopic;
use crate::transport::MessageProperties;

/// Fans each inbound message out to matching user callbacks and, for
/// command topics, into the command state machine.
///
/// Callback groups and commands run as their own tasks: a slow callback
/// never stalls the receive pump, and a panicking one is contained by
/// its task.
pub struct MessageRouter {
    callbacks: Arc<CallbackRegistry>,
    scheme: Arc<TopicScheme>,
    processor: Arc<CommandProcessor>,
}

impl MessageRouter {
    pub(crate) fn new(
        callbacks: Arc<CallbackRegistry>,
        scheme: Arc<TopicScheme>,
        processor: Arc<CommandProcessor>,
    ) -> Self {
        Self {
            callbacks,
            scheme,
            processor,
        }
    }

    /// Dispatches one inbound message.
    pub(crate) fn route(
        &self,
        topic: String,
        payload: Vec<u8>,
        properties: Option<MessageProperties>,
    ) {
        let groups = self.callbacks.matching(&topic);
        if !groups.is_empty() {
            let payload_text = String::from_utf8_lossy(&payload).into_owned();
            for group in groups {
                let topic = topic.clone();
                let payload_text = payload_text.clone();
                let properties = properties.clone();
                tokio::spawn(async move {
                    for callback in group {
                        callback(&topic, &payload_text, properties.as_ref());
                    }
                });
            }
        }

        if !self.scheme.command_filter().matches(&topic) {
            return;
        }
        let Some(parsed) = CommandTopic::parse(&topic, self.scheme.namespace()) else {
            tracing::trace!(topic = %topic, "ignoring non-command topic on command filter");
            return;
        };

        let raw = RawCommand {
            device_id: parsed.device_id.to_string(),
            command: parsed.command.map(String::from),
            topic,
            payload,
        };
        let processor = Arc::clone(&self.processor);
        tokio::spawn(processor.process(raw));
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("command_filter", &self.scheme.command_filter().as_str())
            .finish()
    }
}
