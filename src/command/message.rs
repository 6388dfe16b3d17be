// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The parsed inbound command.

use serde_json::{Map, Value};

/// A fully-identified inbound command, ready for validation.
///
/// Exists from the moment the raw payload has yielded a `cmd_id` until
/// the completion publish.
#[derive(Debug, Clone)]
pub struct InboundCommand {
    /// Topic the command arrived on.
    pub topic: String,
    /// Device id from topic segment 1.
    pub device_id: String,
    /// Command name, from the final topic segment or the payload's
    /// `command` field.
    pub name: String,
    /// The parsed payload object.
    pub payload: Map<String, Value>,
    /// Correlation id supplied by the caller, echoed on every response.
    pub cmd_id: String,
    /// The caller's timestamp, or the time of receipt if it sent none.
    pub command_timestamp: String,
}

impl InboundCommand {
    /// Extracts the caller's timestamp from a payload, if present.
    ///
    /// Commands may carry their send time either as `timestamp` or as
    /// `command_timestamp`; both are echoed back unchanged.
    #[must_use]
    pub fn timestamp_of(payload: &Map<String, Value>) -> Option<&str> {
        payload
            .get("timestamp")
            .or_else(|| payload.get("command_timestamp"))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn timestamp_prefers_timestamp_field() {
        let payload = object(json!({
            "timestamp": "2025-08-10T14:30:15.123Z",
            "command_timestamp": "2025-08-10T14:30:00.000Z",
        }));
        assert_eq!(
            InboundCommand::timestamp_of(&payload),
            Some("2025-08-10T14:30:15.123Z")
        );
    }

    #[test]
    fn timestamp_falls_back_to_command_timestamp() {
        let payload = object(json!({"command_timestamp": "2025-08-10T14:30:00.000Z"}));
        assert_eq!(
            InboundCommand::timestamp_of(&payload),
            Some("2025-08-10T14:30:00.000Z")
        );
    }

    #[test]
    fn non_string_timestamp_is_ignored() {
        let payload = object(json!({"timestamp": 12345}));
        assert_eq!(InboundCommand::timestamp_of(&payload), None);
    }
}
