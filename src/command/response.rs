// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ack and completion wire payloads.

use serde::Serialize;

use super::ErrorCode;
use crate::types::IsoTimestamp;

/// Response phase status, as it appears in the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ResponseStatus {
    /// Ack phase, command accepted.
    Received,
    /// Completion phase, handler finished.
    Completed,
    /// Either phase, something went wrong.
    Error,
}

/// One ack or completion message.
///
/// The constructors make an invalid combination unrepresentable: an
/// error message always carries both `error_code` and `error_msg`, a
/// success message carries neither.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ResponseMessage {
    cmd_id: String,
    status: ResponseStatus,
    timestamp: String,
    command_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_msg: Option<String>,
}

impl ResponseMessage {
    /// A successful acknowledgment.
    pub fn ack(cmd_id: &str, command_timestamp: &str) -> Self {
        Self::new(cmd_id, ResponseStatus::Received, command_timestamp, None)
    }

    /// An error acknowledgment.
    pub fn ack_error(
        cmd_id: &str,
        command_timestamp: &str,
        code: ErrorCode,
        msg: impl Into<String>,
    ) -> Self {
        Self::new(
            cmd_id,
            ResponseStatus::Error,
            command_timestamp,
            Some((code, msg.into())),
        )
    }

    /// A successful completion.
    pub fn completion(cmd_id: &str, command_timestamp: &str) -> Self {
        Self::new(cmd_id, ResponseStatus::Completed, command_timestamp, None)
    }

    /// An error completion.
    pub fn completion_error(
        cmd_id: &str,
        command_timestamp: &str,
        code: ErrorCode,
        msg: impl Into<String>,
    ) -> Self {
        Self::new(
            cmd_id,
            ResponseStatus::Error,
            command_timestamp,
            Some((code, msg.into())),
        )
    }

    fn new(
        cmd_id: &str,
        status: ResponseStatus,
        command_timestamp: &str,
        error: Option<(ErrorCode, String)>,
    ) -> Self {
        let (error_code, error_msg) = match error {
            Some((code, msg)) => (Some(code), Some(msg)),
            None => (None, None),
        };
        Self {
            cmd_id: cmd_id.to_string(),
            status,
            timestamp: IsoTimestamp::now().to_string(),
            command_timestamp: command_timestamp.to_string(),
            error_code,
            error_msg,
        }
    }

    /// Serializes the message to its wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serialization of a struct of strings cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn roundtrip(message: &ResponseMessage) -> Value {
        serde_json::from_slice(&message.to_bytes()).unwrap()
    }

    #[test]
    fn success_ack_has_no_error_fields() {
        let value = roundtrip(&ResponseMessage::ack("cmd_123", "2025-08-10T14:30:15.123Z"));

        assert_eq!(value["cmd_id"], "cmd_123");
        assert_eq!(value["status"], "received");
        assert_eq!(value["command_timestamp"], "2025-08-10T14:30:15.123Z");
        assert!(value.get("error_code").is_none());
        assert!(value.get("error_msg").is_none());
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn error_ack_carries_code_and_message() {
        let value = roundtrip(&ResponseMessage::ack_error(
            "cmd_123",
            "2025-08-10T14:30:15.123Z",
            ErrorCode::InvalidPayload,
            "Missing required field 'cmd_id'",
        ));

        assert_eq!(value["status"], "error");
        assert_eq!(value["error_code"], "INVALID_PAYLOAD");
        assert_eq!(value["error_msg"], "Missing required field 'cmd_id'");
    }

    #[test]
    fn success_completion() {
        let value = roundtrip(&ResponseMessage::completion("a", "2025-08-10T14:30:15.123Z"));
        assert_eq!(value["status"], "completed");
        assert!(value.get("error_code").is_none());
    }

    #[test]
    fn error_completion() {
        let value = roundtrip(&ResponseMessage::completion_error(
            "a",
            "t",
            ErrorCode::ExecutionError,
            "boom",
        ));
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_code"], "EXECUTION_ERROR");
        assert_eq!(value["error_msg"], "boom");
    }
}
