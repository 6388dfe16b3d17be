// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The command error taxonomy.

use std::fmt;

use serde::Serialize;

/// Error codes carried in the `error_code` field of acks and completions.
///
/// | Code | Phase | Raised when |
/// |---|---|---|
/// | `INVALID_JSON` | ack | payload is not a JSON object |
/// | `INVALID_PAYLOAD` | ack | object lacks `cmd_id` or a command name |
/// | `UNKNOWN_COMMAND` | completion | no handler registered |
/// | `VALIDATION_ERROR` | completion | schema rejected the payload |
/// | `EXECUTION_ERROR` | completion | handler returned an error |
/// | `INTERNAL_ERROR` | any | unexpected framework-level failure |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Payload is not parseable as a JSON object.
    InvalidJson,
    /// Parsed but missing `cmd_id` or a command name.
    InvalidPayload,
    /// No handler registered for the command name.
    UnknownCommand,
    /// The schema validator rejected the payload.
    ValidationError,
    /// The handler returned an application-level error.
    ExecutionError,
    /// Unexpected framework-level error.
    InternalError,
}

impl ErrorCode {
    /// The wire representation of the code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJson => "INVALID_JSON",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::UnknownCommand => "UNKNOWN_COMMAND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        assert_eq!(ErrorCode::InvalidJson.as_str(), "INVALID_JSON");
        assert_eq!(ErrorCode::InvalidPayload.as_str(), "INVALID_PAYLOAD");
        assert_eq!(ErrorCode::UnknownCommand.as_str(), "UNKNOWN_COMMAND");
        assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
        assert_eq!(ErrorCode::ExecutionError.as_str(), "EXECUTION_ERROR");
        assert_eq!(ErrorCode::InternalError.as_str(), "INTERNAL_ERROR");
    }

    #[test]
    fn serializes_to_wire_name() {
        let json = serde_json::to_string(&ErrorCode::ValidationError).unwrap();
        assert_eq!(json, "\"VALIDATION_ERROR\"");
    }
}
