// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the `icsia_lib` framework.
//!
//! This module provides the error hierarchy for failures across the
//! library: configuration loading, transport communication, payload
//! validation, and status updates.

use thiserror::Error;

use crate::topic::FilterError;

/// The main error type for this library.
#[derive(Debug, Error)]
pub enum Error {
    /// Error occurred while loading or resolving configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error occurred during transport communication.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A command payload was rejected by the schema validator.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A status update was rejected against the status schema.
    #[error("status validation error: {0}")]
    StatusValidation(#[from] StatusValidationError),

    /// `run()` was called while the application is already running.
    #[error("application is already running")]
    AlreadyRunning,
}

/// Errors raised while loading or resolving the application configuration.
///
/// These are the only errors that abort startup; everything else is
/// retried or reported on the wire.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML.
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A required configuration field is missing or empty.
    #[error("missing required config field '{0}'")]
    MissingField(&'static str),

    /// A schema declaration in the configuration could not be parsed.
    #[error("invalid schema for '{name}': {message}")]
    InvalidSchema {
        /// The command name or `status` section the schema belongs to.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// A topic filter in the configuration is not a valid MQTT filter.
    #[error("invalid topic filter: {0}")]
    InvalidFilter(#[from] FilterError),

    /// `register_callback_handler` was called with a name that has no
    /// entry under `subscriptions` in the configuration.
    #[error("no subscription named '{0}' in config")]
    UnknownSubscription(String),
}

/// Errors related to the MQTT transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The MQTT client rejected an operation.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connecting to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Connecting to the broker timed out.
    #[error("connection timed out after {0}s")]
    Timeout(u64),

    /// An internal channel was closed unexpectedly.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// An operation was attempted while disconnected.
    #[error("not connected")]
    NotConnected,
}

/// Errors produced when validating a command payload against its schema.
///
/// The `Display` form of these errors is what ends up in the `error_msg`
/// field of a `VALIDATION_ERROR` completion, so the wording is part of
/// the wire contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is absent from the payload.
    #[error("Missing required field '{0}'")]
    MissingField(String),

    /// A field is present but has the wrong JSON type.
    #[error("Field '{path}' expected {expected}, got {actual}")]
    TypeMismatch {
        /// Dotted path of the offending field.
        path: String,
        /// Expected JSON type name.
        expected: &'static str,
        /// Actual JSON type name.
        actual: &'static str,
    },
}

/// Errors produced when a status update does not match the status schema.
///
/// Status updates are checked strictly: integers and floats are distinct,
/// and nested objects must be supplied whole.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatusValidationError {
    /// A declared field was updated with a value of the wrong type.
    #[error("Field '{path}' expected {expected}, got {actual}")]
    TypeMismatch {
        /// Dotted path of the offending field.
        path: String,
        /// Expected JSON type name.
        expected: &'static str,
        /// Actual JSON type name.
        actual: &'static str,
    },

    /// A nested object update omits one of its declared keys.
    #[error("Field '{path}' missing required key '{key}'")]
    MissingKey {
        /// Dotted path of the nested object.
        path: String,
        /// The declared key that is absent.
        key: String,
    },
}

/// A specialized Result type for this library.
pub type Result<T> = std::result::Result<T, Error>;
