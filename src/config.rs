// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application configuration.
//!
//! Configuration is declarative YAML (or built programmatically) and is
//! immutable once the application starts. Unknown fields are ignored so
//! device programs can keep their own settings in the same file.
//!
//! ```yaml
//! namespace: icsia
//! device:
//!   device_id: motor_controller_01
//! mqtt:
//!   broker: mqtt.example.net
//!   port: 1883
//!   reconnect_interval: 5.0
//!   max_reconnect_attempts: -1
//!   throttle_interval: 0.1
//! status:
//!   publish_interval: 30.0
//!   keepalive_publishing: false
//!   payload:
//!     current_position: {x: 0.0, y: 0.0, z: 0.0}
//!     speed: 100
//! commands:
//!   move:
//!     target_position: {x: 0.0, y: 0.0, z: 0.0}
//!     speed: {default: 100}
//!     mode: "absolute"
//! subscriptions:
//!   ack_monitor:
//!     topic: "icsia/+/status/ack"
//!     callback: on_ack
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::topic::TopicFilter;

fn default_namespace() -> String {
    "icsia".to_string()
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Topic namespace all devices share. Defaults to `icsia`.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Device identity.
    pub device: DeviceSettings,

    /// Broker connection settings.
    #[serde(default)]
    pub mqtt: MqttSettings,

    /// Status publishing settings and status payload schema.
    #[serde(default)]
    pub status: StatusSettings,

    /// Command payload schemas, keyed by command name.
    #[serde(default)]
    pub commands: BTreeMap<String, Value>,

    /// Named subscriptions resolved against registered callback handlers.
    #[serde(default)]
    pub subscriptions: BTreeMap<String, SubscriptionSpec>,

    /// Topic overrides.
    #[serde(default)]
    pub topics: TopicsSettings,
}

impl AppConfig {
    /// Creates a minimal configuration for the given device id.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            namespace: default_namespace(),
            device: DeviceSettings {
                device_id: device_id.into(),
            },
            mqtt: MqttSettings::default(),
            status: StatusSettings::default(),
            commands: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            topics: TopicsSettings::default(),
        }
    }

    /// Parses a configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the YAML is malformed or required
    /// fields are missing.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Checks invariants that would otherwise only surface at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty device id.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.device_id.is_empty() {
            return Err(ConfigError::MissingField("device.device_id"));
        }
        Ok(())
    }

    /// Returns the command subscription filter, honoring the override.
    #[must_use]
    pub fn command_filter(&self) -> String {
        self.topics
            .command
            .clone()
            .unwrap_or_else(|| format!("{}/+/cmd/#", self.namespace))
    }
}

/// Device identity settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    /// Unique id of this device within the namespace.
    pub device_id: String,
}

/// Broker connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Broker host name or address.
    pub broker: String,
    /// Broker port.
    pub port: u16,
    /// Optional broker username.
    pub username: Option<String>,
    /// Optional broker password.
    pub password: Option<String>,
    /// Client id override; generated from process id when absent.
    pub client_id: Option<String>,
    /// MQTT keep-alive, seconds.
    pub keep_alive: f64,
    /// Connect timeout, seconds.
    pub connect_timeout: f64,
    /// Sleep between reconnect attempts, seconds.
    pub reconnect_interval: f64,
    /// Reconnect attempts per disconnection before giving up; −1 retries
    /// forever.
    pub max_reconnect_attempts: i32,
    /// Minimum gap between adjacent outbound publishes, seconds.
    pub throttle_interval: f64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: 1883,
            username: None,
            password: None,
            client_id: None,
            keep_alive: 30.0,
            connect_timeout: 10.0,
            reconnect_interval: 5.0,
            max_reconnect_attempts: -1,
            throttle_interval: 0.1,
        }
    }
}

impl MqttSettings {
    /// Reconnect sleep as a [`Duration`].
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_interval.max(0.0))
    }

    /// Publish throttle as a [`Duration`].
    #[must_use]
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.throttle_interval.max(0.0))
    }
}

/// Status publishing settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    /// Seconds between periodic status wakes.
    pub publish_interval: f64,
    /// Publish on every wake, not only on change.
    pub keepalive_publishing: bool,
    /// Status payload schema.
    pub payload: Value,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            publish_interval: 30.0,
            keepalive_publishing: false,
            payload: Value::Object(serde_json::Map::new()),
        }
    }
}

impl StatusSettings {
    /// Periodic wake interval as a [`Duration`].
    #[must_use]
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs_f64(self.publish_interval.max(0.001))
    }
}

/// A named subscription from the configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Topic pattern to subscribe to. May contain `+` and `#`.
    pub topic: String,
    /// Name of the callback handler to invoke, resolved at registration.
    pub callback: String,
}

/// Topic overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopicsSettings {
    /// Override for the command subscription filter.
    pub command: Option<String>,
    /// Override for the retained status topic.
    pub status_current: Option<String>,
    /// Override for the log topic.
    pub logs: Option<String>,
}

/// The resolved topic layout for one device.
///
/// Publish topics for command responses take the device id of the
/// inbound command, since the command filter carries a `+` wildcard in
/// the device segment.
#[derive(Debug, Clone)]
pub struct TopicScheme {
    namespace: String,
    device_id: String,
    command_filter: TopicFilter,
    status_current: String,
    logs: String,
}

impl TopicScheme {
    /// Resolves the topic layout from a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the command filter override is not a
    /// valid MQTT filter.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let command_filter = TopicFilter::parse(&config.command_filter())?;
        let namespace = config.namespace.clone();
        let device_id = config.device.device_id.clone();
        let status_current = config
            .topics
            .status_current
            .clone()
            .unwrap_or_else(|| format!("{namespace}/{device_id}/status/current"));
        let logs = config
            .topics
            .logs
            .clone()
            .unwrap_or_else(|| format!("{namespace}/{device_id}/logs"));
        Ok(Self {
            namespace,
            device_id,
            command_filter,
            status_current,
            logs,
        })
    }

    /// The namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// This device's id.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The command subscription filter.
    #[must_use]
    pub fn command_filter(&self) -> &TopicFilter {
        &self.command_filter
    }

    /// Acknowledgment topic for a command addressed to `device_id`.
    #[must_use]
    pub fn ack(&self, device_id: &str) -> String {
        format!("{}/{}/status/ack", self.namespace, device_id)
    }

    /// Completion topic for a command addressed to `device_id`.
    #[must_use]
    pub fn completion(&self, device_id: &str) -> String {
        format!("{}/{}/status/completion", self.namespace, device_id)
    }

    /// This device's retained status topic.
    #[must_use]
    pub fn status_current(&self) -> String {
        self.status_current.clone()
    }

    /// This device's log topic.
    #[must_use]
    pub fn logs(&self) -> String {
        self.logs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_yaml_uses_defaults() {
        let config = AppConfig::from_yaml_str("device:\n  device_id: motor_01\n").unwrap();

        assert_eq!(config.namespace, "icsia");
        assert_eq!(config.device.device_id, "motor_01");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.max_reconnect_attempts, -1);
        assert!((config.mqtt.throttle_interval - 0.1).abs() < f64::EPSILON);
        assert!((config.status.publish_interval - 30.0).abs() < f64::EPSILON);
        assert!(!config.status.keepalive_publishing);
        assert_eq!(config.command_filter(), "icsia/+/cmd/#");
    }

    #[test]
    fn full_yaml_round_trip() {
        let yaml = r#"
namespace: plant7
device:
  device_id: cam_02
mqtt:
  broker: mqtt.example.net
  port: 8883
  username: user
  password: secret
  reconnect_interval: 2.5
  max_reconnect_attempts: 5
  throttle_interval: 0.05
status:
  publish_interval: 10.0
  keepalive_publishing: true
  payload:
    frames: 0
    exposure: {default: 1.5}
commands:
  capture:
    count: 1
subscriptions:
  ack_monitor:
    topic: "plant7/+/status/ack"
    callback: on_ack
topics:
  command: "plant7/+/cmd/#"
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.namespace, "plant7");
        assert_eq!(config.mqtt.broker, "mqtt.example.net");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.max_reconnect_attempts, 5);
        assert!(config.status.keepalive_publishing);
        assert_eq!(config.status.payload["frames"], json!(0));
        assert_eq!(config.commands["capture"], json!({"count": 1}));
        assert_eq!(
            config.subscriptions["ack_monitor"],
            SubscriptionSpec {
                topic: "plant7/+/status/ack".to_string(),
                callback: "on_ack".to_string(),
            }
        );
        assert_eq!(config.command_filter(), "plant7/+/cmd/#");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let yaml = "device:\n  device_id: d\nmotor:\n  axes: 3\n";
        assert!(AppConfig::from_yaml_str(yaml).is_ok());
    }

    #[test]
    fn empty_device_id_is_rejected() {
        let err = AppConfig::from_yaml_str("device:\n  device_id: \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("device.device_id")));
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        assert!(matches!(
            AppConfig::from_yaml_str(": not yaml").unwrap_err(),
            ConfigError::Yaml(_)
        ));
    }

    #[test]
    fn topic_scheme_layout() {
        let config = AppConfig::new("motor_01");
        let scheme = TopicScheme::from_config(&config).unwrap();

        assert_eq!(scheme.command_filter().as_str(), "icsia/+/cmd/#");
        assert_eq!(scheme.ack("other_dev"), "icsia/other_dev/status/ack");
        assert_eq!(scheme.completion("m"), "icsia/m/status/completion");
        assert_eq!(scheme.status_current(), "icsia/motor_01/status/current");
        assert_eq!(scheme.logs(), "icsia/motor_01/logs");
    }

    #[test]
    fn topic_overrides_are_honored() {
        let mut config = AppConfig::new("motor_01");
        config.topics.status_current = Some("plant7/motor_01/state".to_string());
        config.topics.logs = Some("plant7/motor_01/journal".to_string());

        let scheme = TopicScheme::from_config(&config).unwrap();
        assert_eq!(scheme.status_current(), "plant7/motor_01/state");
        assert_eq!(scheme.logs(), "plant7/motor_01/journal");
    }

    #[test]
    fn invalid_command_filter_override_is_rejected() {
        let mut config = AppConfig::new("d");
        config.topics.command = Some("icsia/#/cmd".to_string());
        assert!(matches!(
            TopicScheme::from_config(&config).unwrap_err(),
            ConfigError::InvalidFilter(_)
        ));
    }
}
