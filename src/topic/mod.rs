// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT topic-filter matching and command-topic parsing.
//!
//! [`TopicFilter`] implements MQTT 3.1.1 filter semantics: `+` matches
//! exactly one non-empty segment, `#` matches zero or more trailing
//! segments and is only legal as the final segment. Matching is
//! case-sensitive and `/`-delimited.
//!
//! [`CommandTopic`] parses the `{namespace}/{device_id}/cmd/{command}`
//! shape that inbound commands arrive on.

use std::fmt;

use thiserror::Error;

/// Error raised when parsing an invalid topic filter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// The filter string is empty.
    #[error("empty topic filter")]
    Empty,

    /// `#` appears somewhere other than the final segment.
    #[error("'#' is only allowed as the final segment: '{0}'")]
    MultiLevelNotLast(String),

    /// A wildcard is mixed with other characters inside one segment.
    #[error("wildcard must occupy a whole segment: '{0}'")]
    PartialWildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    SingleLevel,
    MultiLevel,
}

/// A parsed MQTT topic filter.
///
/// # Examples
///
/// ```
/// use icsia_lib::topic::TopicFilter;
///
/// let filter: TopicFilter = "icsia/+/cmd/#".parse().unwrap();
/// assert!(filter.matches("icsia/motor_01/cmd/move"));
/// assert!(!filter.matches("icsia/motor_01/status/ack"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicFilter {
    /// Parses a topic filter, validating wildcard placement.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if the filter is empty, uses `#` before
    /// the final segment, or mixes a wildcard into a literal segment.
    pub fn parse(filter: &str) -> Result<Self, FilterError> {
        if filter.is_empty() {
            return Err(FilterError::Empty);
        }

        let parts: Vec<&str> = filter.split('/').collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let segment = match *part {
                "+" => Segment::SingleLevel,
                "#" => {
                    if i != last {
                        return Err(FilterError::MultiLevelNotLast(filter.to_string()));
                    }
                    Segment::MultiLevel
                }
                literal => {
                    if literal.contains('+') || literal.contains('#') {
                        return Err(FilterError::PartialWildcard(filter.to_string()));
                    }
                    Segment::Literal(literal.to_string())
                }
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: filter.to_string(),
            segments,
        })
    }

    /// Returns whether `topic` matches this filter.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        // Filters starting with a wildcard do not match topics whose
        // first segment starts with '$' (MQTT 3.1.1, §4.7.2).
        if topic.starts_with('$')
            && matches!(self.segments.first(), Some(Segment::SingleLevel | Segment::MultiLevel))
        {
            return false;
        }

        let topic_segments: Vec<&str> = topic.split('/').collect();
        let mut pos = 0;

        for segment in &self.segments {
            match segment {
                Segment::MultiLevel => return true,
                Segment::SingleLevel => {
                    match topic_segments.get(pos) {
                        Some(s) if !s.is_empty() => pos += 1,
                        _ => return false,
                    }
                }
                Segment::Literal(literal) => {
                    if topic_segments.get(pos).copied() != Some(literal.as_str()) {
                        return false;
                    }
                    pos += 1;
                }
            }
        }

        pos == topic_segments.len()
    }

    /// Returns the filter as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for TopicFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Extracts the device id from a command topic.
///
/// Topics of the shape `{namespace}/{device_id}/cmd/{command}` yield
/// segment 1; anything else yields `None`.
#[must_use]
pub fn extract_device_id<'a>(topic: &'a str, namespace: &str) -> Option<&'a str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() >= 4 && parts[0] == namespace && parts[2] == "cmd" {
        Some(parts[1])
    } else {
        None
    }
}

/// A parsed command topic.
///
/// The command name is the final topic segment. A bare
/// `{namespace}/{device_id}/cmd` topic parses with `command: None`; the
/// command name is then expected in the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopic<'a> {
    /// The device the command is addressed to.
    pub device_id: &'a str,
    /// The command name from the topic, if present.
    pub command: Option<&'a str>,
}

impl<'a> CommandTopic<'a> {
    /// Parses a topic as a command topic under `namespace`.
    #[must_use]
    pub fn parse(topic: &'a str, namespace: &str) -> Option<Self> {
        let parts: Vec<&str> = topic.split('/').collect();
        if parts.len() < 3 || parts[0] != namespace || parts[2] != "cmd" || parts[1].is_empty() {
            return None;
        }
        let command = match parts.len() {
            3 => None,
            _ => parts.last().copied(),
        };
        Some(Self {
            device_id: parts[1],
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_filter_matches_exactly() {
        let f = TopicFilter::parse("a/b/c").unwrap();
        assert!(f.matches("a/b/c"));
        assert!(!f.matches("a/b"));
        assert!(!f.matches("a/b/c/d"));
        assert!(!f.matches("a/b/C"));
    }

    #[test]
    fn single_level_wildcard_matches_one_segment() {
        let f = TopicFilter::parse("icsia/+/cmd/move").unwrap();
        assert!(f.matches("icsia/motor_01/cmd/move"));
        assert!(!f.matches("icsia/cmd/move"));
        assert!(!f.matches("icsia/a/b/cmd/move"));
    }

    #[test]
    fn single_level_wildcard_rejects_empty_segment() {
        let f = TopicFilter::parse("a/+/c").unwrap();
        assert!(!f.matches("a//c"));
    }

    #[test]
    fn multi_level_wildcard_matches_zero_or_more() {
        let f = TopicFilter::parse("icsia/+/cmd/#").unwrap();
        assert!(f.matches("icsia/m/cmd"));
        assert!(f.matches("icsia/m/cmd/move"));
        assert!(f.matches("icsia/m/cmd/move/sub"));
        assert!(!f.matches("icsia/m/status"));
    }

    #[test]
    fn bare_multi_level_matches_everything() {
        let f = TopicFilter::parse("#").unwrap();
        assert!(f.matches("a"));
        assert!(f.matches("a/b/c"));
    }

    #[test]
    fn wildcards_do_not_match_dollar_topics() {
        assert!(!TopicFilter::parse("#").unwrap().matches("$SYS/broker/load"));
        assert!(!TopicFilter::parse("+/broker/load").unwrap().matches("$SYS/broker/load"));
        assert!(TopicFilter::parse("$SYS/#").unwrap().matches("$SYS/broker/load"));
    }

    #[test]
    fn interior_multi_level_is_rejected() {
        let err = TopicFilter::parse("a/#/b").unwrap_err();
        assert!(matches!(err, FilterError::MultiLevelNotLast(_)));
    }

    #[test]
    fn partial_wildcard_is_rejected() {
        assert!(matches!(
            TopicFilter::parse("a/b+/c").unwrap_err(),
            FilterError::PartialWildcard(_)
        ));
        assert!(matches!(
            TopicFilter::parse("a/b#").unwrap_err(),
            FilterError::PartialWildcard(_)
        ));
    }

    #[test]
    fn empty_filter_is_rejected() {
        assert_eq!(TopicFilter::parse("").unwrap_err(), FilterError::Empty);
    }

    #[test]
    fn extract_device_id_from_command_topic() {
        assert_eq!(extract_device_id("icsia/motor_01/cmd/move", "icsia"), Some("motor_01"));
        assert_eq!(extract_device_id("icsia/motor_01/status/ack", "icsia"), None);
        assert_eq!(extract_device_id("other/motor_01/cmd/move", "icsia"), None);
        assert_eq!(extract_device_id("icsia/motor_01/cmd", "icsia"), None);
    }

    #[test]
    fn command_topic_parse() {
        let parsed = CommandTopic::parse("icsia/m/cmd/move", "icsia").unwrap();
        assert_eq!(parsed.device_id, "m");
        assert_eq!(parsed.command, Some("move"));
    }

    #[test]
    fn command_topic_deep_suffix_uses_last_segment() {
        let parsed = CommandTopic::parse("icsia/m/cmd/motion/move", "icsia").unwrap();
        assert_eq!(parsed.command, Some("move"));
    }

    #[test]
    fn command_topic_without_command_segment() {
        let parsed = CommandTopic::parse("icsia/m/cmd", "icsia").unwrap();
        assert_eq!(parsed.device_id, "m");
        assert_eq!(parsed.command, None);
    }

    #[test]
    fn command_topic_wrong_namespace_is_none() {
        assert!(CommandTopic::parse("other/m/cmd/move", "icsia").is_none());
        assert!(CommandTopic::parse("icsia/m/status/ack", "icsia").is_none());
    }
}
