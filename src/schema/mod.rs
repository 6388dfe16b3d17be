// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The declarative payload schema dialect.
//!
//! Command payloads and the status payload are described by a small
//! recursive dialect embedded in the configuration:
//!
//! - A bare scalar declares a **required** field. For command validation
//!   only its type matters (the scalar is a type exemplar); for the
//!   status template its value is the baseline.
//! - A one-key mapping `{default: value}` declares an **optional** field
//!   whose value is filled in when the caller omits it.
//! - Any other mapping declares a required **nested object** whose
//!   entries are validated recursively.
//! - An empty mapping `{}` accepts anything for that key.
//!
//! For example, the `move` command of a motor controller:
//!
//! ```yaml
//! move:
//!   target_position:
//!     x: 0.0
//!     y: 0.0
//!     z: 0.0
//!   speed:
//!     default: 100
//!   mode: "absolute"
//! ```
//!
//! [`SchemaNode::from_value`] parses the dialect; the [`validator`]
//! functions walk it.

mod validator;

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

pub use validator::{build_status_template, validate_and_default, validate_status_update};

/// Error raised when a schema declaration does not fit the dialect.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A schema value is neither a scalar exemplar nor a mapping.
    #[error("unsupported schema value at '{path}': expected scalar or mapping, found {found}")]
    UnsupportedValue {
        /// Dotted path of the offending node.
        path: String,
        /// JSON type name of the value found.
        found: &'static str,
    },
}

/// A parsed schema tree.
///
/// See the [module documentation](self) for the dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    /// Required field declared by a scalar exemplar.
    Required(Value),
    /// Optional field with an explicit default value.
    Default(Value),
    /// Required nested object; children validated recursively.
    Object(BTreeMap<String, SchemaNode>),
    /// Empty mapping: no validation for this key.
    Any,
}

impl SchemaNode {
    /// Parses a schema declaration from its JSON representation.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if a node is an array or null, which the
    /// dialect does not support.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        Self::parse(value, "")
    }

    fn parse(value: &Value, path: &str) -> Result<Self, SchemaError> {
        match value {
            Value::Object(map) if map.is_empty() => Ok(Self::Any),
            Value::Object(map) => {
                if map.len() == 1
                    && let Some(default) = map.get("default")
                {
                    return Ok(Self::Default(default.clone()));
                }
                let mut children = BTreeMap::new();
                for (key, child) in map {
                    let child_path = join_path(path, key);
                    children.insert(key.clone(), Self::parse(child, &child_path)?);
                }
                Ok(Self::Object(children))
            }
            Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(Self::Required(value.clone())),
            other => Err(SchemaError::UnsupportedValue {
                path: if path.is_empty() { "<root>".to_string() } else { path.to_string() },
                found: json_type_name(other),
            }),
        }
    }

    /// Returns the children of an [`SchemaNode::Object`] node, if any.
    #[must_use]
    pub fn children(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match self {
            Self::Object(children) => Some(children),
            _ => None,
        }
    }
}

/// Returns the JSON type name of a value, as used in error messages.
///
/// Integers and floats are reported separately because status updates
/// distinguish them.
#[must_use]
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scalar_parses_as_required() {
        let node = SchemaNode::from_value(&json!("absolute")).unwrap();
        assert_eq!(node, SchemaNode::Required(json!("absolute")));

        let node = SchemaNode::from_value(&json!(100)).unwrap();
        assert_eq!(node, SchemaNode::Required(json!(100)));

        let node = SchemaNode::from_value(&json!(false)).unwrap();
        assert_eq!(node, SchemaNode::Required(json!(false)));
    }

    #[test]
    fn default_mapping_parses_as_optional() {
        let node = SchemaNode::from_value(&json!({"default": 100})).unwrap();
        assert_eq!(node, SchemaNode::Default(json!(100)));
    }

    #[test]
    fn empty_mapping_parses_as_any() {
        let node = SchemaNode::from_value(&json!({})).unwrap();
        assert_eq!(node, SchemaNode::Any);
    }

    #[test]
    fn nested_mapping_parses_recursively() {
        let node = SchemaNode::from_value(&json!({
            "target_position": {"x": 0.0, "y": 0.0, "z": 0.0},
            "speed": {"default": 100},
            "mode": "absolute",
        }))
        .unwrap();

        let children = node.children().unwrap();
        assert!(matches!(children["target_position"], SchemaNode::Object(_)));
        assert_eq!(children["speed"], SchemaNode::Default(json!(100)));
        assert_eq!(children["mode"], SchemaNode::Required(json!("absolute")));
    }

    #[test]
    fn default_key_among_others_is_a_field() {
        // Only a one-key {default: v} mapping is an optional leaf; a
        // mapping that also has other keys declares a field named
        // "default".
        let node = SchemaNode::from_value(&json!({"default": 1, "other": 2})).unwrap();
        let children = node.children().unwrap();
        assert_eq!(children["default"], SchemaNode::Required(json!(1)));
        assert_eq!(children["other"], SchemaNode::Required(json!(2)));
    }

    #[test]
    fn array_is_rejected() {
        let err = SchemaNode::from_value(&json!({"axes": [1, 2, 3]})).unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnsupportedValue {
                path: "axes".to_string(),
                found: "array",
            }
        );
    }

    #[test]
    fn null_is_rejected_at_root() {
        let err = SchemaNode::from_value(&Value::Null).unwrap_err();
        assert!(err.to_string().contains("<root>"));
    }

    #[test]
    fn json_type_names() {
        assert_eq!(json_type_name(&json!(1)), "integer");
        assert_eq!(json_type_name(&json!(1.5)), "float");
        assert_eq!(json_type_name(&json!("s")), "string");
        assert_eq!(json_type_name(&json!(true)), "boolean");
        assert_eq!(json_type_name(&json!([])), "array");
        assert_eq!(json_type_name(&json!({})), "object");
        assert_eq!(json_type_name(&Value::Null), "null");
    }
}
