// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Walks over the schema tree.
//!
//! Three entry points share the tree from [`super::SchemaNode`]:
//!
//! - [`validate_and_default`] checks an inbound command payload and fills
//!   optional defaults. Scalar exemplars are type checks only; a numeric
//!   exemplar accepts both integers and floats.
//! - [`build_status_template`] seeds the initial status snapshot; here
//!   every leaf contributes its value.
//! - [`validate_status_update`] checks a partial status update strictly:
//!   integers and floats are distinct and nested objects must be
//!   supplied whole.

use serde_json::{Map, Value};

use super::{SchemaNode, join_path, json_type_name};
use crate::error::{StatusValidationError, ValidationError};

/// Validates `payload` against `schema` and returns a new payload with
/// defaults filled in.
///
/// The input is not mutated; fields not mentioned in the schema are
/// preserved verbatim. The function is pure and idempotent: validating
/// an already-validated payload returns it unchanged.
///
/// # Errors
///
/// Returns [`ValidationError`] citing the dotted path of the first
/// missing or mistyped field.
pub fn validate_and_default(
    payload: &Map<String, Value>,
    schema: &SchemaNode,
) -> Result<Map<String, Value>, ValidationError> {
    match schema {
        SchemaNode::Object(children) => validate_object(payload, children, ""),
        // A command schema that is not an object imposes nothing.
        _ => Ok(payload.clone()),
    }
}

fn validate_object(
    payload: &Map<String, Value>,
    children: &std::collections::BTreeMap<String, SchemaNode>,
    path: &str,
) -> Result<Map<String, Value>, ValidationError> {
    let mut result = payload.clone();

    for (key, node) in children {
        let field_path = join_path(path, key);
        match node {
            SchemaNode::Required(exemplar) => {
                let value = payload
                    .get(key)
                    .ok_or_else(|| ValidationError::MissingField(field_path.clone()))?;
                check_exemplar_type(value, exemplar, &field_path)?;
            }
            SchemaNode::Default(default) => {
                if !payload.contains_key(key) {
                    result.insert(key.clone(), default.clone());
                }
            }
            SchemaNode::Object(nested) => {
                let value = payload
                    .get(key)
                    .ok_or_else(|| ValidationError::MissingField(field_path.clone()))?;
                let Value::Object(nested_payload) = value else {
                    return Err(ValidationError::TypeMismatch {
                        path: field_path,
                        expected: "object",
                        actual: json_type_name(value),
                    });
                };
                let validated = validate_object(nested_payload, nested, &field_path)?;
                result.insert(key.clone(), Value::Object(validated));
            }
            SchemaNode::Any => {}
        }
    }

    Ok(result)
}

/// Checks a payload value against a scalar exemplar.
///
/// Numeric exemplars accept any JSON number; strings and booleans are
/// strict.
fn check_exemplar_type(
    value: &Value,
    exemplar: &Value,
    path: &str,
) -> Result<(), ValidationError> {
    let ok = match exemplar {
        Value::Number(_) => value.is_number(),
        Value::String(_) => value.is_string(),
        Value::Bool(_) => value.is_boolean(),
        // Non-scalar exemplars cannot be constructed by the parser.
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::TypeMismatch {
            path: path.to_string(),
            expected: exemplar_type_name(exemplar),
            actual: json_type_name(value),
        })
    }
}

fn exemplar_type_name(exemplar: &Value) -> &'static str {
    match exemplar {
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Bool(_) => "boolean",
        other => json_type_name(other),
    }
}

/// Builds the initial status snapshot from the status schema.
///
/// Every leaf contributes its value: scalar exemplars their baseline,
/// explicit defaults their default. `{}` nodes contribute an empty
/// object so the declared key exists from the start.
#[must_use]
pub fn build_status_template(schema: &SchemaNode) -> Map<String, Value> {
    let mut template = Map::new();
    if let SchemaNode::Object(children) = schema {
        for (key, node) in children {
            template.insert(key.clone(), template_value(node));
        }
    }
    template
}

fn template_value(node: &SchemaNode) -> Value {
    match node {
        SchemaNode::Required(value) | SchemaNode::Default(value) => value.clone(),
        SchemaNode::Object(children) => {
            let mut nested = Map::new();
            for (key, child) in children {
                nested.insert(key.clone(), template_value(child));
            }
            Value::Object(nested)
        }
        SchemaNode::Any => Value::Object(Map::new()),
    }
}

/// Validates a partial status update against the status schema.
///
/// Declared fields must match the exemplar's type exactly (integer and
/// float are distinct here), nested objects must be supplied with all
/// declared keys, and undeclared fields pass through unchecked.
///
/// # Errors
///
/// Returns [`StatusValidationError`] for the first violation; the caller
/// must not apply any part of a rejected update.
pub fn validate_status_update(
    partial: &Map<String, Value>,
    schema: &SchemaNode,
) -> Result<(), StatusValidationError> {
    let SchemaNode::Object(children) = schema else {
        return Ok(());
    };
    for (key, value) in partial {
        if let Some(node) = children.get(key) {
            check_status_value(value, node, key)?;
        }
    }
    Ok(())
}

fn check_status_value(
    value: &Value,
    node: &SchemaNode,
    path: &str,
) -> Result<(), StatusValidationError> {
    match node {
        SchemaNode::Required(exemplar) | SchemaNode::Default(exemplar) => {
            let expected = json_type_name(exemplar);
            let actual = json_type_name(value);
            if expected != actual {
                return Err(StatusValidationError::TypeMismatch {
                    path: path.to_string(),
                    expected,
                    actual,
                });
            }
            Ok(())
        }
        SchemaNode::Object(children) => {
            let Value::Object(map) = value else {
                return Err(StatusValidationError::TypeMismatch {
                    path: path.to_string(),
                    expected: "object",
                    actual: json_type_name(value),
                });
            };
            for (key, child) in children {
                let Some(child_value) = map.get(key) else {
                    return Err(StatusValidationError::MissingKey {
                        path: path.to_string(),
                        key: key.clone(),
                    });
                };
                check_status_value(child_value, child, &join_path(path, key))?;
            }
            Ok(())
        }
        SchemaNode::Any => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(value: Value) -> SchemaNode {
        SchemaNode::from_value(&value).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn move_schema() -> SchemaNode {
        schema(json!({
            "target_position": {"x": 0.0, "y": 0.0, "z": 0.0},
            "speed": {"default": 100},
            "mode": "absolute",
        }))
    }

    #[test]
    fn valid_payload_gets_defaults() {
        let payload = object(json!({
            "cmd_id": "a",
            "target_position": {"x": 1, "y": 2, "z": 3},
            "mode": "absolute",
        }));

        let validated = validate_and_default(&payload, &move_schema()).unwrap();
        assert_eq!(validated["speed"], json!(100));
        assert_eq!(validated["target_position"], json!({"x": 1, "y": 2, "z": 3}));
        // Undeclared fields pass through.
        assert_eq!(validated["cmd_id"], json!("a"));
        // Input untouched.
        assert!(!payload.contains_key("speed"));
    }

    #[test]
    fn missing_required_field_cites_path() {
        let payload = object(json!({"cmd_id": "b", "mode": "absolute"}));
        let err = validate_and_default(&payload, &move_schema()).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field 'target_position'");
    }

    #[test]
    fn missing_nested_field_cites_dotted_path() {
        let payload = object(json!({
            "target_position": {"x": 1, "y": 2},
            "mode": "absolute",
        }));
        let err = validate_and_default(&payload, &move_schema()).unwrap_err();
        assert_eq!(err.to_string(), "Missing required field 'target_position.z'");
    }

    #[test]
    fn numeric_exemplar_accepts_int_and_float() {
        let s = schema(json!({"speed": 100}));

        assert!(validate_and_default(&object(json!({"speed": 50})), &s).is_ok());
        assert!(validate_and_default(&object(json!({"speed": 50.5})), &s).is_ok());

        let err = validate_and_default(&object(json!({"speed": "fast"})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'speed' expected number, got string");
    }

    #[test]
    fn string_and_bool_exemplars_are_strict() {
        let s = schema(json!({"mode": "absolute", "enabled": true}));

        let err =
            validate_and_default(&object(json!({"mode": 1, "enabled": true})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'mode' expected string, got integer");

        let err =
            validate_and_default(&object(json!({"mode": "x", "enabled": "yes"})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'enabled' expected boolean, got string");
    }

    #[test]
    fn explicit_default_skips_type_check() {
        let s = schema(json!({"speed": {"default": 100}}));
        // Any type is accepted when the field is present.
        let validated = validate_and_default(&object(json!({"speed": "slow"})), &s).unwrap();
        assert_eq!(validated["speed"], json!("slow"));
    }

    #[test]
    fn nested_value_must_be_object() {
        let payload = object(json!({"target_position": 3, "mode": "absolute"}));
        let err = validate_and_default(&payload, &move_schema()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Field 'target_position' expected object, got integer"
        );
    }

    #[test]
    fn any_node_accepts_everything() {
        let s = schema(json!({"extra": {}}));
        assert!(validate_and_default(&object(json!({"extra": [1, 2]})), &s).is_ok());
        assert!(validate_and_default(&object(json!({})), &s).is_ok());
    }

    #[test]
    fn validation_is_idempotent() {
        let payload = object(json!({
            "target_position": {"x": 1, "y": 2, "z": 3},
            "mode": "absolute",
        }));
        let s = move_schema();

        let once = validate_and_default(&payload, &s).unwrap();
        let twice = validate_and_default(&once, &s).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn status_template_uses_leaf_values() {
        let s = schema(json!({
            "current_position": {"x": 0.0, "y": 0.0, "z": 0.0},
            "speed": 100,
            "temperature": {"default": 25.0},
            "extra": {},
        }));

        let template = build_status_template(&s);
        assert_eq!(template["current_position"], json!({"x": 0.0, "y": 0.0, "z": 0.0}));
        assert_eq!(template["speed"], json!(100));
        assert_eq!(template["temperature"], json!(25.0));
        assert_eq!(template["extra"], json!({}));
    }

    #[test]
    fn status_update_type_mismatch_is_strict() {
        let s = schema(json!({"temperature": 25.0, "speed": 100, "moving": false, "mode": "idle"}));

        let err = validate_status_update(&object(json!({"temperature": "hot"})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'temperature' expected float, got string");

        // Integer and float are distinct for status fields.
        let err = validate_status_update(&object(json!({"speed": 100.5})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'speed' expected integer, got float");

        let err = validate_status_update(&object(json!({"temperature": 30})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'temperature' expected float, got integer");

        let err = validate_status_update(&object(json!({"moving": "yes"})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'moving' expected boolean, got string");

        let err = validate_status_update(&object(json!({"mode": 123})), &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'mode' expected string, got integer");
    }

    #[test]
    fn status_update_nested_object_must_be_whole() {
        let s = schema(json!({"position": {"x": 0.0, "y": 0.0, "z": 0.0}}));

        let ok = object(json!({"position": {"x": 1.5, "y": 2.0, "z": -0.5}}));
        assert!(validate_status_update(&ok, &s).is_ok());

        let partial = object(json!({"position": {"x": 1.0, "y": 2.0}}));
        let err = validate_status_update(&partial, &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'position' missing required key 'z'");

        let wrong = object(json!({"position": {"x": "invalid", "y": 2.0, "z": 1.0}}));
        let err = validate_status_update(&wrong, &s).unwrap_err();
        assert_eq!(err.to_string(), "Field 'position.x' expected float, got string");
    }

    #[test]
    fn status_update_allows_undeclared_fields() {
        let s = schema(json!({"temperature": 25.0}));
        let update = object(json!({
            "temperature": 30.0,
            "new_field": "any_value",
            "custom_data": {"arbitrary": "structure"},
        }));
        assert!(validate_status_update(&update, &s).is_ok());
    }

    #[test]
    fn status_update_without_schema_is_unchecked() {
        let update = object(json!({"anything": ["goes", 1, true]}));
        assert!(validate_status_update(&update, &SchemaNode::Any).is_ok());
    }
}
