// Workflow Conditions - attribute equality gates checked after the trigger filter

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Open map of `attribute -> expected value` checked against the entity the
/// trigger refers to. Every key must match for the workflow to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct AttributeConditions(pub BTreeMap<String, Value>);

impl AttributeConditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder style insert
    pub fn with(mut self, attribute: &str, expected: impl Into<Value>) -> Self {
        self.0.insert(attribute.to_string(), expected.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Check every condition against a serialized entity.
    pub fn matches(&self, entity: &Value) -> bool {
        self.0.iter().all(|(attribute, expected)| {
            let actual = entity.get(attribute).unwrap_or(&Value::Null);
            values_equal(expected, actual)
        })
    }

    /// Names of the conditions that did not hold, for debug logging.
    pub fn failing(&self, entity: &Value) -> Vec<String> {
        self.0
            .iter()
            .filter(|(attribute, expected)| {
                !values_equal(expected, entity.get(attribute.as_str()).unwrap_or(&Value::Null))
            })
            .map(|(attribute, _)| attribute.clone())
            .collect()
    }

    // Common presets

    pub fn priority(priority: &str) -> Self {
        Self::new().with("priority", priority)
    }

    pub fn assigned_to(user_id: uuid::Uuid) -> Self {
        Self::new().with("assigned_to", user_id.to_string())
    }

    pub fn status(status: &str) -> Self {
        Self::new().with("status", status)
    }
}

/// Equality that tolerates form-builder values: `"3"` equals `3`, `"true"`
/// equals `true` and an empty string equals null.
fn values_equal(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }

    match (expected, actual) {
        (Value::String(e), Value::Null) | (Value::Null, Value::String(e)) => e.is_empty(),
        (Value::String(e), Value::Number(_) | Value::Bool(_)) => e.trim() == actual.to_string(),
        (Value::Number(_) | Value::Bool(_), Value::String(a)) => a.trim() == expected.to_string(),
        (Value::String(e), Value::String(a)) => e.eq_ignore_ascii_case(a) && is_uuid(e),
        (Value::Number(e), Value::Number(a)) => match (e.as_f64(), a.as_f64()) {
            (Some(e), Some(a)) => (e - a).abs() < f64::EPSILON,
            _ => false,
        },
        _ => false,
    }
}

// Uuids may arrive in upper case from some clients.
fn is_uuid(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}
