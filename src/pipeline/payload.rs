//! Protected access to the business payload handed to a step
//!
//! Looking up a key the payload does not carry is a data contract violation,
//! not an arbitrary failure: [`Payload::get`] reports it as
//! [`ProcessingError::MissingField`] with the key, the calling location and
//! the keys that were present.

use crate::pipeline::error::ProcessingError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::panic::Location;

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    value: Value,
}

impl Payload {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// Required field; a missing key is a `MissingField` error
    #[track_caller]
    pub fn get(&self, key: &str) -> Result<&Value, ProcessingError> {
        let location = Location::caller();
        self.value
            .get(key)
            .ok_or_else(|| ProcessingError::MissingField {
                key: key.to_string(),
                location: location.to_string(),
                available: self.keys(),
            })
    }

    /// Required field converted to `T`
    #[track_caller]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ProcessingError> {
        let value = self.get(key)?;
        Ok(T::deserialize(value)?)
    }

    /// Optional field
    pub fn try_get(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Top-level keys, empty for non-object payloads
    pub fn keys(&self) -> Vec<String> {
        self.value
            .as_object()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<Payload> for Value {
    fn from(payload: Payload) -> Self {
        payload.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_present_key() {
        let payload = Payload::new(json!({"foo": "bar"}));
        assert_eq!(payload.get("foo").unwrap(), &json!("bar"));
        assert_eq!(payload.try_get("missing"), None);
    }

    #[test]
    fn test_missing_key_reports_caller_location() {
        let payload = Payload::new(json!({"name": "a", "age": 3}));
        let line = line!() + 1;
        let err = payload.get("user_id").unwrap_err();

        match err {
            ProcessingError::MissingField {
                key,
                location,
                available,
            } => {
                assert_eq!(key, "user_id");
                assert!(location.contains("payload.rs"));
                assert!(location.contains(&format!(":{}:", line)));
                assert_eq!(available, vec!["age", "name"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_get_as_converts_and_propagates_location() {
        let payload = Payload::new(json!({"count": 4}));
        let count: u32 = payload.get_as("count").unwrap();
        assert_eq!(count, 4);

        let err = payload.get_as::<String>("count").unwrap_err();
        assert!(matches!(err, ProcessingError::Serialization(_)));

        let err = payload.get_as::<u32>("absent").unwrap_err();
        assert!(matches!(err, ProcessingError::MissingField { .. }));
    }

    #[test]
    fn test_non_object_payload_has_no_keys() {
        let payload = Payload::from(json!([1, 2, 3]));
        assert!(payload.keys().is_empty());
        assert!(payload.get("anything").is_err());
        assert_eq!(Value::from(payload), json!([1, 2, 3]));
    }
}
