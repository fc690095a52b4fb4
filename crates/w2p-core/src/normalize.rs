//! Event payload normalization.
//!
//! Upstream events carry their schema reference under the JSON-Schema style
//! key `$schema`. Downstream consumers (BigQuery subscriptions in
//! particular) reject field names starting with `$`, so the key is renamed
//! to `schema` before publishing.

use crate::error::DecodeError;
use serde_json::{Map, Value};

/// Key carrying the schema reference in source events.
pub const SCHEMA_REF_KEY: &str = "$schema";

/// Key the schema reference is published under.
pub const SCHEMA_KEY: &str = "schema";

/// A decoded event: one JSON object.
pub type DecodedEvent = Map<String, Value>;

/// Rename `$schema` to `schema`, leaving every other key untouched.
pub fn normalize(mut event: DecodedEvent) -> DecodedEvent {
    if let Some(schema) = event.remove(SCHEMA_REF_KEY) {
        event.insert(SCHEMA_KEY.to_string(), schema);
    }
    event
}

/// Decode frame data into an event. Anything but a JSON object is rejected.
pub fn decode_payload(data: &str) -> Result<DecodedEvent, DecodeError> {
    match serde_json::from_str::<Value>(data)? {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(DecodeError::NotAnObject("array")),
        Value::String(_) => Err(DecodeError::NotAnObject("string")),
        Value::Number(_) => Err(DecodeError::NotAnObject("number")),
        Value::Bool(_) => Err(DecodeError::NotAnObject("boolean")),
        Value::Null => Err(DecodeError::NotAnObject("null")),
    }
}

/// Serialize an event as UTF-8 JSON bytes for publishing.
pub fn encode_payload(event: &DecodedEvent) -> Vec<u8> {
    // Serializing a Map<String, Value> cannot fail.
    serde_json::to_vec(event).unwrap_or_default()
}
