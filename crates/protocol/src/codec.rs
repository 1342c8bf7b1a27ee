//! Stateless translation between wire bytes and typed events.
//!
//! Decoding classifies failures so the caller can pick its own policy: a
//! payload that is not an object with a string `type` is malformed, an unknown
//! `type` is reported by name, and a known type with a broken body is a
//! missing field.

use crate::events::{IncomingEvent, OutgoingEvent};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

/// Errors produced while decoding or encoding wire events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
    #[error("Missing or invalid field: {0}")]
    MissingField(String),
    #[error("Value cannot be encoded: {0}")]
    UnencodableValue(String),
}

/// Decodes one agent -> client event.
pub fn decode(bytes: &[u8]) -> Result<IncomingEvent, CodecError> {
    let object = parse_object(bytes)?;
    decode_tagged(object, IncomingEvent::TYPES)
}

/// Encodes one client -> agent event.
pub fn encode(event: &OutgoingEvent) -> Result<Vec<u8>, CodecError> {
    match event {
        OutgoingEvent::UserAudioChunk(chunk) => {
            let mut frame = Map::new();
            frame.insert(
                OutgoingEvent::AUDIO_CHUNK_FIELD.to_string(),
                Value::String(chunk.clone()),
            );
            to_bytes(&frame)
        }
        tagged => to_bytes(tagged),
    }
}

/// Decodes a client -> agent event. Used by agent-side tooling and tests.
pub fn decode_outgoing(bytes: &[u8]) -> Result<OutgoingEvent, CodecError> {
    let object = parse_object(bytes)?;
    if !object.contains_key("type") {
        if let Some(chunk) = object.get(OutgoingEvent::AUDIO_CHUNK_FIELD) {
            return match chunk {
                Value::String(chunk) => Ok(OutgoingEvent::UserAudioChunk(chunk.clone())),
                _ => Err(CodecError::MissingField(format!(
                    "`{}` must be a string",
                    OutgoingEvent::AUDIO_CHUNK_FIELD
                ))),
            };
        }
    }
    decode_tagged(object, OutgoingEvent::TYPES)
}

/// Encodes an agent -> client event. Used by agent-side tooling and tests.
pub fn encode_incoming(event: &IncomingEvent) -> Result<Vec<u8>, CodecError> {
    to_bytes(event)
}

fn parse_object(bytes: &[u8]) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(CodecError::MalformedPayload(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(CodecError::MalformedPayload(e.to_string())),
    }
}

fn decode_tagged<T: DeserializeOwned>(
    object: Map<String, Value>,
    known: &[&str],
) -> Result<T, CodecError> {
    let tag = match object.get("type") {
        Some(Value::String(tag)) => tag.as_str(),
        Some(other) => {
            return Err(CodecError::MalformedPayload(format!(
                "`type` must be a string, got {}",
                json_kind(other)
            )));
        }
        None => {
            return Err(CodecError::MalformedPayload(
                "missing `type` discriminator".to_string(),
            ));
        }
    };
    if !known.contains(&tag) {
        return Err(CodecError::UnknownEventType(tag.to_string()));
    }
    serde_json::from_value(Value::Object(object))
        .map_err(|e| CodecError::MissingField(e.to_string()))
}

fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(value).map_err(|e| CodecError::UnencodableValue(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
