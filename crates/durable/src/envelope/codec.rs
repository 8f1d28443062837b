//! Queue message encoding
//!
//! Message bodies are base64 of the JSON document. Plain JSON bodies are
//! accepted on the way in so messages posted by hand still decode.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{EnvelopeError, WorkflowEnvelope};

/// Encode a value as a queue message body
pub fn encode<T: Serialize>(value: &T) -> Result<String, EnvelopeError> {
    let json = serde_json::to_vec(value).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

/// Decode a queue message body
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T, EnvelopeError> {
    let trimmed = body.trim();
    let json = if trimmed.starts_with('{') {
        trimmed.as_bytes().to_vec()
    } else {
        STANDARD
            .decode(trimmed)
            .map_err(|e| EnvelopeError::Malformed(format!("invalid base64: {e}")))?
    };
    serde_json::from_slice(&json).map_err(|e| EnvelopeError::Malformed(e.to_string()))
}

/// Decode and validate a workflow envelope
pub fn decode_envelope(body: &str) -> Result<WorkflowEnvelope, EnvelopeError> {
    let envelope: WorkflowEnvelope = decode(body)?;
    envelope.validate()?;
    Ok(envelope)
}
