//! Codec for encoding and decoding Courier envelopes.
//!
//! Every frame is a single WebSocket text message holding a JSON object of the
//! form `{"event": "<name>", "data": <payload>}`. Decoding is parse-or-reject:
//! a frame is only handed to the caller once it has been deserialized into a
//! typed event and passed [`Validate`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error (malformed frame, unknown event,
    /// missing or mistyped field).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame parsed but its content violates a payload rule.
    #[error("Invalid frame: {0}")]
    Invalid(String),

    /// Binary frames are not part of the protocol.
    #[error("Binary frames are not supported")]
    Binary,
}

impl ProtocolError {
    /// Shorthand for an [`ProtocolError::Invalid`] error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        ProtocolError::Invalid(reason.into())
    }
}

/// Payload rules checked after deserialization.
pub trait Validate {
    /// Check the value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Invalid`] describing the first violated rule.
    fn validate(&self) -> Result<(), ProtocolError>;
}

impl<T: Validate> Validate for [T] {
    fn validate(&self) -> Result<(), ProtocolError> {
        self.iter().try_for_each(Validate::validate)
    }
}

/// Reject non-positive identifiers.
///
/// # Errors
///
/// Returns [`ProtocolError::Invalid`] naming the offending field.
pub fn ensure_id(field: &str, value: i64) -> Result<(), ProtocolError> {
    if value <= 0 {
        return Err(ProtocolError::invalid(format!(
            "{field} must be positive, got {value}"
        )));
    }
    Ok(())
}

/// Encode a frame to envelope text.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode and validate a frame from envelope text.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not a known event, or
/// fails validation.
pub fn decode<T>(text: &str) -> Result<T, ProtocolError>
where
    T: DeserializeOwned + Validate,
{
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let frame: T = serde_json::from_str(text)?;
    frame.validate()?;
    Ok(frame)
}

/// Peek at the event name of a frame without decoding its payload.
///
/// Used for logging and metrics on frames that fail to decode.
#[must_use]
pub fn event_name(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("event")?.as_str().map(str::to_string)
}
