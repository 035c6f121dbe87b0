//! Validation error type shared by event construction, feed parsing,
//! and filter config validation.

use serde_json::Value;
use thiserror::Error;

/// A record, event, or config failed validation. Carries the offending
/// field so feed adapters can log something actionable before discarding.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    pub fn missing(field: &'static str) -> Self {
        Self::new(field, "missing required field")
    }
}

/// Required numeric field from a raw feed record.
pub(crate) fn req_f64(raw: &Value, field: &'static str) -> Result<f64, ValidationError> {
    raw.get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| ValidationError::missing(field))
}

/// Required string field from a raw feed record.
pub(crate) fn req_str<'a>(raw: &'a Value, field: &'static str) -> Result<&'a str, ValidationError> {
    raw.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::missing(field))
}

pub(crate) fn opt_f64(raw: &Value, field: &str) -> Option<f64> {
    raw.get(field).and_then(Value::as_f64)
}
