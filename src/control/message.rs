use serde_json::Value;
use thiserror::Error;

use super::state::{is_valid_pitch, Pitches, DEFAULT_LOUDNESS};

/// Why a text payload could not be read as a control message
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotObject(&'static str),
}

/// Fields carried by one control message. `None` means "leave unchanged".
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlUpdate {
    pub pitches: Option<Pitches>,
    pub loudness: Option<f32>,
}

impl ControlUpdate {
    pub fn is_empty(&self) -> bool {
        self.pitches.is_none() && self.loudness.is_none()
    }

    /// Human-readable description of the update
    pub fn description(&self) -> String {
        let pitches = match self.pitches {
            Some(p) if p.is_empty() => "silence".to_string(),
            Some(p) => format!("f0s {:?}", p.as_slice()),
            None => "pitch unchanged".to_string(),
        };
        match self.loudness {
            Some(l) => format!("{}, loudness {:.3}", pitches, l),
            None => pitches,
        }
    }
}

/// Parse a text payload into a control update.
///
/// Recognized shapes, in precedence order:
/// `{"f0s": [..]}`, `{"f0": n}` (legacy), `{"loudness": n}`,
/// `{"type": "gain", "value": n}` (legacy, only without `loudness`).
/// A field that fails to parse is left out; the rest of the message still applies.
pub fn parse_control(text: &str) -> Result<ControlUpdate, MessageError> {
    let value: Value = serde_json::from_str(text)?;
    control_from_value(&value)
}

pub fn control_from_value(value: &Value) -> Result<ControlUpdate, MessageError> {
    let object = value
        .as_object()
        .ok_or_else(|| MessageError::NotObject(json_kind(value)))?;

    let pitches = if let Some(raw) = object.get("f0s") {
        parse_f0s(raw)
    } else if let Some(raw) = object.get("f0") {
        // Unparsable or non-positive legacy pitch means silence
        Some(match as_number(raw) {
            Some(f0) if is_valid_pitch(f0) => Pitches::single(f0),
            _ => Pitches::silent(),
        })
    } else {
        None
    };

    let loudness = if let Some(raw) = object.get("loudness") {
        as_number(raw).filter(|l| l.is_finite())
    } else if object.get("type").and_then(|t| t.as_str()) == Some("gain") {
        match object.get("value") {
            Some(raw) => as_number(raw).filter(|l| l.is_finite()),
            None => Some(DEFAULT_LOUDNESS),
        }
    } else {
        None
    };

    Ok(ControlUpdate { pitches, loudness })
}

/// Secret carried by a `{"type": "hello", "secret": ..}` handshake message
pub fn hello_secret(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("hello") {
        return None;
    }
    Some(
        value
            .get("secret")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string(),
    )
}

fn parse_f0s(raw: &Value) -> Option<Pitches> {
    match raw {
        Value::Null => Some(Pitches::silent()),
        Value::Array(items) => Some(Pitches::from_values(items.iter().filter_map(as_number))),
        _ => None,
    }
}

/// Numbers and numeric strings; everything else is unparsable
fn as_number(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
