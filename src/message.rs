//! Control messages sent by controlled pages.

use serde::Deserialize;
use serde_json::Value;

/// A recognised control message. The wire form is an object with a `type`
/// field, e.g. `{"type": "SKIP_WAITING"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Activate the waiting version immediately.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,
    /// Any other `type` value.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Interprets a JSON value. Returns `None` for anything that is not an
    /// object with a string `type` field.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Parses raw JSON text; malformed input yields `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw)
            .ok()
            .as_ref()
            .and_then(Self::from_value)
    }
}
