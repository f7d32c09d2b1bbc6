//! Tool envelope: flat JSON object with `ok`, optional `error`, and tool fields.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::clamp::Clamped;

/// Response of one tool call. Serialises flat: `{"ok":…, "error":…, …fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    #[inline]
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            fields: Map::new(),
        }
    }

    /// Failure: `ok=false` with a message.
    #[inline]
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(msg.into()),
            fields: Map::new(),
        }
    }

    /// Add a field. `ok` and `error` are reserved and ignored here.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if key != "ok" && key != "error" {
            self.fields.insert(key.to_string(), value.into());
        }
        self
    }

    /// Add a serialisable field; values that fail to serialise become null.
    pub fn with_json<T: Serialize>(self, key: &str, value: &T) -> Self {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.with(key, v)
    }

    /// Clamped text under `key` plus `truncated` and `omittedChars`.
    pub fn with_clamped(self, key: &str, clamped: Clamped) -> Self {
        self.with(key, clamped.text)
            .with("truncated", clamped.truncated)
            .with("omittedChars", clamped.omitted_chars)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "ok": false, "error": "failed to serialise envelope" })
        })
    }
}
