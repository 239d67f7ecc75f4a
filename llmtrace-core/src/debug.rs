//! Parameter overrides applied to a debug replay.
//!
//! Each field is read independently from the caller's JSON object. A field that
//! is present with the wrong type is dropped rather than failing the replay, so
//! the overrides that survive are exactly what the outbound call used.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::ChatCompletionRequest;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
}

impl DebugConfig {
    /// Extract the overrides from an arbitrary JSON value. Non-objects yield no overrides;
    /// unknown keys (the UI also sends `provider` and `model`) are ignored.
    pub fn from_value(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };

        let float = |key: &str| map.get(key).and_then(Value::as_f64).filter(|v| v.is_finite());

        Self {
            temperature: float("temperature"),
            max_tokens: map.get("max_tokens").and_then(token_count),
            top_p: float("top_p"),
            frequency_penalty: float("frequency_penalty"),
            presence_penalty: float("presence_penalty"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the overrides into an outbound request; absent fields leave the request as is.
    pub fn apply(&self, request: &mut ChatCompletionRequest) {
        if let Some(temperature) = self.temperature {
            request.temperature = Some(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request.max_tokens = Some(max_tokens);
        }
        if let Some(top_p) = self.top_p {
            request.top_p = Some(top_p);
        }
        if let Some(frequency_penalty) = self.frequency_penalty {
            request.frequency_penalty = Some(frequency_penalty);
        }
        if let Some(presence_penalty) = self.presence_penalty {
            request.presence_penalty = Some(presence_penalty);
        }
    }

    /// Canonical JSON text stored alongside a replay record.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Non-negative integer, also accepting integral floats such as `256.0`.
fn token_count(value: &Value) -> Option<u32> {
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    let f = value.as_f64()?;
    if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
        Some(f as u32)
    } else {
        None
    }
}
