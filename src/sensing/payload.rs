//! Typed view of the JSON document published on the `data` topic.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

use crate::db::ChannelReadings;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Every field is optional; keys the firmware did not send stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataPayload {
    #[serde(default, deserialize_with = "number")]
    pub iaq: Option<f64>,
    #[serde(default, deserialize_with = "integer")]
    pub iaq_acc: Option<i64>,
    #[serde(default, deserialize_with = "number")]
    pub bvoc_ppm: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub eco2_ppm: Option<f64>,
    #[serde(default, rename = "temp_C", deserialize_with = "number")]
    pub temp_c: Option<f64>,
    #[serde(default, deserialize_with = "number")]
    pub rh_pct: Option<f64>,
    #[serde(default, rename = "press_hPa", deserialize_with = "number")]
    pub press_hpa: Option<f64>,
}

impl DataPayload {
    pub fn decode(raw: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(raw)?;
        if !value.is_object() {
            return Err(PayloadError::NotAnObject(json_kind(&value)));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn channels(&self) -> ChannelReadings {
        ChannelReadings {
            iaq: self.iaq,
            iaq_accuracy: self.iaq_acc,
            b_voc_eq_ppm: self.bvoc_ppm,
            eco2_ppm: self.eco2_ppm,
            temp_c: self.temp_c,
            rh_pct: self.rh_pct,
            press_hpa: self.press_hpa,
        }
    }
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

// Non-numeric channel values are treated as not reported.
fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()))
}

fn integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_i64().or_else(|| {
            v.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        })
    }))
}
