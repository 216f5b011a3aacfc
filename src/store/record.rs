//! On-disk line format of the sample log
//!
//! One JSON object per line: `{"tag":"TankLevel","ts":1700000000.25,"kind":"float","value":50.0}`.
//! Non-finite floats are written as the strings `"NaN"`, `"inf"` and `"-inf"`
//! because JSON numbers cannot carry them.

use crate::types::{Sample, SampleErrorKind, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Record {
    pub tag: String,
    pub ts: f64,
    pub kind: String,
    pub value: serde_json::Value,
}

impl Record {
    pub fn from_sample(sample: &Sample) -> Self {
        let value = match sample.value {
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(v) => float_to_json(v),
            Value::Error(kind) => serde_json::Value::String(kind.as_str().to_string()),
        };
        Self {
            tag: sample.tag_name.clone(),
            ts: sample.timestamp,
            kind: sample.value.kind().to_string(),
            value,
        }
    }

    pub fn into_sample(self) -> Result<Sample, String> {
        let value = match (self.kind.as_str(), &self.value) {
            ("bool", serde_json::Value::Bool(b)) => Value::Bool(*b),
            ("int", serde_json::Value::Number(n)) => {
                Value::Int(n.as_i64().ok_or_else(|| format!("int out of range: {}", n))?)
            }
            ("float", v) => Value::Float(float_from_json(v)?),
            ("error", serde_json::Value::String(s)) => {
                Value::Error(s.parse::<SampleErrorKind>()?)
            }
            (kind, v) => return Err(format!("bad value {} for kind '{}'", v, kind)),
        };
        if !self.ts.is_finite() {
            return Err("non-finite timestamp".to_string());
        }
        Ok(Sample::new(self.tag, self.ts, value))
    }
}

fn float_to_json(v: f64) -> serde_json::Value {
    if v.is_nan() {
        serde_json::Value::String("NaN".to_string())
    } else if v.is_infinite() {
        let s = if v > 0.0 { "inf" } else { "-inf" };
        serde_json::Value::String(s.to_string())
    } else {
        serde_json::Value::from(v)
    }
}

fn float_from_json(v: &serde_json::Value) -> Result<f64, String> {
    match v {
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| format!("bad float {}", n)),
        serde_json::Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => Err(format!("bad float '{}'", other)),
        },
        other => Err(format!("bad float {}", other)),
    }
}
