//! Tensor-scalar normalization.
//!
//! Face analysis results come out of the ONNX runtime as tensor element types
//! (`f32` probabilities, `i32` box coordinates). `ModelValue` keeps that typing
//! until the result is handed to serde, where `normalize` turns every scalar
//! into its native JSON counterpart.

use serde_json::{Map, Number, Value};

/// A model output tree with tensor-typed scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    List(Vec<ModelValue>),
    /// Insertion-ordered key/value pairs.
    Map(Vec<(String, ModelValue)>),
}

impl ModelValue {
    /// Look up a key in a `Map` value.
    pub fn get(&self, key: &str) -> Option<&ModelValue> {
        match self {
            ModelValue::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ModelValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Value> for ModelValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => ModelValue::Null,
            Value::Bool(b) => ModelValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ModelValue::I64(i)
                } else {
                    // u64 beyond i64::MAX also lands here
                    ModelValue::F64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => ModelValue::Str(s.clone()),
            Value::Array(items) => ModelValue::List(items.iter().map(ModelValue::from).collect()),
            Value::Object(map) => ModelValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), ModelValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Convert a model output tree into plain JSON.
///
/// `f32` values are widened through their shortest decimal form, so a score
/// of `0.1f32` serializes as `0.1`. Non-finite floats become `null`.
pub fn normalize(value: &ModelValue) -> Value {
    match value {
        ModelValue::Null => Value::Null,
        ModelValue::Bool(b) => Value::Bool(*b),
        ModelValue::I32(i) => Value::from(*i),
        ModelValue::I64(i) => Value::from(*i),
        ModelValue::F32(f) => float_value(widen_f32(*f)),
        ModelValue::F64(f) => float_value(*f),
        ModelValue::Str(s) => Value::String(s.clone()),
        ModelValue::List(items) => Value::Array(items.iter().map(normalize).collect()),
        ModelValue::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(k.clone(), normalize(v));
            }
            Value::Object(map)
        }
    }
}

fn widen_f32(f: f32) -> f64 {
    if !f.is_finite() {
        return f as f64;
    }
    f.to_string().parse::<f64>().unwrap_or(f as f64)
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}
