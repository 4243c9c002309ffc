//! Response structure inference.
//!
//! Derives a type sketch from a response body so a recorded endpoint can
//! document what it returns. Array elements are merged into one item shape:
//! object fields are unioned, integers widen to numbers, `null` yields to any
//! other kind, and any other disagreement becomes `mixed`.

use crate::network::{HttpResponse, ResponseBody};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Inferred shape of a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Structure {
    Object { fields: BTreeMap<String, Structure> },
    Array { items: Box<Structure> },
    String,
    Integer,
    Number,
    Boolean,
    Null,
    Mixed,
    /// Non-JSON textual body.
    Text,
    /// Binary body of `length` bytes.
    Binary { length: usize },
}

impl Structure {
    /// Infer the structure of a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Structure::Null,
            Value::Bool(_) => Structure::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Structure::Integer,
            Value::Number(_) => Structure::Number,
            Value::String(_) => Structure::String,
            Value::Array(items) => Structure::Array {
                items: Box::new(
                    items
                        .iter()
                        .map(Structure::of)
                        .reduce(Structure::merge)
                        .unwrap_or(Structure::Null),
                ),
            },
            Value::Object(map) => Structure::Object {
                fields: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Structure::of(v)))
                    .collect(),
            },
        }
    }

    /// Combine two observations of the same position.
    pub fn merge(self, other: Structure) -> Structure {
        match (self, other) {
            (a, b) if a == b => a,
            (Structure::Null, other) | (other, Structure::Null) => other,
            (Structure::Integer, Structure::Number) | (Structure::Number, Structure::Integer) => {
                Structure::Number
            }
            (Structure::Array { items: a }, Structure::Array { items: b }) => Structure::Array {
                items: Box::new(a.merge(*b)),
            },
            (Structure::Object { fields: mut a }, Structure::Object { fields: b }) => {
                for (name, shape) in b {
                    let merged = match a.remove(&name) {
                        Some(existing) => existing.merge(shape),
                        None => shape,
                    };
                    a.insert(name, merged);
                }
                Structure::Object { fields: a }
            }
            _ => Structure::Mixed,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Structure of a response together with its status and content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseStructure {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub structure: Structure,
}

/// Infer the structure of a response body.
pub fn infer_structure(response: &HttpResponse) -> ResponseStructure {
    let structure = match &response.body {
        ResponseBody::Json(value) => Structure::of(value),
        ResponseBody::Text(_) => Structure::Text,
        ResponseBody::Binary(bytes) => Structure::Binary {
            length: bytes.len(),
        },
    };

    ResponseStructure {
        status: response.status,
        content_type: response.content_type().map(str::to_string),
        structure,
    }
}
