//! Conversion between value trees and `serde_json::Value`.
//!
//! Objects map to children, arrays to multi-element vectors. A node that has
//! both a scalar and children carries the scalar under the `"$"` key. A
//! top-level array becomes the children of the reserved field `"_"`.
//! Binary scalars are rendered as base64 strings.

use crate::value::{Scalar, Value};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Number, Value as Json};

pub const SCALAR_KEY: &str = "$";
pub const ROOT_ARRAY_KEY: &str = "_";

fn scalar_from_json(json: &Json) -> Scalar {
    match json {
        Json::Null | Json::Array(_) | Json::Object(_) => Scalar::Undefined,
        Json::Bool(b) => Scalar::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Scalar::Int(i),
            None => Scalar::Real(n.as_f64().unwrap_or(0.0)),
        },
        Json::String(s) => Scalar::Str(s.clone()),
    }
}

fn scalar_to_json(scalar: &Scalar) -> Json {
    match scalar {
        Scalar::Undefined => Json::Null,
        Scalar::Str(s) => Json::String(s.clone()),
        Scalar::Int(n) => Json::Number((*n).into()),
        Scalar::Real(r) => Number::from_f64(*r).map_or(Json::Null, Json::Number),
        Scalar::Bool(b) => Json::Bool(*b),
        Scalar::Bytes(b) => Json::String(STANDARD.encode(b)),
    }
}

fn fill(target: &Value, json: &Json) {
    match json {
        Json::Object(map) => {
            for (key, item) in map {
                if key == SCALAR_KEY {
                    target.set_scalar(scalar_from_json(item));
                    continue;
                }
                let vector = target.children(key);
                match item {
                    Json::Array(items) => {
                        for element in items {
                            vector.add(Value::from_json(element));
                        }
                    }
                    other => vector.add(Value::from_json(other)),
                }
            }
        }
        Json::Array(items) => {
            let vector = target.children(ROOT_ARRAY_KEY);
            for element in items {
                vector.add(Value::from_json(element));
            }
        }
        primitive => target.set_scalar(scalar_from_json(primitive)),
    }
}

impl Value {
    /// Build a fresh tree from a JSON document.
    pub fn from_json(json: &Json) -> Value {
        let value = Value::new();
        fill(&value, json);
        value
    }

    /// Render this tree as JSON. Links are followed.
    pub fn to_json(&self) -> Json {
        let names = self.child_names();
        if names.is_empty() {
            return scalar_to_json(&self.scalar());
        }

        let mut map = Map::new();
        let scalar = self.scalar();
        if scalar.is_defined() {
            map.insert(SCALAR_KEY.to_string(), scalar_to_json(&scalar));
        }
        for name in names {
            let elements: Vec<Json> = self
                .children(&name)
                .values()
                .iter()
                .map(Value::to_json)
                .collect();
            let rendered = if elements.len() == 1 {
                elements.into_iter().next().unwrap_or(Json::Null)
            } else {
                Json::Array(elements)
            };
            map.insert(name, rendered);
        }
        Json::Object(map)
    }
}
