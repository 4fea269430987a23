//! Attribute values.
//!
//! Source records are "whatever fields exist". The shape of each value is
//! decided once, when a node is built, and downstream stages only ever see
//! this tagged form.

use crate::identifier::{is_well_formed, NodeId};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeMap;

/// Ordered attribute mapping (ordered by key, so output is deterministic).
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Plain-text rendering (empty for null).
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Scalar::Null => Json::Null,
            Scalar::Bool(b) => Json::Bool(*b),
            Scalar::Number(n) => Json::Number(n.clone()),
            Scalar::Text(s) => Json::String(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    /// Ordered sequence; normally scalars, small inline objects stay as maps.
    Sequence(Vec<Value>),
    Map(Attributes),
    Reference(NodeId),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Scalar(Scalar::Text(s.into()))
    }

    pub fn null() -> Self {
        Value::Scalar(Scalar::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Scalar(Scalar::Null))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => s.as_text(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Attributes> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Plain-text rendering for scalars and references; `None` for containers.
    pub fn render_scalar(&self) -> Option<String> {
        match self {
            Value::Scalar(s) => Some(s.render()),
            Value::Reference(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Convert plain JSON.
    ///
    /// Strings that are already canonical identifiers under `scheme` become
    /// typed references (no edge is implied by this).
    pub fn from_json(json: &Json, scheme: &str) -> Self {
        match json {
            Json::Null => Value::null(),
            Json::Bool(b) => Value::Scalar(Scalar::Bool(*b)),
            Json::Number(n) => Value::Scalar(Scalar::Number(n.clone())),
            Json::String(s) => {
                if is_well_formed(s, scheme) {
                    match NodeId::from_canonical(s, scheme) {
                        Ok(id) => Value::Reference(id),
                        Err(_) => Value::text(s.clone()),
                    }
                } else {
                    Value::text(s.clone())
                }
            }
            Json::Array(items) => {
                Value::Sequence(items.iter().map(|v| Value::from_json(v, scheme)).collect())
            }
            Json::Object(obj) => Value::Map(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v, scheme)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Scalar(s) => s.to_json(),
            Value::Sequence(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => attributes_to_json(m),
            Value::Reference(id) => {
                let mut obj = Map::new();
                obj.insert("$ref".to_string(), Json::String(id.to_string()));
                Json::Object(obj)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::text(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Scalar(Scalar::Number(Number::from(n)))
    }
}

pub fn attributes_to_json(attrs: &Attributes) -> Json {
    let mut obj = Map::new();
    for (k, v) in attrs {
        obj.insert(k.clone(), v.to_json());
    }
    Json::Object(obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_tags_each_shape() {
        let v = Value::from_json(
            &json!({
                "tier": "prod",
                "replicas": 3,
                "tags": ["a", "b"],
                "db": { "engine": "postgres", "owner": "kg:team:data" }
            }),
            "kg",
        );
        let m = v.as_map().unwrap();
        assert_eq!(m["tier"], Value::text("prod"));
        assert_eq!(m["replicas"], Value::from(3));
        assert_eq!(m["tags"], Value::Sequence(vec![Value::text("a"), Value::text("b")]));
        let db = m["db"].as_map().unwrap();
        assert!(matches!(&db["owner"], Value::Reference(id) if id.as_str() == "kg:team:data"));
    }

    #[test]
    fn reference_serializes_as_ref_object() {
        let id = NodeId::parse("kg:team:data", "kg").unwrap();
        let json = serde_json::to_value(Value::Reference(id)).unwrap();
        assert_eq!(json, json!({"$ref": "kg:team:data"}));
    }
}
