//! Metadata payloads and tombstone semantics
//!
//! Writing an empty payload is how callers delete a record. "Empty" is an
//! explicit classification ([`PayloadShape`]) rather than ad hoc checks at
//! each call site.

use serde::Serialize;
use serde_json::Value;

/// Classification of a payload for tombstone purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `null` (also used for "no value at all")
    Null,
    /// Empty or whitespace-only string
    EmptyString,
    /// `{}`
    EmptyObject,
    /// `[]`
    EmptyArray,
    /// Anything worth storing
    NonEmpty,
}

impl PayloadShape {
    /// Whether a payload of this shape is a tombstone
    pub fn is_empty(self) -> bool {
        !matches!(self, PayloadShape::NonEmpty)
    }
}

/// A metadata payload: structured JSON or an already-serialized JSON string
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured data, stored pretty-printed
    Json(Value),
    /// Pre-serialized JSON, stored verbatim
    Raw(String),
}

impl Payload {
    /// The "undefined" payload; saving it deletes the record
    pub fn none() -> Self {
        Payload::Json(Value::Null)
    }

    /// Build a payload from any serializable value
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Payload::Json)
    }

    /// Classify this payload
    pub fn shape(&self) -> PayloadShape {
        match self {
            Payload::Json(value) => shape_of(value),
            Payload::Raw(text) if text.trim().is_empty() => PayloadShape::EmptyString,
            Payload::Raw(_) => PayloadShape::NonEmpty,
        }
    }

    /// Whether saving this payload should delete the record instead
    pub fn is_empty(&self) -> bool {
        self.shape().is_empty()
    }

    /// Text written to storage: pretty JSON, or the raw string untouched
    pub fn to_storage_string(&self) -> serde_json::Result<String> {
        match self {
            Payload::Json(value) => serde_json::to_string_pretty(value),
            Payload::Raw(text) => Ok(text.clone()),
        }
    }
}

fn shape_of(value: &Value) -> PayloadShape {
    match value {
        Value::Null => PayloadShape::Null,
        Value::String(s) if s.trim().is_empty() => PayloadShape::EmptyString,
        Value::Object(map) if map.is_empty() => PayloadShape::EmptyObject,
        Value::Array(items) if items.is_empty() => PayloadShape::EmptyArray,
        _ => PayloadShape::NonEmpty,
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Raw(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Raw(text.to_string())
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_else(Payload::none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_shapes() {
        let cases: Vec<(Payload, PayloadShape)> = vec![
            (Payload::none(), PayloadShape::Null),
            (Payload::from(None::<Value>), PayloadShape::Null),
            (Payload::Raw(String::new()), PayloadShape::EmptyString),
            (Payload::Raw("   \n".into()), PayloadShape::EmptyString),
            (json!("  ").into(), PayloadShape::EmptyString),
            (json!({}).into(), PayloadShape::EmptyObject),
            (json!([]).into(), PayloadShape::EmptyArray),
        ];

        for (payload, expected) in cases {
            assert_eq!(payload.shape(), expected, "{payload:?}");
            assert!(payload.is_empty(), "{payload:?} should be a tombstone");
        }
    }

    #[test]
    fn test_non_empty_shapes() {
        for payload in [
            Payload::from(json!({"name": "b1"})),
            Payload::from(json!([1])),
            Payload::from(json!(0)),
            Payload::from(json!(false)),
            Payload::from(json!("x")),
            Payload::from("{\"a\":1}"),
        ] {
            assert_eq!(payload.shape(), PayloadShape::NonEmpty, "{payload:?}");
        }
    }

    #[test]
    fn test_storage_string() {
        let pretty = Payload::from(json!({"a": 1})).to_storage_string().unwrap();
        assert_eq!(pretty, "{\n  \"a\": 1\n}");

        let raw = Payload::from("{\"a\":1}").to_storage_string().unwrap();
        assert_eq!(raw, "{\"a\":1}");
    }

    #[test]
    fn test_from_serialize() {
        #[derive(Serialize)]
        struct Bucket {
            name: &'static str,
        }
        let payload = Payload::from_serialize(&Bucket { name: "b1" }).unwrap();
        assert_eq!(payload, Payload::Json(json!({"name": "b1"})));
    }
}
