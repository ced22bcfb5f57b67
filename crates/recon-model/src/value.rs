use std::fmt;

use chrono::NaiveDateTime;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Timestamp wire format used when a [`Value::Time`] round-trips through
/// JSON. The fraction is optional on the way back in.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Map key tagging a timestamp in the JSON representation, so that parsed
/// dates survive a store round trip as dates rather than strings.
const TIME_TAG: &str = "$dt";

/// A single document attribute.
///
/// Documents are heterogeneous: the same column can carry a number in one
/// row and a string in the next. `Array` only occurs in filter predicates
/// (`in` / `nin` value lists), never in ingested rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Time(NaiveDateTime),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric coercion used by the evaluator: integers, floats, and
    /// numeric strings all count; everything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as a composite-key component. `None` for nulls,
    /// values that stringify to nothing after trimming, and arrays.
    pub fn to_key_string(&self) -> Option<String> {
        let text = match self {
            Value::Null | Value::Array(_) => return None,
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s.trim().to_string(),
            Value::Time(t) => t.format(TIME_FORMAT).to_string(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// A float carrying an integral result collapses back to `Int`, so that
    /// computed columns keep the integer/decimal shape of their inputs.
    pub fn from_numeric(n: f64) -> Value {
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Value::Int(n as i64)
        } else {
            Value::Float(n)
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Time(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Time(t) => write!(f, "{}", t.format(TIME_FORMAT)),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::String(s) => serializer.serialize_str(s),
            Value::Time(t) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(TIME_TAG, &t.format(TIME_FORMAT).to_string())?;
                map.end()
            }
            Value::Array(items) => items.serialize(serializer),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a document value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        if v <= i64::MAX as u64 {
            Ok(Value::Int(v as i64))
        } else {
            Ok(Value::Float(v as f64))
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let key: Option<String> = map.next_key()?;
        match key.as_deref() {
            Some(TIME_TAG) => {
                let text: String = map.next_value()?;
                let parsed = NaiveDateTime::parse_from_str(&text, TIME_FORMAT)
                    .map_err(|e| de::Error::custom(format!("invalid {TIME_TAG} value: {e}")))?;
                if map.next_key::<String>()?.is_some() {
                    return Err(de::Error::custom("unexpected key after timestamp tag"));
                }
                Ok(Value::Time(parsed))
            }
            Some(other) => Err(de::Error::custom(format!(
                "unexpected nested object key `{other}` in document value"
            ))),
            None => Err(de::Error::custom("unexpected empty object in document value")),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
