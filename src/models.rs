use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CiviError, CiviResult};

// ===== Field Values =====

/// A single attribute value as exchanged with the CiviCRM API.
///
/// The API is loosely typed: numbers usually travel as strings and booleans as
/// `"0"`/`"1"`. Comparisons between local and remote state therefore go through
/// [`Value::same_as`] rather than `==`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

/// Attribute map of one record. Ordered so requests and log lines are stable.
pub type Fields = BTreeMap<String, Value>;

impl Value {
    /// Field-level equality used by every diff.
    ///
    /// Identical variants compare directly. A string equals a number or boolean
    /// when its trimmed text parses to the same scalar, so `"42"` matches `42`
    /// and `"1"` matches `true`.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::String(text), scalar) | (scalar, Value::String(text)) => {
                match Value::parse_scalar(text) {
                    Some(parsed) => parsed.same_as(scalar),
                    None => false,
                }
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Bool(flag), Value::Int(n)) | (Value::Int(n), Value::Bool(flag)) => {
                i64::from(*flag) == *n
            }
            (Value::Bool(flag), Value::Float(n)) | (Value::Float(n), Value::Bool(flag)) => {
                f64::from(u8::from(*flag)) == *n
            }
        }
    }

    /// Parse numeric text into an `Int` or finite `Float`.
    fn parse_scalar(text: &str) -> Option<Value> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(n) = trimmed.parse::<i64>() {
            return Some(Value::Int(n));
        }
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Value::Float)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            Value::Bool(flag) => Some(i64::from(*flag)),
            Value::String(text) => match Value::parse_scalar(text)? {
                Value::Int(n) => Some(n),
                Value::Float(n) if n.fract() == 0.0 => Some(n as i64),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Loose truthiness: empty strings, `"0"`, zero, false and null are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(flag) => *flag,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(text) => {
                let trimmed = text.trim();
                !trimmed.is_empty() && trimmed != "0"
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(flag) => write!(f, "{}", u8::from(*flag)),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::String(text) => f.write_str(text),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(flag),
            serde_json::Value::Number(number) => match number.as_i64() {
                Some(n) => Value::Int(n),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(text) => Value::String(text),
            // Chained API calls nest structures; keep them as their JSON text.
            nested => Value::String(nested.to_string()),
        }
    }
}

impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(text) => serde_json::Value::String(text.clone()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(flag) => serializer.serialize_bool(*flag),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::String(text) => serializer.serialize_str(text),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// Build a [`Fields`] map from `key => value` pairs.
#[macro_export]
macro_rules! fields {
    () => {
        $crate::models::Fields::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::models::Fields::new();
        $(
            map.insert(::std::string::String::from($key), $crate::models::Value::from($value));
        )+
        map
    }};
}

// ===== API Replies =====

/// Decoded reply of one API call.
///
/// `values` is always an ordered list, whether the server answered in
/// sequential mode or keyed the records by id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "RawReply")]
pub struct ApiReply {
    pub count: usize,
    pub values: Vec<Fields>,
    pub id: Option<Value>,
    pub is_error: bool,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    /// Any other top-level keys (`added`, `removed`, `undefined_fields`, ...).
    pub extra: Fields,
}

impl ApiReply {
    /// Successful reply carrying the given records.
    pub fn with_values(values: Vec<Fields>) -> Self {
        let id = match values.as_slice() {
            [single] => single.get("id").cloned(),
            _ => None,
        };
        Self {
            count: values.len(),
            values,
            id,
            ..Self::default()
        }
    }

    /// Successful reply without records.
    pub fn empty() -> Self {
        Self::default()
    }

    /// API-level failure as reported with `is_error: 1`.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn from_json(raw: serde_json::Value) -> CiviResult<Self> {
        Ok(serde_json::from_value(raw)?)
    }

    pub fn first(&self) -> Option<&Fields> {
        self.values.first()
    }

    /// Turn an `is_error` reply into [`CiviError::Api`].
    pub fn into_result(self) -> CiviResult<Self> {
        if self.is_error {
            return Err(CiviError::Api {
                message: self
                    .error_message
                    .unwrap_or_else(|| "unknown API error".to_string()),
                code: self.error_code,
            });
        }
        Ok(self)
    }

    /// Truthy top-level flag such as `added` or `removed`.
    pub fn flag(&self, key: &str) -> bool {
        self.extra.get(key).is_some_and(Value::is_truthy)
    }

    /// Ids listed under a top-level key, e.g. the `ids` of a duplicate
    /// error. Lists arrive as JSON text, see `From<serde_json::Value>`.
    pub fn id_list(&self, key: &str) -> Vec<i64> {
        match self.extra.get(key) {
            Some(Value::String(text)) => match serde_json::from_str::<Vec<Value>>(text) {
                Ok(items) => items.iter().filter_map(Value::as_i64).collect(),
                Err(_) => Value::from(text.as_str()).as_i64().into_iter().collect(),
            },
            Some(value) => value.as_i64().into_iter().collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawReply {
    #[serde(default)]
    count: Option<Value>,
    #[serde(default)]
    values: serde_json::Value,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    is_error: Option<Value>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_code: Option<Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl TryFrom<RawReply> for ApiReply {
    type Error = String;

    fn try_from(raw: RawReply) -> Result<Self, Self::Error> {
        let values = records_from_json(raw.values)?;
        let count = match raw.count {
            Some(value) => value
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| format!("invalid count '{value}'"))?,
            None => values.len(),
        };
        Ok(Self {
            count,
            values,
            id: raw.id.filter(|id| !id.is_null()),
            is_error: raw.is_error.as_ref().is_some_and(Value::is_truthy),
            error_message: raw.error_message,
            error_code: raw.error_code.map(|code| code.to_string()),
            extra: raw.extra,
        })
    }
}

fn record_from_map(map: serde_json::Map<String, serde_json::Value>) -> Fields {
    map.into_iter()
        .map(|(key, value)| (key, Value::from(value)))
        .collect()
}

fn records_from_json(values: serde_json::Value) -> Result<Vec<Fields>, String> {
    match values {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::Object(map) => Ok(record_from_map(map)),
                other => Err(format!("expected record object in values, got {other}")),
            })
            .collect(),
        serde_json::Value::Object(map) => {
            if map.values().all(serde_json::Value::is_object) && !map.is_empty() {
                // keyed by id: {"12": {...}, "13": {...}}
                Ok(map
                    .into_iter()
                    .filter_map(|(_, item)| match item {
                        serde_json::Value::Object(record) => Some(record_from_map(record)),
                        _ => None,
                    })
                    .collect())
            } else if map.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![record_from_map(map)])
            }
        }
        // getvalue-style replies carry a bare scalar
        scalar => Ok(vec![fields! { "value" => Value::from(scalar) }]),
    }
}
