use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Typed field value carried by an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Enum(i32),
}

impl Value {
    /// Numeric view. Strings are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Enum(v) => Some(f64::from(*v)),
            Value::Str(_) => None,
        }
    }

    /// Integral view for int and enum values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Enum(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// One-letter type tag used in canonical dimension keys.
    pub(crate) fn type_tag(&self) -> char {
        match self {
            Value::Int(_) => 'i',
            Value::Float(_) => 'f',
            Value::Str(_) => 's',
            Value::Enum(_) => 'e',
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Enum(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One observed occurrence: type id, timestamp and flattened field map.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub atom_id: i32,
    pub timestamp_nanos: i64,
    pub fields: HashMap<String, Value>,
}

impl Event {
    pub fn new(atom_id: i32, timestamp_nanos: i64) -> Self {
        Self {
            atom_id,
            timestamp_nanos,
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(path.into(), value.into());
        self
    }

    pub fn field(&self, path: &str) -> Option<&Value> {
        self.fields.get(path)
    }

    /// Decode one JSON object of the form
    /// `{"atom": 10, "ts": 1000, "fields": {"uid": 1000, "state": {"enum": 1}}}`.
    ///
    /// Nested objects flatten into dotted paths, arrays into `path.N`,
    /// booleans into `0`/`1`, and `null` fields are omitted.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, EventDecodeError> {
        let obj = value.as_object().ok_or(EventDecodeError::NotAnObject)?;
        let atom_id = obj
            .get("atom")
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok())
            .ok_or(EventDecodeError::MissingAtom)?;
        let timestamp_nanos = obj
            .get("ts")
            .and_then(|v| v.as_i64())
            .ok_or(EventDecodeError::MissingTimestamp)?;

        let mut event = Event::new(atom_id, timestamp_nanos);
        if let Some(fields) = obj.get("fields") {
            let fields = fields
                .as_object()
                .ok_or(EventDecodeError::FieldsNotAnObject)?;
            for (name, v) in fields {
                flatten_json(name.clone(), v, &mut event.fields)?;
            }
        }
        Ok(event)
    }

    /// Decode a single JSON line. See [`Event::from_json`].
    pub fn from_json_line(line: &str) -> Result<Self, EventDecodeError> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| EventDecodeError::Json(e.to_string()))?;
        Self::from_json(&value)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventDecodeError {
    #[error("event is not a JSON object")]
    NotAnObject,
    #[error("event has no integer \"atom\"")]
    MissingAtom,
    #[error("event has no integer \"ts\"")]
    MissingTimestamp,
    #[error("event \"fields\" is not an object")]
    FieldsNotAnObject,
    #[error("field {0:?} has an unsupported value")]
    UnsupportedField(String),
    #[error("invalid JSON: {0}")]
    Json(String),
}

fn flatten_json(
    path: String,
    value: &serde_json::Value,
    out: &mut HashMap<String, Value>,
) -> Result<(), EventDecodeError> {
    use serde_json::Value as J;
    match value {
        J::Null => {}
        J::Bool(b) => {
            out.insert(path, Value::Int(i64::from(*b)));
        }
        J::Number(n) => {
            let v = if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(EventDecodeError::UnsupportedField(path));
            };
            out.insert(path, v);
        }
        J::String(s) => {
            out.insert(path, Value::Str(s.clone()));
        }
        J::Object(map) => {
            if map.len() == 1
                && let Some(ordinal) = map.get("enum")
            {
                let ordinal = ordinal
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(|| EventDecodeError::UnsupportedField(path.clone()))?;
                out.insert(path, Value::Enum(ordinal));
                return Ok(());
            }
            for (k, v) in map {
                flatten_json(format!("{path}.{k}"), v, out)?;
            }
        }
        J::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_json(format!("{path}.{i}"), v, out)?;
            }
        }
    }
    Ok(())
}
