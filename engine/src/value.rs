//! Typed field values.
//!
//! A [`Value`] is one of a closed set of primitive or list payloads. On the
//! wire it is encoded as `{"type": <type>, <type>: <payload>}`, where the
//! payload of `null`, `nan`, `inf` and `ninf` is the literal `true`.

use crate::{conflict::FieldConflictType, error::Result, Error, FieldOperation};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    String,
    Integer,
    Double,
    Boolean,
    Datetime,
    Binary,
    Null,
    Nan,
    Inf,
    Ninf,
    List,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Double => "double",
            ValueType::Boolean => "boolean",
            ValueType::Datetime => "datetime",
            ValueType::Binary => "binary",
            ValueType::Null => "null",
            ValueType::Nan => "nan",
            ValueType::Inf => "inf",
            ValueType::Ninf => "ninf",
            ValueType::List => "list",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "string" => ValueType::String,
            "integer" => ValueType::Integer,
            "double" => ValueType::Double,
            "boolean" => ValueType::Boolean,
            "datetime" => ValueType::Datetime,
            "binary" => ValueType::Binary,
            "null" => ValueType::Null,
            "nan" => ValueType::Nan,
            "inf" => ValueType::Inf,
            "ninf" => ValueType::Ninf,
            "list" => ValueType::List,
            other => return Err(Error::InvalidValue(format!("unknown value type: {}", other))),
        })
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Datetime(DateTime<Utc>),
    Binary(Vec<u8>),
    Null,
    Nan,
    Inf,
    Ninf,
    List(Vec<Value>),
}

impl Value {
    /// The type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Datetime(_) => ValueType::Datetime,
            Value::Binary(_) => ValueType::Binary,
            Value::Null => ValueType::Null,
            Value::Nan => ValueType::Nan,
            Value::Inf => ValueType::Inf,
            Value::Ninf => ValueType::Ninf,
            Value::List(_) => ValueType::List,
        }
    }

    /// Binary payload.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Binary(bytes.into())
    }

    /// Floating point payload; non-finite inputs map to `nan`/`inf`/`ninf`.
    pub fn from_f64(n: f64) -> Self {
        if n.is_nan() {
            Value::Nan
        } else if n == f64::INFINITY {
            Value::Inf
        } else if n == f64::NEG_INFINITY {
            Value::Ninf
        } else {
            Value::Double(n)
        }
    }

    /// Build a value from raw JSON, detecting the type from its shape.
    ///
    /// Objects have no value representation and are rejected.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self> {
        Ok(match raw {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::from_f64(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            serde_json::Value::Object(_) => {
                return Err(Error::InvalidValue(
                    "objects cannot be stored as field values".into(),
                ))
            }
        })
    }

    /// Build a value from an explicit type and its raw payload.
    pub fn from_typed(value_type: ValueType, raw: &serde_json::Value) -> Result<Self> {
        let mismatch = || {
            Error::InvalidValue(format!(
                "payload {} does not match type {}",
                raw, value_type
            ))
        };

        Ok(match value_type {
            ValueType::String => Value::String(raw.as_str().ok_or_else(mismatch)?.to_string()),
            ValueType::Integer => match raw {
                serde_json::Value::Number(n) => Value::Integer(n.as_i64().ok_or_else(mismatch)?),
                serde_json::Value::String(s) => Value::Integer(s.parse().map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            ValueType::Double => Value::from_f64(raw.as_f64().ok_or_else(mismatch)?),
            ValueType::Boolean => Value::Boolean(raw.as_bool().ok_or_else(mismatch)?),
            ValueType::Datetime => {
                let text = raw.as_str().ok_or_else(mismatch)?;
                let parsed = DateTime::parse_from_rfc3339(text)
                    .map_err(|e| Error::InvalidValue(format!("invalid datetime '{}': {}", text, e)))?;
                Value::Datetime(parsed.with_timezone(&Utc))
            }
            ValueType::Binary => {
                let text = raw.as_str().ok_or_else(mismatch)?;
                Value::Binary(
                    BASE64
                        .decode(text)
                        .map_err(|e| Error::InvalidValue(format!("invalid base64: {}", e)))?,
                )
            }
            ValueType::Null => Value::Null,
            ValueType::Nan => Value::Nan,
            ValueType::Inf => Value::Inf,
            ValueType::Ninf => Value::Ninf,
            ValueType::List => Value::List(
                raw.as_array()
                    .ok_or_else(mismatch)?
                    .iter()
                    .map(Value::from_wire)
                    .collect::<Result<Vec<_>>>()?,
            ),
        })
    }

    /// Decode the `{type, <type>: payload}` wire form.
    pub fn from_wire(raw: &serde_json::Value) -> Result<Self> {
        let type_name = raw
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::InvalidValue(format!("value without type tag: {}", raw)))?;
        let value_type: ValueType = type_name.parse()?;
        match raw.get(type_name) {
            Some(payload) => Value::from_typed(value_type, payload),
            None => Value::from_typed(value_type, &serde_json::Value::Bool(true)),
        }
    }

    /// Encode into the `{type, <type>: payload}` wire form.
    pub fn to_wire(&self) -> serde_json::Value {
        let payload = match self {
            Value::String(s) => json!(s),
            Value::Integer(i) => json!(i),
            Value::Double(d) if !d.is_finite() => return Value::from_f64(*d).to_wire(),
            Value::Double(d) => json!(d),
            Value::Boolean(b) => json!(b),
            Value::Datetime(dt) => json!(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Binary(bytes) => json!(BASE64.encode(bytes)),
            Value::Null | Value::Nan | Value::Inf | Value::Ninf => json!(true),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_wire).collect())
            }
        };
        let type_name = self.value_type().as_str();
        let mut wire = serde_json::Map::with_capacity(2);
        wire.insert("type".to_string(), json!(type_name));
        wire.insert(type_name.to_string(), payload);
        serde_json::Value::Object(wire)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            Value::Nan => Some(f64::NAN),
            Value::Inf => Some(f64::INFINITY),
            Value::Ninf => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Check a list operation against this value without mutating it.
    pub fn dry_run_list_operation(&self, op: &FieldOperation) -> Option<FieldConflictType> {
        let Value::List(items) = self else {
            return Some(FieldConflictType::ModifyNotAListField);
        };
        let len = items.len();

        let in_bounds = match op {
            FieldOperation::ListItemSet { index, .. }
            | FieldOperation::ListItemDelete { index, .. } => *index < len,
            FieldOperation::ListItemInsert { index, .. } => *index <= len,
            FieldOperation::ListItemMove {
                index, new_index, ..
            } => *index < len && *new_index < len,
            FieldOperation::Set { .. } | FieldOperation::Delete { .. } => {
                return Some(FieldConflictType::UnknownOperationType)
            }
        };

        (!in_bounds).then_some(FieldConflictType::InvalidListIndex)
    }

    /// Apply a list operation in place.
    pub fn apply_list_operation(&mut self, op: &FieldOperation) -> Result<()> {
        if let Some(conflict) = self.dry_run_list_operation(op) {
            return Err(Error::InvalidFieldOperation {
                field_id: op.field_id().clone(),
                conflict,
            });
        }

        if let Value::List(items) = self {
            match op {
                FieldOperation::ListItemSet { index, value, .. } => items[*index] = value.clone(),
                FieldOperation::ListItemInsert { index, value, .. } => {
                    items.insert(*index, value.clone())
                }
                FieldOperation::ListItemDelete { index, .. } => {
                    items.remove(*index);
                }
                FieldOperation::ListItemMove {
                    index, new_index, ..
                } => {
                    let item = items.remove(*index);
                    items.insert(*new_index, item);
                }
                FieldOperation::Set { .. } | FieldOperation::Delete { .. } => {}
            }
        }

        Ok(())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Value::from_wire(&raw).map_err(de::Error::custom)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::from_f64(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Datetime(dt)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
