//! Conversion between script values and generic JSON values.
//!
//! This is the bridge used by the snapshot engine, the `json` module and the
//! JSON-RPC client. Byte strings become base64 strings, times become RFC 3339
//! strings and a container that is already being converted (a cycle) becomes
//! `null`. Functions and iterators have no JSON form.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::SecondsFormat;
use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::{
    exception::RuntimeError,
    resource::{MAX_NESTING, ResourceLimits},
    value::{Value, ValueMap},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConvertError {
    /// The value has no JSON representation.
    Unsupported { type_name: String },
    /// NaN and infinities cannot be written as JSON numbers.
    NonFinite(f64),
    StringLimit,
    /// Containers nest deeper than [`MAX_NESTING`].
    TooDeep,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported { type_name } => write!(f, "unsupported type: {type_name}"),
            Self::NonFinite(value) => write!(f, "unsupported value: {value}"),
            Self::StringLimit => write!(f, "exceeding string size limit"),
            Self::TooDeep => write!(f, "value nested deeper than {MAX_NESTING} levels"),
        }
    }
}

impl std::error::Error for ConvertError {}

impl From<ConvertError> for RuntimeError {
    fn from(error: ConvertError) -> Self {
        match error {
            ConvertError::StringLimit => Self::StringLimit,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// Converts a script value to JSON.
pub fn to_json(value: &Value) -> Result<Json, ConvertError> {
    to_json_inner(value, &mut Vec::new())
}

fn to_json_inner(value: &Value, stack: &mut Vec<usize>) -> Result<Json, ConvertError> {
    let json = match value {
        Value::Undefined => Json::Null,
        Value::Int(n) => Json::from(*n),
        Value::Float(n) => Number::from_f64(*n).map(Json::Number).ok_or(ConvertError::NonFinite(*n))?,
        Value::Bool(b) => Json::Bool(*b),
        Value::Char(c) => Json::from(u32::from(*c)),
        Value::String(text) => Json::String(text.to_string()),
        Value::Bytes(bytes) => Json::String(STANDARD.encode(bytes)),
        Value::Time(time) => Json::String(time.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Error(inner) => Json::String(inner.to_text().unwrap_or_default()),
        Value::Array(_) | Value::ImmutableArray(_) | Value::Map(_) | Value::ImmutableMap(_) => {
            let id = value.identity().unwrap_or_default();
            if stack.contains(&id) {
                return Ok(Json::Null);
            }
            if stack.len() >= MAX_NESTING {
                return Err(ConvertError::TooDeep);
            }
            stack.push(id);
            let result = container_to_json(value, stack);
            stack.pop();
            result?
        }
        Value::Cell(cell) => to_json_inner(&cell.borrow(), stack)?,
        Value::Closure(_) | Value::Native(_) | Value::Iterator(_) => {
            return Err(ConvertError::Unsupported {
                type_name: value.type_name(),
            });
        }
    };
    Ok(json)
}

fn container_to_json(value: &Value, stack: &mut Vec<usize>) -> Result<Json, ConvertError> {
    match value {
        Value::Array(_) | Value::ImmutableArray(_) => value.with_items(|items| {
            items
                .iter()
                .map(|item| to_json_inner(item, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array)
        }),
        _ => value.with_entries(|entries| {
            let mut object = JsonMap::with_capacity(entries.len());
            for (key, item) in entries {
                object.insert(key.clone(), to_json_inner(item, stack)?);
            }
            Ok(Json::Object(object))
        }),
    }
}

/// Converts generic JSON to a script value. Integral numbers become ints,
/// other numbers floats, objects mutable maps and arrays mutable arrays.
pub fn from_json(json: &Json, limits: &ResourceLimits) -> Result<Value, ConvertError> {
    let value = match json {
        Json::Null => Value::Undefined,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(n) => Value::Int(n),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(text) => {
            if text.len() > limits.max_string_len {
                return Err(ConvertError::StringLimit);
            }
            Value::from(text.as_str())
        }
        Json::Array(items) => Value::array(
            items
                .iter()
                .map(|item| from_json(item, limits))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(object) => {
            let mut entries = ValueMap::with_capacity(object.len());
            for (key, item) in object {
                entries.insert(key.clone(), from_json(item, limits)?);
            }
            Value::map(entries)
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cycles_become_null() {
        let array = Value::array(vec![Value::Int(1)]);
        if let Value::Array(items) = &array {
            items.borrow_mut().push(array.clone());
        }
        assert_eq!(to_json(&array).unwrap(), json!([1, null]));
    }

    #[test]
    fn nesting_is_bounded() {
        let mut value = Value::Int(0);
        for _ in 0..MAX_NESTING {
            value = Value::array(vec![value]);
        }
        assert!(to_json(&value).is_ok());
        let deeper = Value::array(vec![value]);
        assert_eq!(to_json(&deeper), Err(ConvertError::TooDeep));
    }

    #[test]
    fn bytes_and_floats() {
        assert_eq!(to_json(&Value::bytes(b"hi".to_vec())).unwrap(), json!("aGk="));
        assert!(matches!(to_json(&Value::Float(f64::NAN)), Err(ConvertError::NonFinite(_))));
        assert!(matches!(to_json(&Value::Float(f64::INFINITY)), Err(ConvertError::NonFinite(_))));
    }

    #[test]
    fn integers_stay_integers() {
        let value = from_json(&json!({"a": 1, "b": 1.5, "c": [true, null]}), &ResourceLimits::default()).unwrap();
        assert_eq!(value.to_string(), "{a: 1, b: 1.5, c: [true, <undefined>]}");
    }
}
