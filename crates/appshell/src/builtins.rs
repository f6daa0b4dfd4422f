//! Builtin functions available to every script without an import.
//!
//! The builtins are registered in [`Builtin`] declaration order; that order
//! fixes their symbol indices, so it must never change between fragments.

use std::rc::Rc;

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    exception::RuntimeError,
    format::format,
    resource::ResourceLimits,
    value::{NativeFunction, Value},
};

type BuiltinResult = Result<Value, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Builtin {
    Len,
    Copy,
    Append,
    Delete,
    Splice,
    String,
    Int,
    Bool,
    Float,
    Char,
    Bytes,
    Time,
    IsInt,
    IsFloat,
    IsString,
    IsBool,
    IsChar,
    IsBytes,
    IsArray,
    IsImmutableArray,
    IsMap,
    IsImmutableMap,
    IsIterable,
    IsTime,
    IsError,
    IsUndefined,
    IsFunction,
    IsCallable,
    TypeName,
    Format,
    Range,
}

impl Builtin {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Every builtin as a callable value, in registration order.
    #[must_use]
    pub fn values() -> Vec<Value> {
        Self::iter()
            .map(|builtin| {
                let native = NativeFunction::builtin(builtin.name(), move |limits, args| builtin.call(limits, args));
                Value::Native(Rc::new(native))
            })
            .collect()
    }

    pub fn call(self, limits: &ResourceLimits, args: &[Value]) -> BuiltinResult {
        match self {
            Self::Len => len(args),
            Self::Copy => {
                let [value] = args else {
                    return Err(RuntimeError::WrongNumArguments);
                };
                Ok(value.deep_copy())
            }
            Self::Append => append(args),
            Self::Delete => delete(args),
            Self::Splice => splice(args),
            Self::String => convert(args, |value| match value {
                Value::String(_) => Some(Ok(value.clone())),
                Value::Undefined => None,
                other => other.to_text().map(|text| Value::checked_string(text, limits)),
            }),
            Self::Int => convert(args, |value| match value {
                Value::Time(time) => Some(Ok(Value::Int(time.timestamp()))),
                other => other.to_int().map(|value| Ok(Value::Int(value))),
            }),
            Self::Bool => {
                let [value] = args else {
                    return Err(RuntimeError::WrongNumArguments);
                };
                Ok(Value::Bool(!value.is_falsy()))
            }
            Self::Float => convert(args, |value| value.to_float().map(|value| Ok(Value::Float(value)))),
            Self::Char => convert(args, |value| match value {
                Value::String(text) => {
                    let mut chars = text.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(Ok(Value::Char(c))),
                        _ => None,
                    }
                }
                other => other.to_char().map(|c| Ok(Value::Char(c))),
            }),
            Self::Bytes => convert(args, |value| match value {
                Value::Int(n) => usize::try_from(*n)
                    .ok()
                    .map(|n| Value::checked_bytes(vec![0; n.min(limits.max_bytes_len.saturating_add(1))], limits)),
                other => other.to_bytes().map(|bytes| Value::checked_bytes(bytes, limits)),
            }),
            Self::Time => convert(args, |value| value.to_time().map(|time| Ok(Value::Time(time)))),
            Self::IsInt => is(args, |value| matches!(value, Value::Int(_))),
            Self::IsFloat => is(args, |value| matches!(value, Value::Float(_))),
            Self::IsString => is(args, |value| matches!(value, Value::String(_))),
            Self::IsBool => is(args, |value| matches!(value, Value::Bool(_))),
            Self::IsChar => is(args, |value| matches!(value, Value::Char(_))),
            Self::IsBytes => is(args, |value| matches!(value, Value::Bytes(_))),
            Self::IsArray => is(args, |value| matches!(value, Value::Array(_))),
            Self::IsImmutableArray => is(args, |value| matches!(value, Value::ImmutableArray(_))),
            Self::IsMap => is(args, |value| matches!(value, Value::Map(_))),
            Self::IsImmutableMap => is(args, |value| matches!(value, Value::ImmutableMap(_))),
            Self::IsIterable => is(args, Value::is_iterable),
            Self::IsTime => is(args, |value| matches!(value, Value::Time(_))),
            Self::IsError => is(args, |value| matches!(value, Value::Error(_))),
            Self::IsUndefined => is(args, |value| matches!(value, Value::Undefined)),
            Self::IsFunction => is(args, |value| matches!(value, Value::Closure(_))),
            Self::IsCallable => is(args, Value::is_callable),
            Self::TypeName => {
                let [value] = args else {
                    return Err(RuntimeError::WrongNumArguments);
                };
                Ok(Value::from(value.type_name()))
            }
            Self::Format => builtin_format(args, limits),
            Self::Range => range(args, limits),
        }
    }
}

/// Shared shape of the conversion builtins: `f(value)` or
/// `f(value, default)`, yielding the default (or undefined) when the value
/// cannot be converted.
fn convert(args: &[Value], f: impl FnOnce(&Value) -> Option<BuiltinResult>) -> BuiltinResult {
    let (value, default) = match args {
        [value] => (value, Value::Undefined),
        [value, default] => (value, default.clone()),
        _ => return Err(RuntimeError::WrongNumArguments),
    };
    f(value).unwrap_or(Ok(default))
}

fn is(args: &[Value], predicate: impl FnOnce(&Value) -> bool) -> BuiltinResult {
    let [value] = args else {
        return Err(RuntimeError::WrongNumArguments);
    };
    Ok(Value::Bool(predicate(value)))
}

fn len(args: &[Value]) -> BuiltinResult {
    let [value] = args else {
        return Err(RuntimeError::WrongNumArguments);
    };
    let n = match value {
        Value::Array(_) | Value::ImmutableArray(_) => value.with_items(<[Value]>::len),
        Value::Map(_) | Value::ImmutableMap(_) => value.with_entries(|entries| entries.len()),
        Value::String(text) => text.len(),
        Value::Bytes(bytes) => bytes.len(),
        other => {
            return Err(RuntimeError::invalid_argument(
                "first",
                "array/string/bytes/map",
                other.type_name(),
            ));
        }
    };
    Ok(int_from_usize(n))
}

fn append(args: &[Value]) -> BuiltinResult {
    let Some((first, rest)) = args.split_first() else {
        return Err(RuntimeError::WrongNumArguments);
    };
    match first {
        Value::Array(_) | Value::ImmutableArray(_) => {
            let mut items = first.with_items(<[Value]>::to_vec);
            items.extend_from_slice(rest);
            Ok(Value::array(items))
        }
        other => Err(RuntimeError::invalid_argument("first", "array", other.type_name())),
    }
}

fn delete(args: &[Value]) -> BuiltinResult {
    let [target, key] = args else {
        return Err(RuntimeError::WrongNumArguments);
    };
    let Value::Map(entries) = target else {
        return Err(RuntimeError::invalid_argument("first", "map", target.type_name()));
    };
    let Value::String(key) = key else {
        return Err(RuntimeError::invalid_argument("second", "string", key.type_name()));
    };
    entries.borrow_mut().shift_remove(key.as_ref());
    Ok(Value::Undefined)
}

/// `splice(array, start, count, items...)` removes `count` items at `start`,
/// inserts `items` in their place and returns the removed items.
fn splice(args: &[Value]) -> BuiltinResult {
    let Some((target, rest)) = args.split_first() else {
        return Err(RuntimeError::WrongNumArguments);
    };
    let Value::Array(items) = target else {
        return Err(RuntimeError::invalid_argument("first", "array", target.type_name()));
    };
    let len = items.borrow().len();

    let start = match rest.first() {
        None => 0,
        Some(Value::Int(start)) => usize::try_from(*start)
            .ok()
            .filter(|start| *start <= len)
            .ok_or(RuntimeError::IndexOutOfBounds)?,
        Some(other) => return Err(RuntimeError::invalid_argument("second", "int", other.type_name())),
    };
    let count = match rest.get(1) {
        None => len - start,
        Some(Value::Int(count)) => {
            let count = usize::try_from(*count).map_err(|_| RuntimeError::IndexOutOfBounds)?;
            count.min(len - start)
        }
        Some(other) => return Err(RuntimeError::invalid_argument("third", "int", other.type_name())),
    };
    let inserted = rest.get(2..).unwrap_or_default().iter().cloned();
    let removed: Vec<Value> = items.borrow_mut().splice(start..start + count, inserted).collect();
    Ok(Value::array(removed))
}

fn builtin_format(args: &[Value], limits: &ResourceLimits) -> BuiltinResult {
    let Some((template, rest)) = args.split_first() else {
        return Err(RuntimeError::WrongNumArguments);
    };
    let Value::String(template) = template else {
        return Err(RuntimeError::invalid_argument("format", "string", template.type_name()));
    };
    if rest.is_empty() {
        return Ok(Value::String(Rc::clone(template)));
    }
    Ok(Value::String(format(template, rest, limits)?.into()))
}

/// `range(start, stop[, step])`: ints from `start` towards `stop`, excluding
/// `stop`, counting down when `start > stop`.
fn range(args: &[Value], limits: &ResourceLimits) -> BuiltinResult {
    let (start, stop, step) = match args {
        [start, stop] => (start, stop, None),
        [start, stop, step] => (start, stop, Some(step)),
        _ => return Err(RuntimeError::WrongNumArguments),
    };
    let int_arg = |name: &str, value: &Value| match value {
        Value::Int(n) => Ok(*n),
        other => Err(RuntimeError::invalid_argument(name, "int", other.type_name())),
    };
    let start = int_arg("start", start)?;
    let stop = int_arg("stop", stop)?;
    let step = match step {
        Some(step) => int_arg("step", step)?,
        None => 1,
    };
    if step <= 0 {
        return Err(RuntimeError::InvalidRangeStep);
    }
    let count = start.abs_diff(stop).div_ceil(step.unsigned_abs());
    if usize::try_from(count).ok().is_none_or(|count| count > limits.max_array_len) {
        return Err(RuntimeError::ArrayLimit);
    }

    let mut items = Vec::with_capacity(usize::try_from(count).unwrap_or_default());
    let mut current = start;
    if start <= stop {
        while current < stop {
            items.push(Value::Int(current));
            current = current.saturating_add(step);
        }
    } else {
        while current > stop {
            items.push(Value::Int(current));
            current = current.saturating_sub(step);
        }
    }
    Ok(Value::array(items))
}

fn int_from_usize(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(builtin: Builtin, args: &[Value]) -> BuiltinResult {
        builtin.call(&ResourceLimits::default(), args)
    }

    #[test]
    fn registration_order_is_stable() {
        let names: Vec<&str> = Builtin::iter().map(Builtin::name).take(4).collect();
        assert_eq!(names, ["len", "copy", "append", "delete"]);
        assert_eq!(Builtin::IsImmutableArray.name(), "is_immutable_array");
    }

    #[test]
    fn conversions_fall_back_to_default() {
        assert_eq!(call(Builtin::Int, &[Value::from("12")]).unwrap(), Value::Int(12));
        assert_eq!(
            call(Builtin::Int, &[Value::from("x"), Value::Int(-1)]).unwrap(),
            Value::Int(-1)
        );
        assert!(matches!(call(Builtin::Float, &[Value::from("x")]).unwrap(), Value::Undefined));
    }

    #[test]
    fn splice_returns_removed_items() {
        let array = Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let removed = call(Builtin::Splice, &[array.clone(), Value::Int(1), Value::Int(1), Value::Int(9)]).unwrap();
        assert_eq!(removed.to_string(), "[2]");
        assert_eq!(array.to_string(), "[1, 9, 3]");
    }

    #[test]
    fn range_counts_down() {
        let result = call(Builtin::Range, &[Value::Int(3), Value::Int(0)]).unwrap();
        assert_eq!(result.to_string(), "[3, 2, 1]");
        assert_eq!(
            call(Builtin::Range, &[Value::Int(0), Value::Int(3), Value::Int(0)]),
            Err(RuntimeError::InvalidRangeStep)
        );
    }

    #[test]
    fn range_length_is_bounded() {
        let limits = ResourceLimits::default().max_array_len(3);
        let result = Builtin::Range.call(&limits, &[Value::Int(0), Value::Int(6), Value::Int(2)]).unwrap();
        assert_eq!(result.to_string(), "[0, 2, 4]");
        assert_eq!(
            Builtin::Range.call(&limits, &[Value::Int(0), Value::Int(4)]),
            Err(RuntimeError::ArrayLimit)
        );
        assert_eq!(
            call(Builtin::Range, &[Value::Int(0), Value::Int(i64::MAX), Value::Int(1)]),
            Err(RuntimeError::ArrayLimit)
        );
    }
}
