//! The runtime value model shared by the VM, the builtins and the host
//! modules.
//!
//! Scalars are stored inline; strings and byte strings are immutable and
//! reference counted; arrays and maps are reference-shared, with interior
//! mutability for the mutable variants. Maps keep insertion order.

use std::{cell::RefCell, cmp::Ordering, fmt, mem, ops::Deref, rc::Rc};

use chrono::{DateTime, Local, TimeDelta};
use indexmap::IndexMap;

use crate::{
    bytecode::Closure,
    exception::RuntimeError,
    expressions::{Operator, UnaryOp},
    format::quote,
    resource::{MAX_NESTING, ResourceLimits},
};

/// Map payload of `Value::Map` and `Value::ImmutableMap`.
pub type ValueMap = IndexMap<String, Value>;

/// Signature of host functions callable from script.
pub type NativeFn = dyn Fn(&ResourceLimits, &[Value]) -> Result<Value, RuntimeError>;

/// Distinguishes language builtins (`len`, `append`, ...) from functions
/// provided by modules and the host; only the type name differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeKind {
    Builtin,
    User,
}

/// A host function exposed to script code.
pub struct NativeFunction {
    name: String,
    kind: NativeKind,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&ResourceLimits, &[Value]) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            kind: NativeKind::User,
            func: Box::new(func),
        }
    }

    pub(crate) fn builtin(
        name: impl Into<String>,
        func: impl Fn(&ResourceLimits, &[Value]) -> Result<Value, RuntimeError> + 'static,
    ) -> Self {
        Self {
            kind: NativeKind::Builtin,
            ..Self::new(name, func)
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> NativeKind {
        self.kind
    }

    pub fn call(&self, limits: &ResourceLimits, args: &[Value]) -> Result<Value, RuntimeError> {
        (self.func)(limits, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Materialized iteration state for `for k, v in x` loops.
#[derive(Debug)]
pub struct ValueIter {
    entries: Vec<(Value, Value)>,
    /// Number of entries consumed; the current entry is `entries[pos - 1]`.
    pos: usize,
}

impl ValueIter {
    /// Advances to the next entry; returns false when exhausted.
    pub fn advance(&mut self) -> bool {
        if self.pos < self.entries.len() {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn key(&self) -> Value {
        self.current().map(|(key, _)| key.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn value(&self) -> Value {
        self.current().map(|(_, value)| value.clone()).unwrap_or_default()
    }

    fn current(&self) -> Option<&(Value, Value)> {
        self.pos.checked_sub(1).and_then(|index| self.entries.get(index))
    }
}

/// A script value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    Array(Rc<Shared<Vec<Value>>>),
    ImmutableArray(Rc<[Value]>),
    Map(Rc<Shared<ValueMap>>),
    ImmutableMap(Rc<ValueMap>),
    Error(Rc<Value>),
    Time(DateTime<Local>),
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
    /// A local variable captured by a closure. Only ever stored in VM stack
    /// slots and closure free lists; reads go through it transparently.
    Cell(Rc<RefCell<Value>>),
    /// Iteration state of a running `for ... in` loop.
    Iterator(Rc<RefCell<ValueIter>>),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<char> for Value {
    fn from(value: char) -> Self {
        Self::Char(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::array(value)
    }
}

impl From<ValueMap> for Value {
    fn from(value: ValueMap) -> Self {
        Self::map(value)
    }
}

impl From<NativeFunction> for Value {
    fn from(value: NativeFunction) -> Self {
        Self::Native(Rc::new(value))
    }
}

/// Payload of the mutable containers, borrowed through [`RefCell`].
///
/// Dropping the last reference to a container releases everything nested in
/// it from a work list, so freeing a deeply nested value does not recurse.
#[derive(Debug)]
pub struct Shared<T: Release>(RefCell<T>);

impl<T: Release> Deref for Shared<T> {
    type Target = RefCell<T>;

    fn deref(&self) -> &RefCell<T> {
        &self.0
    }
}

impl<T: Release> Drop for Shared<T> {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.0.get_mut().release(&mut pending);
        while let Some(mut value) = pending.pop() {
            value.release(&mut pending);
        }
    }
}

/// Container contents that can be moved out for dropping.
pub trait Release {
    fn release(&mut self, pending: &mut Vec<Value>);
}

impl Release for Vec<Value> {
    fn release(&mut self, pending: &mut Vec<Value>) {
        pending.append(self);
    }
}

impl Release for ValueMap {
    fn release(&mut self, pending: &mut Vec<Value>) {
        pending.extend(self.drain(..).map(|(_, value)| value));
    }
}

impl Release for Value {
    /// Moves out whatever this value solely owns; shared payloads only lose
    /// a reference.
    fn release(&mut self, pending: &mut Vec<Value>) {
        match self {
            Self::Array(rc) => {
                if let Some(shared) = Rc::get_mut(rc) {
                    shared.0.get_mut().release(pending);
                }
            }
            Self::Map(rc) => {
                if let Some(shared) = Rc::get_mut(rc) {
                    shared.0.get_mut().release(pending);
                }
            }
            Self::ImmutableArray(rc) => {
                if let Some(items) = Rc::get_mut(rc) {
                    pending.extend(items.iter_mut().map(mem::take));
                }
            }
            Self::ImmutableMap(rc) => {
                if let Some(entries) = Rc::get_mut(rc) {
                    entries.release(pending);
                }
            }
            Self::Error(rc) => {
                if let Some(inner) = Rc::get_mut(rc) {
                    pending.push(mem::take(inner));
                }
            }
            Self::Cell(rc) => {
                if let Some(cell) = Rc::get_mut(rc) {
                    pending.push(mem::take(cell.get_mut()));
                }
            }
            _ => {}
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Value {
    #[must_use]
    pub fn array(items: Vec<Self>) -> Self {
        Self::Array(Rc::new(Shared(RefCell::new(items))))
    }

    #[must_use]
    pub fn map(entries: ValueMap) -> Self {
        Self::Map(Rc::new(Shared(RefCell::new(entries))))
    }

    #[must_use]
    pub fn immutable_map(entries: ValueMap) -> Self {
        Self::ImmutableMap(Rc::new(entries))
    }

    #[must_use]
    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }

    #[must_use]
    pub fn error(value: Self) -> Self {
        Self::Error(Rc::new(value))
    }

    /// Builds a string value, enforcing the string size limit.
    pub fn checked_string(value: String, limits: &ResourceLimits) -> Result<Self, RuntimeError> {
        if value.len() > limits.max_string_len {
            return Err(RuntimeError::StringLimit);
        }
        Ok(Self::String(value.into()))
    }

    /// Builds a bytes value, enforcing the bytes size limit.
    pub fn checked_bytes(value: Vec<u8>, limits: &ResourceLimits) -> Result<Self, RuntimeError> {
        if value.len() > limits.max_bytes_len {
            return Err(RuntimeError::BytesLimit);
        }
        Ok(Self::bytes(value))
    }

    /// Reads through a captured-variable cell.
    #[must_use]
    pub fn deref_cell(&self) -> Self {
        match self {
            Self::Cell(cell) => cell.borrow().clone(),
            other => other.clone(),
        }
    }

    /// The script-visible type name.
    #[must_use]
    pub fn type_name(&self) -> String {
        let name = match self {
            Self::Undefined => "undefined",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::ImmutableArray(_) => "immutable-array",
            Self::Map(_) => "map",
            Self::ImmutableMap(_) => "immutable-map",
            Self::Error(_) => "error",
            Self::Time(_) => "time",
            Self::Closure(_) => "compiled-function",
            Self::Native(native) => {
                return match native.kind {
                    NativeKind::Builtin => format!("builtin-function:{}", native.name),
                    NativeKind::User => format!("user-function:{}", native.name),
                };
            }
            Self::Cell(cell) => return cell.borrow().type_name(),
            Self::Iterator(_) => "iterator",
        };
        name.to_owned()
    }

    #[must_use]
    pub fn is_falsy(&self) -> bool {
        match self {
            Self::Undefined | Self::Error(_) => true,
            Self::Int(value) => *value == 0,
            Self::Float(value) => value.is_nan(),
            Self::Bool(value) => !value,
            Self::Char(value) => *value == '\0',
            Self::String(value) => value.is_empty(),
            Self::Bytes(value) => value.is_empty(),
            Self::Array(items) => items.borrow().is_empty(),
            Self::ImmutableArray(items) => items.is_empty(),
            Self::Map(entries) => entries.borrow().is_empty(),
            Self::ImmutableMap(entries) => entries.is_empty(),
            Self::Time(_) | Self::Closure(_) | Self::Native(_) | Self::Iterator(_) => false,
            Self::Cell(cell) => cell.borrow().is_falsy(),
        }
    }

    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Closure(_) | Self::Native(_))
    }

    #[must_use]
    pub fn is_iterable(&self) -> bool {
        matches!(
            self,
            Self::Array(_) | Self::ImmutableArray(_) | Self::Map(_) | Self::ImmutableMap(_) | Self::String(_) | Self::Bytes(_)
        )
    }

    /// Pointer identity of reference-shared containers.
    #[must_use]
    pub fn identity(&self) -> Option<usize> {
        let ptr = match self {
            Self::Array(rc) => Rc::as_ptr(rc).cast::<()>(),
            Self::ImmutableArray(rc) => Rc::as_ptr(rc).cast::<()>(),
            Self::Map(rc) => Rc::as_ptr(rc).cast::<()>(),
            Self::ImmutableMap(rc) => Rc::as_ptr(rc).cast::<()>(),
            Self::Error(rc) => Rc::as_ptr(rc).cast::<()>(),
            Self::Closure(rc) => Rc::as_ptr(rc).cast::<()>(),
            Self::Native(rc) => Rc::as_ptr(rc).cast::<()>(),
            _ => return None,
        };
        Some(ptr as usize)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Text form used by printing and string conversion: strings are taken
    /// verbatim, everything else uses its display form. `None` for undefined.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Undefined => None,
            Self::String(value) => Some(value.to_string()),
            Self::Cell(cell) => cell.borrow().to_text(),
            other => Some(other.to_string()),
        }
    }

    #[must_use]
    pub fn to_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Float(value) => Some(*value as i64),
            Self::Char(value) => Some(i64::from(u32::from(*value))),
            Self::Bool(value) => Some(i64::from(*value)),
            Self::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            Self::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_char(&self) -> Option<char> {
        match self {
            Self::Char(value) => Some(*value),
            Self::Int(value) => u32::try_from(*value).ok().and_then(char::from_u32),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(value) => Some(value.to_vec()),
            Self::String(value) => Some(value.as_bytes().to_vec()),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_time(&self) -> Option<DateTime<Local>> {
        match self {
            Self::Time(value) => Some(*value),
            Self::Int(value) => DateTime::from_timestamp(*value, 0).map(|utc| utc.with_timezone(&Local)),
            _ => None,
        }
    }

    /// Structural equality: containers compare element-wise, functions by
    /// identity.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) => true,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a.equals(b),
            (Self::Array(_) | Self::ImmutableArray(_), Self::Array(_) | Self::ImmutableArray(_)) => {
                if self.identity() == other.identity() {
                    return true;
                }
                self.with_items(|a| other.with_items(|b| a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))))
            }
            (Self::Map(_) | Self::ImmutableMap(_), Self::Map(_) | Self::ImmutableMap(_)) => {
                if self.identity() == other.identity() {
                    return true;
                }
                self.with_entries(|a| {
                    other.with_entries(|b| {
                        a.len() == b.len() && a.iter().all(|(key, x)| b.get(key).is_some_and(|y| x.equals(y)))
                    })
                })
            }
            (Self::Closure(_) | Self::Native(_), _) => self.identity() == other.identity(),
            (Self::Cell(cell), other) | (other, Self::Cell(cell)) => cell.borrow().equals(other),
            _ => false,
        }
    }

    /// Runs `f` over the elements of an array or immutable array.
    ///
    /// Returns `f(&[])` for any other value.
    pub fn with_items<R>(&self, f: impl FnOnce(&[Self]) -> R) -> R {
        match self {
            Self::Array(items) => f(&items.borrow()),
            Self::ImmutableArray(items) => f(items),
            _ => f(&[]),
        }
    }

    /// Runs `f` over the entries of a map or immutable map.
    ///
    /// Returns `f` of an empty map for any other value.
    pub fn with_entries<R>(&self, f: impl FnOnce(&ValueMap) -> R) -> R {
        match self {
            Self::Map(entries) => f(&entries.borrow()),
            Self::ImmutableMap(entries) => f(entries),
            _ => f(&ValueMap::new()),
        }
    }

    /// Deep copy; immutable containers copy into their mutable counterparts.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        match self {
            Self::Array(_) | Self::ImmutableArray(_) => {
                Self::array(self.with_items(|items| items.iter().map(Self::deep_copy).collect()))
            }
            Self::Map(_) | Self::ImmutableMap(_) => Self::map(self.with_entries(|entries| {
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.deep_copy()))
                    .collect()
            })),
            Self::Error(inner) => Self::error(inner.deep_copy()),
            Self::Cell(cell) => cell.borrow().deep_copy(),
            other => other.clone(),
        }
    }

    pub fn unary_op(&self, op: UnaryOp) -> Result<Self, RuntimeError> {
        let result = match (op, self) {
            (UnaryOp::Not, value) => Self::Bool(value.is_falsy()),
            (UnaryOp::Neg, Self::Int(value)) => Self::Int(value.wrapping_neg()),
            (UnaryOp::Neg, Self::Float(value)) => Self::Float(-value),
            (UnaryOp::Plus, Self::Int(_) | Self::Float(_)) => self.clone(),
            (UnaryOp::BitNot, Self::Int(value)) => Self::Int(!value),
            _ => {
                return Err(RuntimeError::InvalidUnaryOperation {
                    op: op.to_string(),
                    operand: self.type_name(),
                });
            }
        };
        Ok(result)
    }

    /// Applies a binary operator. The short-circuit operators are compiled to
    /// jumps and never reach this function.
    pub fn binary_op(&self, op: Operator, rhs: &Self, limits: &ResourceLimits) -> Result<Self, RuntimeError> {
        match op {
            Operator::Equal => return Ok(Self::Bool(self.equals(rhs))),
            Operator::NotEqual => return Ok(Self::Bool(!self.equals(rhs))),
            _ => {}
        }
        let invalid = || RuntimeError::InvalidOperation {
            lhs: self.type_name(),
            op: op.to_string(),
            rhs: rhs.type_name(),
        };

        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => int_op(op, *a, *b).unwrap_or_else(|| Err(invalid())),
            (Self::Float(a), Self::Float(b)) => float_op(op, *a, *b).ok_or_else(invalid),
            (Self::Int(a), Self::Float(b)) => float_op(op, *a as f64, *b).ok_or_else(invalid),
            (Self::Float(a), Self::Int(b)) => float_op(op, *a, *b as f64).ok_or_else(invalid),
            (Self::Char(a), Self::Char(b)) => char_op(op, i64::from(u32::from(*a)), i64::from(u32::from(*b))).ok_or_else(invalid),
            (Self::Char(a), Self::Int(b)) => char_op(op, i64::from(u32::from(*a)), *b).ok_or_else(invalid),
            (Self::Int(a), Self::Char(b)) => char_op(op, *a, i64::from(u32::from(*b))).ok_or_else(invalid),
            (Self::String(a), Self::String(b)) => match op {
                Operator::Add => {
                    if a.len() + b.len() > limits.max_string_len {
                        return Err(RuntimeError::StringLimit);
                    }
                    Ok(Self::String(format!("{a}{b}").into()))
                }
                _ => compare(op, a.cmp(b)).ok_or_else(invalid),
            },
            (Self::String(a), other) if op == Operator::Add => {
                let rendered = other.to_string();
                if a.len() + rendered.len() > limits.max_string_len {
                    return Err(RuntimeError::StringLimit);
                }
                Ok(Self::String(format!("{a}{rendered}").into()))
            }
            (Self::Bytes(a), Self::Bytes(b)) if op == Operator::Add => {
                if a.len() + b.len() > limits.max_bytes_len {
                    return Err(RuntimeError::BytesLimit);
                }
                Ok(Self::bytes([a.as_ref(), b.as_ref()].concat()))
            }
            (Self::Array(_) | Self::ImmutableArray(_), Self::Array(_) | Self::ImmutableArray(_)) if op == Operator::Add => {
                let items = self.with_items(|a| rhs.with_items(|b| [a, b].concat()));
                Ok(Self::array(items))
            }
            (Self::Time(a), Self::Int(b)) => {
                let delta = TimeDelta::nanoseconds(*b);
                let shifted = match op {
                    Operator::Add => a.checked_add_signed(delta),
                    Operator::Sub => a.checked_sub_signed(delta),
                    _ => None,
                };
                shifted.map(Self::Time).ok_or_else(invalid)
            }
            (Self::Time(a), Self::Time(b)) => match op {
                Operator::Sub => (*a - *b).num_nanoseconds().map(Self::Int).ok_or_else(invalid),
                _ => compare(op, a.cmp(b)).ok_or_else(invalid),
            },
            (Self::Cell(cell), rhs) => cell.borrow().binary_op(op, rhs, limits),
            _ => Err(invalid()),
        }
    }

    /// `value[index]`; missing elements and keys read as undefined.
    pub fn index_get(&self, index: &Self) -> Result<Self, RuntimeError> {
        let invalid_index = || RuntimeError::InvalidIndexType {
            found: index.type_name(),
        };
        match self {
            Self::Array(_) | Self::ImmutableArray(_) => {
                let Self::Int(i) = index else {
                    return Err(invalid_index());
                };
                Ok(self.with_items(|items| {
                    usize::try_from(*i)
                        .ok()
                        .and_then(|i| items.get(i))
                        .cloned()
                        .unwrap_or_default()
                }))
            }
            Self::String(value) => {
                let Self::Int(i) = index else {
                    return Err(invalid_index());
                };
                Ok(usize::try_from(*i)
                    .ok()
                    .and_then(|i| value.chars().nth(i))
                    .map(Self::Char)
                    .unwrap_or_default())
            }
            Self::Bytes(value) => {
                let Self::Int(i) = index else {
                    return Err(invalid_index());
                };
                Ok(usize::try_from(*i)
                    .ok()
                    .and_then(|i| value.get(i))
                    .map(|byte| Self::Int(i64::from(*byte)))
                    .unwrap_or_default())
            }
            Self::Map(_) | Self::ImmutableMap(_) => {
                let Self::String(key) = index else {
                    return Err(invalid_index());
                };
                Ok(self.with_entries(|entries| entries.get(key.as_ref()).cloned().unwrap_or_default()))
            }
            Self::Error(inner) => match index.as_str() {
                Some("value") => Ok((**inner).clone()),
                _ => Err(RuntimeError::custom("invalid index on error")),
            },
            Self::Undefined => Ok(Self::Undefined),
            Self::Cell(cell) => cell.borrow().index_get(index),
            _ => Err(RuntimeError::NotIndexable {
                found: self.type_name(),
            }),
        }
    }

    /// `value[index] = item` for mutable containers.
    pub fn index_set(&self, index: &Self, item: Self) -> Result<(), RuntimeError> {
        match self {
            Self::Array(items) => {
                let Self::Int(i) = index else {
                    return Err(RuntimeError::InvalidIndexType {
                        found: index.type_name(),
                    });
                };
                let mut items = items.borrow_mut();
                let slot = usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or(RuntimeError::IndexOutOfBounds)?;
                *slot = item;
                Ok(())
            }
            Self::Map(entries) => {
                let Self::String(key) = index else {
                    return Err(RuntimeError::InvalidIndexType {
                        found: index.type_name(),
                    });
                };
                entries.borrow_mut().insert(key.to_string(), item);
                Ok(())
            }
            Self::Cell(cell) => cell.borrow().index_set(index, item),
            _ => Err(RuntimeError::NotIndexAssignable {
                found: self.type_name(),
            }),
        }
    }

    /// `value[low:high]`; bounds are clamped to the sequence length.
    pub fn slice(&self, low: &Self, high: &Self) -> Result<Self, RuntimeError> {
        let bound = |value: &Self| -> Result<Option<i64>, RuntimeError> {
            match value {
                Self::Undefined => Ok(None),
                Self::Int(i) => Ok(Some(*i)),
                other => Err(RuntimeError::InvalidIndexType {
                    found: other.type_name(),
                }),
            }
        };
        let (low, high) = (bound(low)?, bound(high)?);
        match self {
            Self::Array(_) | Self::ImmutableArray(_) => self.with_items(|items| {
                let (start, end) = slice_bounds(items.len(), low, high)?;
                Ok(Self::array(items[start..end].to_vec()))
            }),
            Self::String(value) => {
                let chars: Vec<char> = value.chars().collect();
                let (start, end) = slice_bounds(chars.len(), low, high)?;
                Ok(Self::String(chars[start..end].iter().collect::<String>().into()))
            }
            Self::Bytes(value) => {
                let (start, end) = slice_bounds(value.len(), low, high)?;
                Ok(Self::bytes(value[start..end].to_vec()))
            }
            Self::Cell(cell) => cell.borrow().slice(&opt_int(low), &opt_int(high)),
            _ => Err(RuntimeError::NotIndexable {
                found: self.type_name(),
            }),
        }
    }

    /// Starts an iteration; `None` when the value is not iterable.
    #[must_use]
    pub fn iterate(&self) -> Option<ValueIter> {
        let entries: Vec<(Self, Self)> = match self {
            Self::Array(_) | Self::ImmutableArray(_) => self.with_items(|items| {
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| (index_value(i), item.clone()))
                    .collect()
            }),
            Self::Map(_) | Self::ImmutableMap(_) => self.with_entries(|entries| {
                entries
                    .iter()
                    .map(|(key, value)| (Self::from(key.as_str()), value.clone()))
                    .collect()
            }),
            Self::String(value) => value
                .chars()
                .enumerate()
                .map(|(i, c)| (index_value(i), Self::Char(c)))
                .collect(),
            Self::Bytes(value) => value
                .iter()
                .enumerate()
                .map(|(i, byte)| (index_value(i), Self::Int(i64::from(*byte))))
                .collect(),
            Self::Cell(cell) => return cell.borrow().iterate(),
            _ => return None,
        };
        Some(ValueIter { entries, pos: 0 })
    }

    fn write_repr(&self, f: &mut fmt::Formatter<'_>, stack: &mut Vec<usize>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("<undefined>"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => f.write_str(&format_float(*value)),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Char(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(&quote(value)),
            Self::Bytes(value) => f.write_str(&String::from_utf8_lossy(value)),
            Self::Array(_) | Self::ImmutableArray(_) => {
                let id = self.identity().unwrap_or_default();
                if stack.len() >= MAX_NESTING || stack.contains(&id) {
                    return f.write_str("[...]");
                }
                stack.push(id);
                let result = self.with_items(|items| {
                    f.write_str("[")?;
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        item.write_repr(f, stack)?;
                    }
                    f.write_str("]")
                });
                stack.pop();
                result
            }
            Self::Map(_) | Self::ImmutableMap(_) => {
                let id = self.identity().unwrap_or_default();
                if stack.len() >= MAX_NESTING || stack.contains(&id) {
                    return f.write_str("{...}");
                }
                stack.push(id);
                let result = self.with_entries(|entries| {
                    f.write_str("{")?;
                    for (i, (key, value)) in entries.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{key}: ")?;
                        value.write_repr(f, stack)?;
                    }
                    f.write_str("}")
                });
                stack.pop();
                result
            }
            Self::Error(inner) => {
                f.write_str("error: ")?;
                if stack.len() >= MAX_NESTING {
                    return f.write_str("...");
                }
                stack.push(self.identity().unwrap_or_default());
                let result = inner.write_repr(f, stack);
                stack.pop();
                result
            }
            Self::Time(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f %z")),
            Self::Closure(_) => f.write_str("<compiled-function>"),
            Self::Native(native) => match native.kind {
                NativeKind::Builtin => f.write_str("<builtin-function>"),
                NativeKind::User => f.write_str("<user-function>"),
            },
            Self::Cell(cell) => cell.borrow().write_repr(f, stack),
            Self::Iterator(_) => f.write_str("<iterator>"),
        }
    }
}

/// Display form: strings are quoted, containers render recursively and
/// cycles, or nesting past [`MAX_NESTING`], render as `[...]`/`{...}`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_repr(f, &mut Vec::new())
    }
}

/// Renders a float in plain decimal notation with the shortest digits that
/// round-trip.
#[must_use]
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value.is_infinite() {
        let sign = if value > 0.0 { '+' } else { '-' };
        format!("{sign}Inf")
    } else {
        format!("{value}")
    }
}

fn index_value(i: usize) -> Value {
    Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
}

fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Undefined, Value::Int)
}

fn slice_bounds(len: usize, low: Option<i64>, high: Option<i64>) -> Result<(usize, usize), RuntimeError> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let low = low.unwrap_or(0);
    let high = high.unwrap_or(len_i);
    if low > high {
        return Err(RuntimeError::InvalidSliceIndex { low, high });
    }
    let clamp = |i: i64| usize::try_from(i.clamp(0, len_i)).unwrap_or(len);
    Ok((clamp(low), clamp(high)))
}

fn compare(op: Operator, ordering: Ordering) -> Option<Value> {
    let result = match op {
        Operator::Less => ordering.is_lt(),
        Operator::LessEq => ordering.is_le(),
        Operator::Greater => ordering.is_gt(),
        Operator::GreaterEq => ordering.is_ge(),
        _ => return None,
    };
    Some(Value::Bool(result))
}

fn int_op(op: Operator, a: i64, b: i64) -> Option<Result<Value, RuntimeError>> {
    let value = match op {
        Operator::Add => a.wrapping_add(b),
        Operator::Sub => a.wrapping_sub(b),
        Operator::Mul => a.wrapping_mul(b),
        Operator::Quo => {
            if b == 0 {
                return Some(Err(RuntimeError::DivisionByZero));
            }
            a.wrapping_div(b)
        }
        Operator::Rem => {
            if b == 0 {
                return Some(Err(RuntimeError::DivisionByZero));
            }
            a.wrapping_rem(b)
        }
        Operator::And => a & b,
        Operator::Or => a | b,
        Operator::Xor => a ^ b,
        Operator::AndNot => a & !b,
        Operator::Shl | Operator::Shr => {
            let Ok(shift) = u32::try_from(b) else {
                return Some(Err(RuntimeError::custom("negative shift amount")));
            };
            match (op, shift) {
                (Operator::Shl, 64..) => 0,
                (Operator::Shl, _) => a << shift,
                (_, 64..) => {
                    if a < 0 {
                        -1
                    } else {
                        0
                    }
                }
                _ => a >> shift,
            }
        }
        _ => return compare(op, a.cmp(&b)).map(Ok),
    };
    Some(Ok(Value::Int(value)))
}

fn float_op(op: Operator, a: f64, b: f64) -> Option<Value> {
    let value = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Quo => a / b,
        _ => return a.partial_cmp(&b).and_then(|ordering| compare(op, ordering)).or_else(|| {
            matches!(op, Operator::Less | Operator::LessEq | Operator::Greater | Operator::GreaterEq)
                .then_some(Value::Bool(false))
        }),
    };
    Some(Value::Float(value))
}

fn char_op(op: Operator, a: i64, b: i64) -> Option<Value> {
    let code = match op {
        Operator::Add => a.checked_add(b)?,
        Operator::Sub => a.checked_sub(b)?,
        _ => return compare(op, a.cmp(&b)),
    };
    u32::try_from(code).ok().and_then(char::from_u32).map(Value::Char)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_nested_strings_only() {
        let value = Value::array(vec![Value::Int(1), Value::from("a"), Value::Float(2.5)]);
        assert_eq!(value.to_string(), r#"[1, "a", 2.5]"#);
        assert_eq!(Value::from("a").to_text().as_deref(), Some("a"));
        assert_eq!(Value::Undefined.to_text(), None);
    }

    #[test]
    fn cyclic_array_display_terminates() {
        let value = Value::array(vec![Value::Int(1)]);
        if let Value::Array(items) = &value {
            items.borrow_mut().push(value.clone());
        }
        assert_eq!(value.to_string(), "[1, [...]]");
    }

    #[test]
    fn deep_nesting_displays_and_drops() {
        let mut value = Value::Int(0);
        for i in 0..100_000 {
            value = if i % 2 == 0 {
                Value::array(vec![value])
            } else {
                let mut entries = ValueMap::new();
                entries.insert("k".to_owned(), Value::error(value));
                Value::map(entries)
            };
        }
        let text = value.to_string();
        assert!(text.starts_with("{k: error: [{k: error: ["), "{text}");
        assert!(text.ends_with("{k: error: ...}]}]"), "{text}");
        drop(value);
    }

    #[test]
    fn int_float_promotion() {
        let limits = ResourceLimits::default();
        let sum = Value::Int(1).binary_op(Operator::Add, &Value::Float(0.5), &limits).unwrap();
        assert_eq!(sum, Value::Float(1.5));
        let err = Value::Int(1).binary_op(Operator::Quo, &Value::Int(0), &limits).unwrap_err();
        assert_eq!(err, RuntimeError::DivisionByZero);
    }
}
