//! Importable modules and the registry the compiler resolves `import` with.
//!
//! Registered modules are immutable maps of host functions and constants;
//! names the registry does not know fall back to file imports when those are
//! enabled. The kernel assembles a registry per evaluation from the safe
//! modules, `fmt` bound to its stdout proxy and, when enabled, `jsonrpc`.

use std::rc::Rc;

use ahash::AHashMap;
use chrono::{DateTime, Local};

use crate::{
    context::ContextSlot,
    exception::RuntimeError,
    resource::ResourceLimits,
    value::{NativeFunction, Value, ValueMap},
};

pub mod encoding;
pub mod fmt;
pub mod json;
pub mod jsonrpc;
pub mod math;
pub mod random;
pub mod text;
pub mod times;

/// Modules every kernel exposes, in registration order.
pub const SAFE_MODULES: [&str; 7] = ["math", "text", "times", "rand", "json", "base64", "hex"];

#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    /// Module name to its attributes as an immutable map.
    modules: AHashMap<String, Value>,
}

impl ModuleMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_builtin(&mut self, name: impl Into<String>, attrs: ValueMap) {
        self.modules.insert(name.into(), Value::immutable_map(attrs));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.modules.get(name)
    }

    /// Registered module names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Attributes of the safe module `name`; `ctx` is consulted by functions
/// that block.
#[must_use]
pub fn safe_module(name: &str, ctx: &ContextSlot) -> Option<ValueMap> {
    let attrs = match name {
        "math" => math::module(),
        "text" => text::module(),
        "times" => times::module(ctx),
        "rand" => random::module(),
        "json" => json::module(),
        "base64" => encoding::base64_module(),
        "hex" => encoding::hex_module(),
        _ => return None,
    };
    Some(attrs)
}

/// A registry holding every safe module.
#[must_use]
pub fn safe_modules(ctx: &ContextSlot) -> ModuleMap {
    let mut modules = ModuleMap::new();
    for name in SAFE_MODULES {
        if let Some(attrs) = safe_module(name, ctx) {
            modules.add_builtin(name, attrs);
        }
    }
    modules
}

pub(crate) fn function(
    name: &str,
    f: impl Fn(&ResourceLimits, &[Value]) -> Result<Value, RuntimeError> + 'static,
) -> Value {
    Value::Native(Rc::new(NativeFunction::new(name, f)))
}

/// Adds a host function to a module's attributes.
pub(crate) fn register(
    attrs: &mut ValueMap,
    name: &str,
    f: impl Fn(&ResourceLimits, &[Value]) -> Result<Value, RuntimeError> + 'static,
) {
    attrs.insert(name.to_owned(), function(name, f));
}

/// Host failures a script is expected to handle come back as error values.
pub(crate) fn error_value(message: impl Into<String>) -> Value {
    Value::error(Value::from(message.into().as_str()))
}

fn ordinal(index: usize) -> &'static str {
    ["first", "second", "third", "fourth", "fifth", "sixth", "seventh"]
        .get(index)
        .copied()
        .unwrap_or("argument")
}

pub(crate) fn expect_args(args: &[Value], n: usize) -> Result<(), RuntimeError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(RuntimeError::WrongNumArguments)
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value, RuntimeError> {
    args.get(index).ok_or(RuntimeError::WrongNumArguments)
}

pub(crate) fn int_arg(args: &[Value], index: usize) -> Result<i64, RuntimeError> {
    let value = arg(args, index)?;
    value
        .to_int()
        .ok_or_else(|| RuntimeError::invalid_argument(ordinal(index), "int(compatible)", value.type_name()))
}

pub(crate) fn float_arg(args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    let value = arg(args, index)?;
    value
        .to_float()
        .ok_or_else(|| RuntimeError::invalid_argument(ordinal(index), "float(compatible)", value.type_name()))
}

pub(crate) fn str_arg(args: &[Value], index: usize) -> Result<String, RuntimeError> {
    let value = arg(args, index)?;
    value
        .to_text()
        .ok_or_else(|| RuntimeError::invalid_argument(ordinal(index), "string(compatible)", value.type_name()))
}

pub(crate) fn bool_arg(args: &[Value], index: usize) -> Result<bool, RuntimeError> {
    let value = arg(args, index)?;
    match value {
        Value::Undefined => Err(RuntimeError::invalid_argument(
            ordinal(index),
            "bool(compatible)",
            value.type_name(),
        )),
        other => Ok(!other.is_falsy()),
    }
}

pub(crate) fn bytes_arg(args: &[Value], index: usize) -> Result<Vec<u8>, RuntimeError> {
    let value = arg(args, index)?;
    value
        .to_bytes()
        .ok_or_else(|| RuntimeError::invalid_argument(ordinal(index), "bytes(compatible)", value.type_name()))
}

pub(crate) fn time_arg(args: &[Value], index: usize) -> Result<DateTime<Local>, RuntimeError> {
    let value = arg(args, index)?;
    value
        .to_time()
        .ok_or_else(|| RuntimeError::invalid_argument(ordinal(index), "time(compatible)", value.type_name()))
}

pub(crate) fn int_value(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}
