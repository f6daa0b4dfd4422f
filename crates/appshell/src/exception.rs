use std::fmt;

use crate::{context::ContextError, parse::SourcePos};

/// Errors raised while executing script code.
///
/// Host functions return these to abort the running program; script-visible
/// failures that should be handled by the script instead are returned as
/// `Value::Error` values.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    WrongNumArguments,
    /// Arity mismatch when calling a compiled function.
    WrongArity {
        want: usize,
        got: usize,
        varargs: bool,
    },
    InvalidArgumentType {
        name: String,
        expected: String,
        found: String,
    },
    StringLimit,
    BytesLimit,
    ArrayLimit,
    IndexOutOfBounds,
    InvalidIndexType {
        found: String,
    },
    InvalidSliceIndex {
        low: i64,
        high: i64,
    },
    NotIndexable {
        found: String,
    },
    NotIndexAssignable {
        found: String,
    },
    NotIterable {
        found: String,
    },
    NotCallable {
        found: String,
    },
    InvalidOperation {
        lhs: String,
        op: String,
        rhs: String,
    },
    InvalidUnaryOperation {
        op: String,
        operand: String,
    },
    DivisionByZero,
    InvalidRangeStep,
    StackOverflow,
    Context(ContextError),
    Custom(String),
}

impl RuntimeError {
    /// Shorthand for [`RuntimeError::InvalidArgumentType`].
    pub fn invalid_argument(name: impl Into<String>, expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::InvalidArgumentType {
            name: name.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongNumArguments => write!(f, "wrong number of arguments"),
            Self::WrongArity { want, got, varargs } => {
                let relation = if *varargs { ">=" } else { "=" };
                write!(f, "wrong number of arguments: want{relation}{want}, got={got}")
            }
            Self::InvalidArgumentType { name, expected, found } => {
                write!(f, "invalid type for argument '{name}': expected {expected}, found {found}")
            }
            Self::StringLimit => write!(f, "exceeding string size limit"),
            Self::BytesLimit => write!(f, "exceeding bytes size limit"),
            Self::ArrayLimit => write!(f, "exceeding array size limit"),
            Self::IndexOutOfBounds => write!(f, "index out of bounds"),
            Self::InvalidIndexType { found } => write!(f, "invalid index type: {found}"),
            Self::InvalidSliceIndex { low, high } => write!(f, "invalid slice index: {low} > {high}"),
            Self::NotIndexable { found } => write!(f, "not indexable: {found}"),
            Self::NotIndexAssignable { found } => write!(f, "not index-assignable: {found}"),
            Self::NotIterable { found } => write!(f, "not iterable: {found}"),
            Self::NotCallable { found } => write!(f, "not callable: {found}"),
            Self::InvalidOperation { lhs, op, rhs } => write!(f, "invalid operation: {lhs} {op} {rhs}"),
            Self::InvalidUnaryOperation { op, operand } => write!(f, "invalid operation: {op}{operand}"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::InvalidRangeStep => write!(f, "range step must be greater than 0"),
            Self::StackOverflow => write!(f, "stack overflow"),
            Self::Context(error) => write!(f, "{error}"),
            Self::Custom(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<ContextError> for RuntimeError {
    fn from(error: ContextError) -> Self {
        Self::Context(error)
    }
}

/// A runtime error annotated with the source position of the failing
/// instruction and the positions of the calling frames.
#[derive(Debug, Clone, PartialEq)]
pub struct VmError {
    pub error: RuntimeError,
    pub pos: SourcePos,
    /// Call sites of enclosing frames, innermost first.
    pub trace: Vec<SourcePos>,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime Error: {}\n\tat {}", self.error, self.pos)?;
        for pos in &self.trace {
            write!(f, "\n\tat {pos}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VmError {}
