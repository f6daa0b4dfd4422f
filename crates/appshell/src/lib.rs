#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "float to int conversions truncate like Go")]

mod builtins;
mod bytecode;
mod context;
mod convert;
mod exception;
mod expressions;
mod format;
mod io;
mod modules;
mod parse;
mod repl;
mod repl_error;
mod resource;
mod snapshot;
mod value;

pub use crate::{
    bytecode::{CompileError, SOURCE_FILE_EXT},
    context::{Context, ContextError},
    convert::ConvertError,
    exception::{RuntimeError, VmError},
    io::{CollectOutput, ReaderProxy, WriterProxy},
    modules::SAFE_MODULES,
    parse::{ParseError, SourcePos},
    repl::{AUTO_PRINT_NAME, ParseOutcome, REPL_FILE_NAME, Shell},
    repl_error::ReplError,
    resource::{DEFAULT_MAX_ARRAY_LEN, DEFAULT_MAX_BYTES_LEN, DEFAULT_MAX_STRING_LEN, GLOBALS_SIZE, MAX_NESTING, ResourceLimits},
    snapshot::{Failed, SnapshotDocument, SnapshotError},
    value::{NativeFunction, NativeKind, Release, Shared, Value, ValueMap},
};
