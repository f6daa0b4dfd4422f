use std::fmt;

use crate::{bytecode::CompileError, exception::VmError, parse::ParseError, snapshot::SnapshotError};

/// Error type for the session kernel, separating failures by pipeline stage.
#[derive(Debug)]
pub enum ReplError {
    /// The fragment is not valid syntax.
    Parse(ParseError),
    /// Symbol or import resolution failed; nothing ran.
    Compile(CompileError),
    /// The program failed while running. Globals it already assigned keep
    /// their new values.
    Runtime(VmError),
    /// Reading or writing a snapshot failed.
    Snapshot(SnapshotError),
    /// A host tried to set a global the kernel cannot hold.
    Global { name: String, reason: &'static str },
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(error) => write!(f, "{error}"),
            Self::Compile(error) => write!(f, "tengo: compilation error {error}"),
            Self::Runtime(error) => write!(f, "tengo: eval error: {error}"),
            Self::Snapshot(error) => write!(f, "{error}"),
            Self::Global { name, reason } => write!(f, "cannot set global '{name}': {reason}"),
        }
    }
}

impl std::error::Error for ReplError {}

impl From<ParseError> for ReplError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<CompileError> for ReplError {
    fn from(error: CompileError) -> Self {
        Self::Compile(error)
    }
}

impl From<VmError> for ReplError {
    fn from(error: VmError) -> Self {
        Self::Runtime(error)
    }
}

impl From<SnapshotError> for ReplError {
    fn from(error: SnapshotError) -> Self {
        Self::Snapshot(error)
    }
}
