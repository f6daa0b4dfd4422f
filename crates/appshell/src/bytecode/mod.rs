//! Bytecode compilation and execution.
//!
//! The compiler lowers the syntax tree to a flat list of opcodes per
//! function; the VM runs them on an operand stack against globals owned by
//! the host.

mod builder;
mod code;
mod compiler;
mod op;
mod symbols;
mod vm;

pub use code::Closure;
pub use compiler::{CompileError, Compiler, SOURCE_FILE_EXT};
pub use symbols::SymbolTable;
pub use vm::Vm;
