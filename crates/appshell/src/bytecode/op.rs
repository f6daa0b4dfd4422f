use crate::expressions::{Operator, UnaryOp};

/// One VM instruction.
///
/// Operands are indices into the constant pool, the globals slots, the
/// current frame's locals or the current closure's free variables; jump
/// targets are absolute instruction offsets within the same `Code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum Opcode {
    Constant(usize),
    Undefined,
    True,
    False,
    Pop,
    Binary(Operator),
    Unary(UnaryOp),
    Jump(usize),
    /// Pops the condition and jumps when it is falsy.
    JumpFalsy(usize),
    /// `&&`: jumps keeping the left operand when falsy, pops it otherwise.
    AndJump(usize),
    /// `||`: jumps keeping the left operand when truthy, pops it otherwise.
    OrJump(usize),
    Array(usize),
    /// Builds a map from `n` key/value pairs.
    Map(usize),
    Error,
    Immutable,
    Index,
    /// Pops high, low and the sequence; missing bounds are pushed as undefined.
    Slice,
    Call {
        args: usize,
        spread: bool,
    },
    Return(bool),
    GetGlobal(usize),
    SetGlobal(usize),
    GetLocal(usize),
    SetLocal(usize),
    /// Stores into a local slot without writing through a captured cell, so
    /// each definition gets a fresh variable.
    DefineLocal(usize),
    GetBuiltin(usize),
    GetFree(usize),
    SetFree(usize),
    /// Pushes a cell for a local, converting the slot into a cell first.
    GetLocalPtr(usize),
    GetFreePtr(usize),
    Closure {
        constant: usize,
        free: usize,
    },
    /// `x[a][b] = v` where `x` is a global: pops `selectors` indices and the value.
    SetSelGlobal {
        index: usize,
        selectors: usize,
    },
    SetSelLocal {
        index: usize,
        selectors: usize,
    },
    SetSelFree {
        index: usize,
        selectors: usize,
    },
    IteratorInit,
    /// Pops the iterator, advances it and pushes whether an entry is available.
    IteratorNext,
    IteratorKey,
    IteratorValue,
}

impl Opcode {
    /// Returns the instruction with its jump target replaced; non-jumps are
    /// returned unchanged.
    #[must_use]
    pub fn with_target(self, target: usize) -> Self {
        match self {
            Self::Jump(_) => Self::Jump(target),
            Self::JumpFalsy(_) => Self::JumpFalsy(target),
            Self::AndJump(_) => Self::AndJump(target),
            Self::OrJump(_) => Self::OrJump(target),
            other => other,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}
