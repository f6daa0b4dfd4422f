use std::{cell::RefCell, fmt, rc::Rc};

use super::op::Opcode;
use crate::{parse::Pos, value::Value};

/// A compiled function body: instructions plus the metadata the VM needs to
/// set up a frame.
#[derive(Debug)]
pub struct Code {
    instructions: Vec<Opcode>,
    /// Source position of each instruction, parallel to `instructions`.
    locations: Vec<Pos>,
    num_locals: usize,
    num_params: usize,
    varargs: bool,
}

impl Code {
    pub(crate) fn new(
        instructions: Vec<Opcode>,
        locations: Vec<Pos>,
        num_locals: usize,
        num_params: usize,
        varargs: bool,
    ) -> Self {
        Self {
            instructions,
            locations,
            num_locals,
            num_params,
            varargs,
        }
    }

    #[must_use]
    pub fn instructions(&self) -> &[Opcode] {
        &self.instructions
    }

    #[must_use]
    pub fn location(&self, ip: usize) -> Pos {
        self.locations.get(ip).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn num_locals(&self) -> usize {
        self.num_locals
    }

    #[must_use]
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    #[must_use]
    pub fn varargs(&self) -> bool {
        self.varargs
    }
}

/// Human-readable listing, one instruction per line.
impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (ip, op) in self.instructions.iter().enumerate() {
            writeln!(f, "{ip:04} {op:?}")?;
        }
        Ok(())
    }
}

/// A function value: compiled code plus the cells of its captured variables.
#[derive(Debug)]
pub struct Closure {
    pub code: Rc<Code>,
    pub free: Vec<Rc<RefCell<Value>>>,
}

impl Closure {
    #[must_use]
    pub fn new(code: Rc<Code>) -> Self {
        Self { code, free: Vec::new() }
    }
}
