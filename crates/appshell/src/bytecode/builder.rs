//! Builder for emitting instructions during compilation.
//!
//! `CodeBuilder` appends instructions, records the source position of each
//! one, and handles forward jumps by emitting a placeholder target that is
//! patched once the destination is known.

use super::{code::Code, op::Opcode};
use crate::parse::{NO_POS, Pos};

/// A forward jump waiting for its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpLabel(usize);

#[derive(Debug)]
pub struct CodeBuilder {
    instructions: Vec<Opcode>,
    locations: Vec<Pos>,
    current_location: Pos,
}

impl Default for CodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            locations: Vec::new(),
            current_location: NO_POS,
        }
    }

    /// Sets the source position recorded for subsequently emitted
    /// instructions. Synthesized nodes carry `NO_POS` and keep the previous
    /// position.
    pub fn set_location(&mut self, pos: Pos) {
        if pos != NO_POS {
            self.current_location = pos;
        }
    }

    pub fn emit(&mut self, op: Opcode) {
        self.instructions.push(op);
        self.locations.push(self.current_location);
    }

    /// Emits a jump whose target is patched later with [`Self::patch_jump`].
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        let label = JumpLabel(self.instructions.len());
        self.emit(op.with_target(usize::MAX));
        label
    }

    /// Points a forward jump at the next instruction to be emitted.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.current_offset();
        self.patch_jump_to(label, target);
    }

    pub fn patch_jump_to(&mut self, label: JumpLabel, target: usize) {
        if let Some(op) = self.instructions.get_mut(label.0) {
            *op = op.with_target(target);
        }
    }

    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.instructions.len()
    }

    #[must_use]
    pub fn build(self, num_locals: usize, num_params: usize, varargs: bool) -> Code {
        Code::new(self.instructions, self.locations, num_locals, num_params, varargs)
    }
}
