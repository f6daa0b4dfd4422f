//! Stack-based virtual machine executing compiled code.
//!
//! A VM borrows the constant pool, the globals slots and the builtins from
//! its host and owns only the operand stack and call stack, so the host can
//! run each fragment on a fresh VM while the globals persist. Locals of a
//! frame live on the operand stack starting at the frame's base; a local that
//! a closure captures is converted in place into a shared cell.

use std::{cell::RefCell, mem, rc::Rc};

use super::code::{Closure, Code};
use super::op::Opcode;
use crate::{
    exception::{RuntimeError, VmError},
    parse::SourceFileSet,
    resource::{MAX_FRAMES, ResourceLimits, STACK_SIZE},
    value::{Value, ValueMap},
};

type RunResult<T = ()> = Result<T, RuntimeError>;

/// A single function activation.
///
/// Locals start at `stack_base`, parameters first; operands of the running
/// code are pushed above them. Below a called function's locals sits the
/// callee value itself, which the return replaces with the result.
#[derive(Debug)]
struct CallFrame {
    closure: Rc<Closure>,
    /// Index of the next instruction to execute.
    ip: usize,
    /// Operand stack index of the frame's first local.
    stack_base: usize,
}

impl CallFrame {
    fn code(&self) -> &Code {
        &self.closure.code
    }
}

/// Executes one compiled fragment against host-owned state.
///
/// The running frame is owned by the dispatch loop; `frames` holds only the
/// suspended callers.
pub struct Vm<'a> {
    constants: &'a [Value],
    /// Global slots indexed by `GetGlobal`/`SetGlobal`.
    globals: &'a mut [Value],
    /// Builtin functions in registration order.
    builtins: &'a [Value],
    /// Resolves instruction locations for error positions.
    file_set: &'a SourceFileSet,
    limits: ResourceLimits,
    /// Operand stack shared by all frames; bounded by `STACK_SIZE`.
    stack: Vec<Value>,
    /// Suspended callers of the running frame, outermost first.
    frames: Vec<CallFrame>,
}

impl<'a> Vm<'a> {
    pub fn new(
        constants: &'a [Value],
        globals: &'a mut [Value],
        builtins: &'a [Value],
        file_set: &'a SourceFileSet,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            constants,
            globals,
            builtins,
            file_set,
            limits,
            stack: Vec::with_capacity(64),
            frames: Vec::with_capacity(16),
        }
    }

    /// Runs `main` to completion. The stack and frames are cleared
    /// afterwards whatever the outcome; only the globals keep its effects.
    pub fn run(&mut self, main: Rc<Code>) -> Result<(), VmError> {
        self.stack.clear();
        self.frames.clear();
        self.stack.resize(main.num_locals(), Value::Undefined);
        let mut frame = CallFrame {
            closure: Rc::new(Closure::new(main)),
            ip: 0,
            stack_base: 0,
        };
        let result = self.execute(&mut frame);
        let result = result.map_err(|error| self.annotate(error, &frame));
        self.stack.clear();
        self.frames.clear();
        result
    }

    /// Attaches the failing position and the positions of the suspended
    /// callers, innermost first.
    fn annotate(&self, error: RuntimeError, frame: &CallFrame) -> VmError {
        let position = |frame: &CallFrame| {
            let location = frame.code().location(frame.ip.saturating_sub(1));
            self.file_set.position(location)
        };
        VmError {
            error,
            pos: position(frame),
            trace: self.frames.iter().rev().map(position).collect(),
        }
    }

    /// Pushes an operand, failing once the stack is full.
    fn push(&mut self, value: Value) -> RunResult {
        if self.stack.len() >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pops an operand; an empty stack yields undefined.
    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or_default()
    }

    /// Pops the top `n` operands, preserving their push order.
    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    fn peek(&self) -> Option<&Value> {
        self.stack.last()
    }

    /// Clones a constant out of the pool.
    fn constant(&self, index: usize) -> Value {
        self.constants.get(index).cloned().unwrap_or_default()
    }

    fn global_slot(&mut self, index: usize) -> RunResult<&mut Value> {
        self.globals
            .get_mut(index)
            .ok_or_else(|| RuntimeError::custom(format!("global slot {index} out of range")))
    }

    /// Slot of local `index` of `frame`, growing the stack if the slot was
    /// never written.
    fn local_slot(&mut self, frame: &CallFrame, index: usize) -> &mut Value {
        let at = frame.stack_base + index;
        if at >= self.stack.len() {
            self.stack.resize(at + 1, Value::Undefined);
        }
        &mut self.stack[at]
    }

    /// Captured variable `index` of the running closure.
    fn free_cell(frame: &CallFrame, index: usize) -> RunResult<Rc<RefCell<Value>>> {
        frame
            .closure
            .free
            .get(index)
            .cloned()
            .ok_or_else(|| RuntimeError::custom(format!("free variable {index} out of range")))
    }

    /// The dispatch loop. Calls and returns swap `frame` in place with
    /// an entry of `frames`, so the loop itself never recurses.
    fn execute(&mut self, frame: &mut CallFrame) -> RunResult {
        loop {
            let Some(&op) = frame.code().instructions().get(frame.ip) else {
                // Only the main program runs off its end; functions always
                // finish with a return.
                if self.frames.is_empty() {
                    return Ok(());
                }
                self.return_from(frame, Value::Undefined)?;
                continue;
            };
            frame.ip += 1;

            match op {
                Opcode::Constant(index) => {
                    let value = self.constant(index);
                    self.push(value)?;
                }
                Opcode::Undefined => self.push(Value::Undefined)?,
                Opcode::True => self.push(Value::Bool(true))?,
                Opcode::False => self.push(Value::Bool(false))?,
                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Binary(operator) => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    let result = lhs.binary_op(operator, &rhs, &self.limits)?;
                    self.push(result)?;
                }
                Opcode::Unary(operator) => {
                    let operand = self.pop();
                    self.push(operand.unary_op(operator)?)?;
                }
                Opcode::Jump(target) => frame.ip = target,
                Opcode::JumpFalsy(target) => {
                    if self.pop().is_falsy() {
                        frame.ip = target;
                    }
                }
                Opcode::AndJump(target) => {
                    if self.peek().is_none_or(Value::is_falsy) {
                        frame.ip = target;
                    } else {
                        self.pop();
                    }
                }
                Opcode::OrJump(target) => {
                    if self.peek().is_some_and(|value| !value.is_falsy()) {
                        frame.ip = target;
                    } else {
                        self.pop();
                    }
                }
                Opcode::Array(n) => {
                    let items = self.pop_n(n);
                    self.push(Value::array(items))?;
                }
                Opcode::Map(n) => {
                    let pairs = self.pop_n(n * 2);
                    let mut entries = ValueMap::with_capacity(n);
                    let mut pairs = pairs.into_iter();
                    while let (Some(key), Some(value)) = (pairs.next(), pairs.next()) {
                        entries.insert(key.as_str().unwrap_or_default().to_owned(), value);
                    }
                    self.push(Value::map(entries))?;
                }
                Opcode::Error => {
                    let value = self.pop();
                    self.push(Value::error(value))?;
                }
                Opcode::Immutable => {
                    let value = match self.pop() {
                        Value::Array(items) => Value::ImmutableArray(items.borrow().clone().into()),
                        Value::Map(entries) => Value::ImmutableMap(Rc::new(entries.borrow().clone())),
                        other => other,
                    };
                    self.push(value)?;
                }
                Opcode::Index => {
                    let index = self.pop();
                    let target = self.pop();
                    self.push(target.index_get(&index)?)?;
                }
                Opcode::Slice => {
                    let high = self.pop();
                    let low = self.pop();
                    let target = self.pop();
                    self.push(target.slice(&low, &high)?)?;
                }
                Opcode::Call { args, spread } => self.call(frame, args, spread)?,
                Opcode::Return(has_value) => {
                    let value = if has_value { self.pop() } else { Value::Undefined };
                    // A top-level `export` ends the main program.
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.return_from(frame, value)?;
                }
                Opcode::GetGlobal(index) => {
                    let value = self.global_slot(index)?.clone();
                    self.push(value)?;
                }
                Opcode::SetGlobal(index) => {
                    let value = self.pop();
                    *self.global_slot(index)? = value;
                }
                Opcode::GetLocal(index) => {
                    let value = self.local_slot(frame, index).deref_cell();
                    self.push(value)?;
                }
                Opcode::SetLocal(index) => {
                    let value = self.pop();
                    match self.local_slot(frame, index) {
                        Value::Cell(cell) => *cell.borrow_mut() = value,
                        slot => *slot = value,
                    }
                }
                Opcode::DefineLocal(index) => {
                    let value = self.pop();
                    *self.local_slot(frame, index) = value;
                }
                Opcode::GetBuiltin(index) => {
                    let value = self.builtins.get(index).cloned().unwrap_or_default();
                    self.push(value)?;
                }
                Opcode::GetFree(index) => {
                    let value = Self::free_cell(frame, index)?.borrow().clone();
                    self.push(value)?;
                }
                Opcode::SetFree(index) => {
                    let value = self.pop();
                    *Self::free_cell(frame, index)?.borrow_mut() = value;
                }
                Opcode::GetLocalPtr(index) => {
                    let slot = self.local_slot(frame, index);
                    let cell = match slot {
                        Value::Cell(cell) => Rc::clone(cell),
                        other => {
                            let cell = Rc::new(RefCell::new(mem::take(other)));
                            *other = Value::Cell(Rc::clone(&cell));
                            cell
                        }
                    };
                    self.push(Value::Cell(cell))?;
                }
                Opcode::GetFreePtr(index) => {
                    let cell = Self::free_cell(frame, index)?;
                    self.push(Value::Cell(cell))?;
                }
                Opcode::Closure { constant, free } => {
                    let cells = self
                        .pop_n(free)
                        .into_iter()
                        .map(|value| match value {
                            Value::Cell(cell) => cell,
                            other => Rc::new(RefCell::new(other)),
                        })
                        .collect();
                    let Value::Closure(template) = self.constant(constant) else {
                        return Err(RuntimeError::custom(format!("constant {constant} is not a function")));
                    };
                    let closure = Closure {
                        code: Rc::clone(&template.code),
                        free: cells,
                    };
                    self.push(Value::Closure(Rc::new(closure)))?;
                }
                Opcode::SetSelGlobal { index, selectors } => {
                    let target = self.global_slot(index)?.clone();
                    self.set_selectors(&target, selectors)?;
                }
                Opcode::SetSelLocal { index, selectors } => {
                    let target = self.local_slot(frame, index).deref_cell();
                    self.set_selectors(&target, selectors)?;
                }
                Opcode::SetSelFree { index, selectors } => {
                    let target = Self::free_cell(frame, index)?.borrow().clone();
                    self.set_selectors(&target, selectors)?;
                }
                Opcode::IteratorInit => {
                    let value = self.pop();
                    let iter = value.iterate().ok_or_else(|| RuntimeError::NotIterable {
                        found: value.type_name(),
                    })?;
                    self.push(Value::Iterator(Rc::new(RefCell::new(iter))))?;
                }
                Opcode::IteratorNext => {
                    let available = match self.pop() {
                        Value::Iterator(iter) => iter.borrow_mut().advance(),
                        _ => false,
                    };
                    self.push(Value::Bool(available))?;
                }
                Opcode::IteratorKey | Opcode::IteratorValue => {
                    let value = match self.pop() {
                        Value::Iterator(iter) if op == Opcode::IteratorKey => iter.borrow().key(),
                        Value::Iterator(iter) => iter.borrow().value(),
                        _ => Value::Undefined,
                    };
                    self.push(value)?;
                }
            }
        }
    }

    /// Pops the selectors and the value of `x[a][b] = v` and stores `v`.
    fn set_selectors(&mut self, target: &Value, count: usize) -> RunResult {
        let mut selectors = self.pop_n(count);
        let value = self.pop();
        let Some(last) = selectors.pop() else {
            return Ok(());
        };
        let mut container = target.clone();
        for selector in &selectors {
            container = container.index_get(selector)?;
        }
        container.index_set(&last, value)
    }

    /// Calls the value below the top `num_args` operands. A closure gets a
    /// new frame and becomes the running one; a native function runs at once
    /// and its result replaces the callee and arguments.
    fn call(&mut self, frame: &mut CallFrame, num_args: usize, spread: bool) -> RunResult {
        let mut num_args = num_args;
        if spread {
            let last = self.pop();
            match last {
                Value::Array(_) | Value::ImmutableArray(_) => {
                    let items = last.with_items(<[Value]>::to_vec);
                    num_args = num_args - 1 + items.len();
                    for item in items {
                        self.push(item)?;
                    }
                }
                other => {
                    return Err(RuntimeError::custom(format!("not an array: {}", other.type_name())));
                }
            }
        }

        let callee_index = self
            .stack
            .len()
            .checked_sub(num_args + 1)
            .ok_or(RuntimeError::StackOverflow)?;
        match self.stack[callee_index].clone() {
            Value::Closure(closure) => {
                let code = Rc::clone(&closure.code);
                if code.varargs() {
                    let fixed = code.num_params().saturating_sub(1);
                    if num_args < fixed {
                        return Err(RuntimeError::WrongArity {
                            want: fixed,
                            got: num_args,
                            varargs: true,
                        });
                    }
                    let rest = self.stack.split_off(callee_index + 1 + fixed);
                    self.stack.push(Value::array(rest));
                } else if num_args != code.num_params() {
                    return Err(RuntimeError::WrongArity {
                        want: code.num_params(),
                        got: num_args,
                        varargs: false,
                    });
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(RuntimeError::StackOverflow);
                }
                let stack_base = callee_index + 1;
                let frame_top = stack_base + code.num_locals();
                if frame_top > STACK_SIZE {
                    return Err(RuntimeError::StackOverflow);
                }
                if frame_top > self.stack.len() {
                    self.stack.resize(frame_top, Value::Undefined);
                }
                let callee = CallFrame {
                    closure,
                    ip: 0,
                    stack_base,
                };
                self.frames.push(mem::replace(frame, callee));
                Ok(())
            }
            Value::Native(native) => {
                let args = self.stack.split_off(callee_index + 1);
                self.stack.truncate(callee_index);
                let result = native.call(&self.limits, &args)?;
                self.push(result)
            }
            other => Err(RuntimeError::NotCallable {
                found: other.type_name(),
            }),
        }
    }

    /// Pops the running frame, resumes its caller and pushes `value` where
    /// the callee used to be.
    fn return_from(&mut self, frame: &mut CallFrame, value: Value) -> RunResult {
        let Some(caller) = self.frames.pop() else {
            return Err(RuntimeError::custom("return outside function"));
        };
        // Drops the callee's locals together with the callee itself.
        self.stack.truncate(frame.stack_base.saturating_sub(1));
        *frame = caller;
        self.push(value)
    }
}
