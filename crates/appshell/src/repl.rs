//! The session kernel: a persistent compile-and-run loop over successive code
//! fragments.

use std::{
    cell::{Cell, RefCell},
    io::{Read, Write},
    path::{Path, PathBuf},
    rc::Rc,
};

use strum::IntoEnumIterator;

use crate::{
    builtins::Builtin,
    bytecode::{Compiler, SymbolTable, Vm},
    context::{Context, ContextSlot},
    expressions::{Expr, ExprLoc, File, Node},
    io::{ReaderProxy, WriterProxy},
    modules::{self, ModuleMap, fmt, jsonrpc},
    parse::{NO_POS, ParseError, SourceFileSet, parse},
    repl_error::ReplError,
    resource::{GLOBALS_SIZE, ResourceLimits},
    snapshot::{self, SnapshotDocument},
    value::{NativeFunction, Value},
};

/// Name every fragment is registered under in the source file set.
pub const REPL_FILE_NAME: &str = "(repl)";

/// Reserved global holding the auto-print function.
pub const AUTO_PRINT_NAME: &str = "__repl_println__";

/// Result of [`Shell::parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    /// The fragment with surrounding whitespace removed.
    pub code: String,
    pub error: Option<ParseError>,
}

/// Compilation and runtime state, created by the first evaluation.
struct ReplState {
    globals: Vec<Value>,
    symbols: SymbolTable,
    constants: Vec<Value>,
    builtins: Vec<Value>,
    file_set: SourceFileSet,
}

impl ReplState {
    fn new(stdout: &WriterProxy) -> Self {
        let mut symbols = SymbolTable::new();
        for (index, builtin) in Builtin::iter().enumerate() {
            symbols.define_builtin(index, builtin.name());
        }
        let mut globals = vec![Value::Undefined; GLOBALS_SIZE];
        let symbol = symbols.define_reserved(AUTO_PRINT_NAME);
        globals[symbol.index] = auto_print(stdout.clone());
        tracing::debug!(builtins = ?symbols.builtin_names(), "repl state initialized");
        Self {
            globals,
            symbols,
            constants: Vec::new(),
            builtins: Builtin::values(),
            file_set: SourceFileSet::new(),
        }
    }
}

/// The function auto-print calls are rewritten to: writes its arguments
/// separated by spaces and a newline, skipping undefined ones.
fn auto_print(out: WriterProxy) -> Value {
    let native = NativeFunction::new("println", move |_, args| {
        let mut line = args
            .iter()
            .filter_map(Value::to_text)
            .collect::<Vec<_>>()
            .join(" ");
        line.push('\n');
        // Output errors are not reported to scripts.
        let _ = out.clone().write_all(line.as_bytes());
        Ok(Value::Undefined)
    });
    Value::Native(Rc::new(native))
}

/// Wraps top-level expression statements in an auto-print call and follows
/// every top-level assignment with one printing the assigned targets.
fn add_prints(file: File) -> File {
    let print_call = |args: Vec<ExprLoc>| {
        let func = ExprLoc::new(NO_POS, Expr::Ident(AUTO_PRINT_NAME.to_owned()));
        Node::Expr(ExprLoc::new(
            NO_POS,
            Expr::Call {
                func: Box::new(func),
                args,
                spread: false,
            },
        ))
    };
    let mut nodes = Vec::with_capacity(file.nodes.len());
    for node in file.nodes {
        match node {
            Node::Expr(expr) => nodes.push(print_call(vec![expr])),
            Node::Assign { pos, lhs, op, rhs } => {
                let printed = lhs.clone();
                nodes.push(Node::Assign { pos, lhs, op, rhs });
                nodes.push(print_call(printed));
            }
            other => nodes.push(other),
        }
    }
    File {
        file_index: file.file_index,
        nodes,
    }
}

/// Restores the context and stream targets of a [`Shell`] when dropped.
struct Redirection {
    ctx: ContextSlot,
    stdout: WriterProxy,
    stderr: WriterProxy,
    stdin: ReaderProxy,
    saved: Option<(Context, Box<dyn Write>, Box<dyn Write>, Box<dyn Read>)>,
}

impl Drop for Redirection {
    fn drop(&mut self) {
        if let Some((ctx, stdout, stderr, stdin)) = self.saved.take() {
            *self.ctx.borrow_mut() = ctx;
            self.stdout.replace(stdout);
            self.stderr.replace(stderr);
            self.stdin.replace(stdin);
        }
    }
}

/// A persistent scripting session.
///
/// Each [`eval`](Self::eval) compiles a fragment against the symbols and
/// constants accumulated so far and runs it on a fresh VM sharing the global
/// slots, so names defined by one fragment are visible to the next. Slots
/// never move once assigned.
///
/// The session is single-threaded; host functions hold `Rc` handles to the
/// context and stream proxies that `eval` swaps for the caller's.
pub struct Shell {
    ctx: ContextSlot,
    stdout: WriterProxy,
    stderr: WriterProxy,
    stdin: ReaderProxy,
    import_dir: Option<PathBuf>,
    /// Call counter of the `jsonrpc` module, present once enabled.
    jsonrpc_calls: Option<Rc<Cell<u64>>>,
    limits: ResourceLimits,
    repl: Option<ReplState>,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ctx: Rc::new(RefCell::new(Context::background())),
            stdout: WriterProxy::default(),
            stderr: WriterProxy::default(),
            stdin: ReaderProxy::default(),
            import_dir: None,
            jsonrpc_calls: None,
            limits: ResourceLimits::default(),
            repl: None,
        }
    }

    /// Sets the string and bytes size limits shared by the VM and modules.
    #[must_use]
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Lets scripts import `<dir>/<name>.tengo`; an empty path disables file
    /// imports again.
    pub fn allow_import_from(&mut self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        self.import_dir = if dir.as_os_str().is_empty() {
            None
        } else {
            Some(std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf()))
        };
    }

    /// Registers the `jsonrpc` module for subsequent evaluations.
    pub fn enable_jsonrpc_client(&mut self) {
        self.jsonrpc_calls.get_or_insert_with(|| Rc::new(Cell::new(0)));
    }

    /// Trims `code` and checks its syntax without touching session state.
    #[must_use]
    pub fn parse(&self, _ctx: &Context, code: &str) -> ParseOutcome {
        let code = code.trim().to_owned();
        let error = parse(&mut SourceFileSet::new(), REPL_FILE_NAME, &code).err();
        ParseOutcome { code, error }
    }

    /// Compiles and runs `code`, with the session's streams redirected to the
    /// given ones and `ctx` visible to blocking host functions.
    ///
    /// On a runtime error, globals assigned before the failure keep their new
    /// values.
    pub fn eval(
        &mut self,
        ctx: &Context,
        stdout: impl Write + 'static,
        stderr: impl Write + 'static,
        code: &str,
        stdin: impl Read + 'static,
    ) -> Result<(), ReplError> {
        let _redirection = self.redirect(ctx.clone(), Box::new(stdout), Box::new(stderr), Box::new(stdin));
        let modules = self.modules();
        let import_dir = self.import_dir.clone();
        let limits = self.limits;
        let repl = self.repl();

        let file = add_prints(parse(&mut repl.file_set, REPL_FILE_NAME, code)?);
        let mut compiler = Compiler::new(
            &mut repl.file_set,
            repl.symbols.clone(),
            repl.constants.clone(),
            &modules,
        );
        if let Some(dir) = import_dir {
            compiler.enable_file_import(dir);
        }
        let main = compiler.compile(&file)?;
        // Adopted before running: closures created by a fragment that fails
        // midway still reference these constants.
        (repl.symbols, repl.constants) = compiler.into_parts();
        tracing::debug!(
            globals = repl.symbols.num_globals(),
            constants = repl.constants.len(),
            "running fragment"
        );

        Vm::new(&repl.constants, &mut repl.globals, &repl.builtins, &repl.file_set, limits).run(main)?;
        Ok(())
    }

    /// Writes a snapshot of the serializable globals to `out`.
    pub fn snapshot(&self, _ctx: &Context, out: impl Write) -> Result<(), ReplError> {
        let globals = self.globals();
        let document = snapshot::take(globals.iter().map(|(name, value)| (name.as_str(), value)));
        document.write_to(out)?;
        Ok(())
    }

    /// Reads a snapshot from `input` and installs its values as globals.
    pub fn restore_snapshot(&mut self, _ctx: &Context, input: impl Read) -> Result<(), ReplError> {
        let document = SnapshotDocument::read_from(input)?;
        let values = snapshot::restore(&document, &self.limits)?;
        tracing::debug!(restored = values.len(), skipped = document.failed.len(), "restoring snapshot");
        for (name, value) in values {
            self.set_global(&name, value)?;
        }
        Ok(())
    }

    /// The session's global values sorted by name, without the reserved ones.
    #[must_use]
    pub fn globals(&self) -> Vec<(String, Value)> {
        let Some(repl) = &self.repl else {
            return Vec::new();
        };
        let mut globals: Vec<(String, Value)> = repl
            .symbols
            .globals()
            .filter(|symbol| !symbol.reserved)
            .map(|symbol| {
                let value = repl.globals.get(symbol.index).cloned().unwrap_or_default();
                (symbol.name.clone(), value)
            })
            .collect();
        globals.sort_by(|a, b| a.0.cmp(&b.0));
        globals
    }

    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        let repl = self.repl.as_ref()?;
        let symbol = repl.symbols.global(name)?;
        repl.globals.get(symbol.index).cloned()
    }

    /// Sets a global, defining the name if the session has not seen it.
    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), ReplError> {
        let global_error = |reason| ReplError::Global {
            name: name.to_owned(),
            reason,
        };
        let repl = self.repl();
        let symbol = match repl.symbols.global(name) {
            Some(symbol) if symbol.reserved => return Err(global_error("reserved name")),
            Some(symbol) => symbol.clone(),
            // The name must stay unknown to later fragments if it gets no slot.
            None if repl.symbols.num_globals() >= repl.globals.len() => {
                return Err(global_error("no free global slot"));
            }
            None => repl.symbols.define(name),
        };
        let Some(slot) = repl.globals.get_mut(symbol.index) else {
            return Err(global_error("no free global slot"));
        };
        *slot = value;
        Ok(())
    }

    /// Handle to the session's stdout; writes go to the target of the
    /// evaluation in progress.
    #[must_use]
    pub fn stdout(&self) -> WriterProxy {
        self.stdout.clone()
    }

    #[must_use]
    pub fn stderr(&self) -> WriterProxy {
        self.stderr.clone()
    }

    #[must_use]
    pub fn stdin(&self) -> ReaderProxy {
        self.stdin.clone()
    }

    fn repl(&mut self) -> &mut ReplState {
        let stdout = &self.stdout;
        self.repl.get_or_insert_with(|| ReplState::new(stdout))
    }

    fn redirect(
        &self,
        ctx: Context,
        stdout: Box<dyn Write>,
        stderr: Box<dyn Write>,
        stdin: Box<dyn Read>,
    ) -> Redirection {
        let saved_ctx = self.ctx.replace(ctx);
        let saved = (
            saved_ctx,
            self.stdout.replace(stdout),
            self.stderr.replace(stderr),
            self.stdin.replace(stdin),
        );
        Redirection {
            ctx: Rc::clone(&self.ctx),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            stdin: self.stdin.clone(),
            saved: Some(saved),
        }
    }

    /// The modules importable by the next evaluation.
    fn modules(&self) -> ModuleMap {
        let mut modules = modules::safe_modules(&self.ctx);
        modules.add_builtin("fmt", fmt::module(&self.stdout));
        if let Some(calls) = &self.jsonrpc_calls {
            modules.add_builtin("jsonrpc", jsonrpc::module(&self.ctx, Rc::clone(calls)));
        }
        tracing::trace!(modules = ?modules.names(), "module registry");
        modules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_wraps_expressions_and_follows_assignments() {
        let mut file_set = SourceFileSet::new();
        let file = parse(&mut file_set, REPL_FILE_NAME, "1 + 1\nx := 2\nif x { x }").unwrap();
        let nodes = add_prints(file).nodes;
        assert_eq!(nodes.len(), 4);
        let is_print = |node: &Node| {
            matches!(node, Node::Expr(ExprLoc { expr: Expr::Call { func, .. }, .. })
                if matches!(&func.expr, Expr::Ident(name) if name == AUTO_PRINT_NAME))
        };
        assert!(is_print(&nodes[0]));
        assert!(matches!(nodes[1], Node::Assign { .. }));
        assert!(is_print(&nodes[2]));
        assert!(matches!(nodes[3], Node::If { .. }));
    }

    #[test]
    fn builtins_occupy_fixed_slots() {
        let state = ReplState::new(&WriterProxy::default());
        let names = state.symbols.builtin_names();
        assert_eq!(names.first(), Some(&"len"));
        assert_eq!(names.len(), Builtin::iter().count());
        assert_eq!(state.symbols.global(AUTO_PRINT_NAME).map(|symbol| symbol.index), Some(0));
    }

    #[test]
    fn caller_context_is_swapped_out_after_eval() {
        let mut shell = Shell::new();
        let ctx = Context::background();
        ctx.cancel();
        shell
            .eval(&ctx, std::io::sink(), std::io::sink(), "1", std::io::empty())
            .unwrap();
        assert_eq!(shell.ctx.borrow().check(), Ok(()));

        let _ = shell.eval(&ctx, std::io::sink(), std::io::sink(), "1 / 0", std::io::empty());
        assert_eq!(shell.ctx.borrow().check(), Ok(()));
    }
}
