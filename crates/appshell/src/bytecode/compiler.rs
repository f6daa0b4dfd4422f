//! Compiles parsed files to bytecode.
//!
//! The compiler works against a symbol table and constant pool handed in by
//! the caller and hands both back through [`Compiler::into_parts`], so a host
//! can compile successive fragments against one growing global namespace and
//! keep the previous state when a fragment fails to compile.

use std::{
    fmt, mem,
    path::{Path, PathBuf},
    rc::Rc,
};

use ahash::AHashMap;

use super::{
    builder::{CodeBuilder, JumpLabel},
    code::{Closure, Code},
    op::Opcode,
    symbols::{Symbol, SymbolScope, SymbolTable},
};
use crate::{
    expressions::{AssignOp, Block, Expr, ExprLoc, File, FuncLiteral, Identifier, Node, Operator},
    modules::ModuleMap,
    parse::{Pos, SourceFileSet, SourcePos, parse},
    value::Value,
};

/// Extension appended to file imports that do not carry one.
pub const SOURCE_FILE_EXT: &str = ".tengo";

/// Hidden local holding the iterator of a `for ... in` loop.
const ITERATOR_LOCAL: &str = ":it";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub pos: SourcePos,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compile Error: {}\n\tat {}", self.message, self.pos)
    }
}

impl std::error::Error for CompileError {}

type CompileResult<T = ()> = Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Main,
    Function,
    /// The body of an imported source module.
    Module,
}

#[derive(Debug, Default)]
struct Loop {
    breaks: Vec<JumpLabel>,
    continues: Vec<JumpLabel>,
}

#[derive(Debug)]
struct CompilationScope {
    builder: CodeBuilder,
    loops: Vec<Loop>,
    kind: ScopeKind,
}

impl CompilationScope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            builder: CodeBuilder::new(),
            loops: Vec::new(),
            kind,
        }
    }
}

/// One step of an `a.b[c] = v` assignment target.
enum Selector<'e> {
    Name(&'e str),
    Expr(&'e ExprLoc),
}

pub struct Compiler<'a> {
    file_set: &'a mut SourceFileSet,
    modules: &'a ModuleMap,
    symbols: SymbolTable,
    constants: Vec<Value>,
    scope: CompilationScope,
    /// Root directory for file imports; `None` disables them.
    import_dir: Option<PathBuf>,
    /// Directories of the source modules being compiled, innermost last.
    import_dirs: Vec<PathBuf>,
    /// Constant index of each module already compiled into the pool.
    module_cache: AHashMap<String, usize>,
    /// Source modules currently being compiled, for cycle detection.
    import_stack: Vec<String>,
}

impl<'a> Compiler<'a> {
    pub fn new(
        file_set: &'a mut SourceFileSet,
        symbols: SymbolTable,
        constants: Vec<Value>,
        modules: &'a ModuleMap,
    ) -> Self {
        Self {
            file_set,
            modules,
            symbols,
            constants,
            scope: CompilationScope::new(ScopeKind::Main),
            import_dir: None,
            import_dirs: Vec::new(),
            module_cache: AHashMap::new(),
            import_stack: Vec::new(),
        }
    }

    /// Lets `import("name")` fall back to `<dir>/name.tengo`.
    pub fn enable_file_import(&mut self, dir: impl Into<PathBuf>) {
        self.import_dir = Some(dir.into());
    }

    /// Compiles `file` as the main program.
    pub fn compile(&mut self, file: &File) -> CompileResult<Rc<Code>> {
        self.symbols.begin_main();
        self.scope = CompilationScope::new(ScopeKind::Main);
        self.compile_nodes(&file.nodes)?;
        let scope = mem::replace(&mut self.scope, CompilationScope::new(ScopeKind::Main));
        let code = scope.builder.build(self.symbols.main_locals(), 0, false);
        tracing::trace!(instructions = code.instructions().len(), constants = self.constants.len(), "compiled");
        Ok(Rc::new(code))
    }

    /// Hands back the symbol table and constant pool.
    #[must_use]
    pub fn into_parts(self) -> (SymbolTable, Vec<Value>) {
        (self.symbols, self.constants)
    }

    fn error(&self, pos: Pos, message: impl Into<String>) -> CompileError {
        CompileError {
            pos: self.file_set.position(pos),
            message: message.into(),
        }
    }

    fn emit(&mut self, pos: Pos, op: Opcode) {
        self.scope.builder.set_location(pos);
        self.scope.builder.emit(op);
    }

    fn emit_jump(&mut self, pos: Pos, op: Opcode) -> JumpLabel {
        self.scope.builder.set_location(pos);
        self.scope.builder.emit_jump(op)
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn emit_constant(&mut self, pos: Pos, value: Value) {
        let index = self.add_constant(value);
        self.emit(pos, Opcode::Constant(index));
    }

    fn compile_nodes(&mut self, nodes: &[Node]) -> CompileResult {
        nodes.iter().try_for_each(|node| self.compile_node(node))
    }

    fn compile_block(&mut self, block: &Block) -> CompileResult {
        self.symbols.enter_block();
        self.compile_nodes(&block.nodes)?;
        self.symbols.leave_block();
        Ok(())
    }

    fn compile_node(&mut self, node: &Node) -> CompileResult {
        match node {
            Node::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(expr.pos, Opcode::Pop);
            }
            Node::Assign { pos, lhs, op, rhs } => self.compile_assign(*pos, lhs, *op, rhs)?,
            Node::IncDec { pos, expr, inc } => {
                let op = if *inc { Operator::Add } else { Operator::Sub };
                let one = ExprLoc::new(*pos, Expr::Int(1));
                self.compile_assign(
                    *pos,
                    std::slice::from_ref(expr),
                    AssignOp::Compound(op),
                    std::slice::from_ref(&one),
                )?;
            }
            Node::Block(block) => self.compile_block(block)?,
            Node::If {
                pos,
                init,
                cond,
                body,
                orelse,
            } => self.compile_if(*pos, init.as_deref(), cond, body, orelse.as_deref())?,
            Node::For {
                pos,
                init,
                cond,
                post,
                body,
            } => self.compile_for(*pos, init.as_deref(), cond.as_ref(), post.as_deref(), body)?,
            Node::ForIn {
                pos,
                key,
                value,
                iterable,
                body,
            } => self.compile_for_in(*pos, key, value, iterable, body)?,
            Node::Break(pos) => {
                if self.scope.loops.is_empty() {
                    return Err(self.error(*pos, "break not allowed outside loop"));
                }
                let label = self.emit_jump(*pos, Opcode::Jump(0));
                if let Some(current) = self.scope.loops.last_mut() {
                    current.breaks.push(label);
                }
            }
            Node::Continue(pos) => {
                if self.scope.loops.is_empty() {
                    return Err(self.error(*pos, "continue not allowed outside loop"));
                }
                let label = self.emit_jump(*pos, Opcode::Jump(0));
                if let Some(current) = self.scope.loops.last_mut() {
                    current.continues.push(label);
                }
            }
            Node::Return { pos, value } => {
                if self.scope.kind == ScopeKind::Main {
                    return Err(self.error(*pos, "return not allowed outside function"));
                }
                match value {
                    Some(value) => {
                        self.compile_expr(value)?;
                        self.emit(*pos, Opcode::Return(true));
                    }
                    None => self.emit(*pos, Opcode::Return(false)),
                }
            }
            Node::Export { pos, value } => {
                if self.scope.kind == ScopeKind::Function {
                    return Err(self.error(*pos, "export not allowed inside function"));
                }
                self.compile_expr(value)?;
                self.emit(*pos, Opcode::Immutable);
                self.emit(*pos, Opcode::Return(true));
            }
        }
        Ok(())
    }

    fn compile_assign(&mut self, pos: Pos, lhs: &[ExprLoc], op: AssignOp, rhs: &[ExprLoc]) -> CompileResult {
        let ([target], [value]) = (lhs, rhs) else {
            return Err(self.error(pos, "tuple assignment not allowed"));
        };
        match op {
            AssignOp::Define => {
                let Expr::Ident(name) = &target.expr else {
                    return Err(self.error(target.pos, "operator ':=' not allowed with selector"));
                };
                self.compile_define(pos, name, value)
            }
            AssignOp::Assign | AssignOp::Compound(_) => self.compile_store(pos, target, op, value),
        }
    }

    fn compile_define(&mut self, pos: Pos, name: &str, value: &ExprLoc) -> CompileResult {
        if self.symbols.defined_in_current_scope(name) {
            return Err(self.error(pos, format!("'{name}' redeclared in this block")));
        }
        if matches!(value.expr, Expr::Func(_)) {
            // Defined before the body compiles so the function can call itself.
            let symbol = self.symbols.define(name);
            if symbol.scope == SymbolScope::Local {
                self.emit(pos, Opcode::Undefined);
                self.emit(pos, Opcode::DefineLocal(symbol.index));
            }
            self.compile_expr(value)?;
            self.emit_store(pos, &symbol)
        } else {
            self.compile_expr(value)?;
            let symbol = self.symbols.define(name);
            match symbol.scope {
                SymbolScope::Local => self.emit(pos, Opcode::DefineLocal(symbol.index)),
                _ => self.emit_store(pos, &symbol)?,
            }
            Ok(())
        }
    }

    fn compile_store(&mut self, pos: Pos, target: &ExprLoc, op: AssignOp, value: &ExprLoc) -> CompileResult {
        let mut selectors = Vec::new();
        let mut root = target;
        let name = loop {
            match &root.expr {
                Expr::Ident(name) => break name,
                Expr::Index { expr, index } => {
                    selectors.push(Selector::Expr(index));
                    root = expr;
                }
                Expr::Selector { expr, sel } => {
                    selectors.push(Selector::Name(sel));
                    root = expr;
                }
                Expr::Paren(inner) if selectors.is_empty() => root = inner,
                _ => return Err(self.error(target.pos, "invalid assignment target")),
            }
        };
        selectors.reverse();

        let symbol = self.resolve(root.pos, name)?;
        if symbol.reserved {
            return Err(self.error(root.pos, format!("cannot assign to reserved name '{name}'")));
        }
        if symbol.scope == SymbolScope::Builtin {
            return Err(self.error(root.pos, format!("cannot assign to builtin '{name}'")));
        }

        if let AssignOp::Compound(operator) = op {
            self.compile_expr(target)?;
            self.compile_expr(value)?;
            self.emit(pos, Opcode::Binary(operator));
        } else {
            self.compile_expr(value)?;
        }

        if selectors.is_empty() {
            return self.emit_store(pos, &symbol);
        }
        let count = selectors.len();
        for selector in selectors {
            match selector {
                Selector::Name(sel) => self.emit_constant(pos, Value::from(sel)),
                Selector::Expr(index) => self.compile_expr(index)?,
            }
        }
        let index = symbol.index;
        let op = match symbol.scope {
            SymbolScope::Global => Opcode::SetSelGlobal { index, selectors: count },
            SymbolScope::Local => Opcode::SetSelLocal { index, selectors: count },
            SymbolScope::Free => Opcode::SetSelFree { index, selectors: count },
            SymbolScope::Builtin => return Err(self.error(root.pos, format!("cannot assign to builtin '{name}'"))),
        };
        self.emit(pos, op);
        Ok(())
    }

    fn resolve(&mut self, pos: Pos, name: &str) -> CompileResult<Symbol> {
        self.symbols
            .resolve(name)
            .ok_or_else(|| self.error(pos, format!("unresolved reference '{name}'")))
    }

    fn emit_load(&mut self, pos: Pos, symbol: &Symbol) {
        let op = match symbol.scope {
            SymbolScope::Global => Opcode::GetGlobal(symbol.index),
            SymbolScope::Local => Opcode::GetLocal(symbol.index),
            SymbolScope::Builtin => Opcode::GetBuiltin(symbol.index),
            SymbolScope::Free => Opcode::GetFree(symbol.index),
        };
        self.emit(pos, op);
    }

    fn emit_store(&mut self, pos: Pos, symbol: &Symbol) -> CompileResult {
        let op = match symbol.scope {
            SymbolScope::Global => Opcode::SetGlobal(symbol.index),
            SymbolScope::Local => Opcode::SetLocal(symbol.index),
            SymbolScope::Free => Opcode::SetFree(symbol.index),
            SymbolScope::Builtin => {
                return Err(self.error(pos, format!("cannot assign to builtin '{}'", symbol.name)));
            }
        };
        self.emit(pos, op);
        Ok(())
    }

    fn compile_if(
        &mut self,
        pos: Pos,
        init: Option<&Node>,
        cond: &ExprLoc,
        body: &Block,
        orelse: Option<&Node>,
    ) -> CompileResult {
        self.symbols.enter_block();
        if let Some(init) = init {
            self.compile_node(init)?;
        }
        self.compile_expr(cond)?;
        let else_jump = self.emit_jump(pos, Opcode::JumpFalsy(0));
        self.compile_block(body)?;
        if let Some(orelse) = orelse {
            let end_jump = self.emit_jump(pos, Opcode::Jump(0));
            self.scope.builder.patch_jump(else_jump);
            self.compile_node(orelse)?;
            self.scope.builder.patch_jump(end_jump);
        } else {
            self.scope.builder.patch_jump(else_jump);
        }
        self.symbols.leave_block();
        Ok(())
    }

    fn compile_for(
        &mut self,
        pos: Pos,
        init: Option<&Node>,
        cond: Option<&ExprLoc>,
        post: Option<&Node>,
        body: &Block,
    ) -> CompileResult {
        self.symbols.enter_block();
        if let Some(init) = init {
            self.compile_node(init)?;
        }
        let start = self.scope.builder.current_offset();
        let exit = match cond {
            Some(cond) => {
                self.compile_expr(cond)?;
                Some(self.emit_jump(pos, Opcode::JumpFalsy(0)))
            }
            None => None,
        };

        self.scope.loops.push(Loop::default());
        self.compile_block(body)?;
        let body_loop = self.scope.loops.pop().unwrap_or_default();

        let post_start = self.scope.builder.current_offset();
        for label in body_loop.continues {
            self.scope.builder.patch_jump_to(label, post_start);
        }
        if let Some(post) = post {
            self.compile_node(post)?;
        }
        self.emit(pos, Opcode::Jump(start));

        if let Some(exit) = exit {
            self.scope.builder.patch_jump(exit);
        }
        for label in body_loop.breaks {
            self.scope.builder.patch_jump(label);
        }
        self.symbols.leave_block();
        Ok(())
    }

    fn compile_for_in(
        &mut self,
        pos: Pos,
        key: &Identifier,
        value: &Identifier,
        iterable: &ExprLoc,
        body: &Block,
    ) -> CompileResult {
        self.symbols.enter_block();
        self.compile_expr(iterable)?;
        self.emit(pos, Opcode::IteratorInit);
        let iterator = self.symbols.define(ITERATOR_LOCAL);
        self.emit(pos, Opcode::DefineLocal(iterator.index));

        let start = self.scope.builder.current_offset();
        self.emit(pos, Opcode::GetLocal(iterator.index));
        self.emit(pos, Opcode::IteratorNext);
        let exit = self.emit_jump(pos, Opcode::JumpFalsy(0));

        for (ident, op) in [(key, Opcode::IteratorKey), (value, Opcode::IteratorValue)] {
            if ident.name == "_" {
                continue;
            }
            let symbol = self.symbols.define(&ident.name);
            self.emit(ident.pos, Opcode::GetLocal(iterator.index));
            self.emit(ident.pos, op);
            self.emit(ident.pos, Opcode::DefineLocal(symbol.index));
        }

        self.scope.loops.push(Loop::default());
        self.compile_block(body)?;
        let body_loop = self.scope.loops.pop().unwrap_or_default();
        for label in body_loop.continues {
            self.scope.builder.patch_jump_to(label, start);
        }
        self.emit(pos, Opcode::Jump(start));

        self.scope.builder.patch_jump(exit);
        for label in body_loop.breaks {
            self.scope.builder.patch_jump(label);
        }
        self.symbols.leave_block();
        Ok(())
    }

    fn compile_expr(&mut self, expr: &ExprLoc) -> CompileResult {
        let pos = expr.pos;
        match &expr.expr {
            Expr::Ident(name) => {
                let symbol = self.resolve(pos, name)?;
                self.emit_load(pos, &symbol);
            }
            Expr::Int(value) => self.emit_constant(pos, Value::Int(*value)),
            Expr::Float(value) => self.emit_constant(pos, Value::Float(*value)),
            Expr::Bool(true) => self.emit(pos, Opcode::True),
            Expr::Bool(false) => self.emit(pos, Opcode::False),
            Expr::Char(value) => self.emit_constant(pos, Value::Char(*value)),
            Expr::String(value) => self.emit_constant(pos, Value::from(value.as_str())),
            Expr::Undefined => self.emit(pos, Opcode::Undefined),
            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(pos, Opcode::Array(items.len()));
            }
            Expr::Map(elements) => {
                for element in elements {
                    self.emit_constant(element.key_pos, Value::from(element.key.as_str()));
                    self.compile_expr(&element.value)?;
                }
                self.emit(pos, Opcode::Map(elements.len()));
            }
            Expr::Func(literal) => self.compile_function(pos, literal)?,
            Expr::Unary { op, operand } => {
                self.compile_expr(operand)?;
                self.emit(pos, Opcode::Unary(*op));
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                match op {
                    Operator::LAnd | Operator::LOr => {
                        let jump = if *op == Operator::LAnd {
                            Opcode::AndJump(0)
                        } else {
                            Opcode::OrJump(0)
                        };
                        let label = self.emit_jump(pos, jump);
                        self.compile_expr(rhs)?;
                        self.scope.builder.patch_jump(label);
                    }
                    _ => {
                        self.compile_expr(rhs)?;
                        self.emit(pos, Opcode::Binary(*op));
                    }
                }
            }
            Expr::Cond {
                cond,
                if_true,
                if_false,
            } => {
                self.compile_expr(cond)?;
                let else_jump = self.emit_jump(pos, Opcode::JumpFalsy(0));
                self.compile_expr(if_true)?;
                let end_jump = self.emit_jump(pos, Opcode::Jump(0));
                self.scope.builder.patch_jump(else_jump);
                self.compile_expr(if_false)?;
                self.scope.builder.patch_jump(end_jump);
            }
            Expr::Call { func, args, spread } => {
                self.compile_expr(func)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(
                    pos,
                    Opcode::Call {
                        args: args.len(),
                        spread: *spread,
                    },
                );
            }
            Expr::Index { expr: inner, index } => {
                self.compile_expr(inner)?;
                self.compile_expr(index)?;
                self.emit(pos, Opcode::Index);
            }
            Expr::Slice { expr: inner, low, high } => {
                self.compile_expr(inner)?;
                for bound in [low, high] {
                    match bound {
                        Some(bound) => self.compile_expr(bound)?,
                        None => self.emit(pos, Opcode::Undefined),
                    }
                }
                self.emit(pos, Opcode::Slice);
            }
            Expr::Selector { expr: inner, sel } => {
                self.compile_expr(inner)?;
                self.emit_constant(pos, Value::from(sel.as_str()));
                self.emit(pos, Opcode::Index);
            }
            Expr::Paren(inner) => self.compile_expr(inner)?,
            Expr::Import(name) => self.compile_import(pos, name)?,
            Expr::Error(inner) => {
                self.compile_expr(inner)?;
                self.emit(pos, Opcode::Error);
            }
            Expr::Immutable(inner) => {
                self.compile_expr(inner)?;
                self.emit(pos, Opcode::Immutable);
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, pos: Pos, literal: &FuncLiteral) -> CompileResult {
        self.symbols.enter_function();
        let outer = mem::replace(&mut self.scope, CompilationScope::new(ScopeKind::Function));
        let result = self.compile_function_body(literal);
        let scope = mem::replace(&mut self.scope, outer);
        let (num_locals, free) = self.symbols.leave_function();
        result?;

        let mut builder = scope.builder;
        // Jumps patched to the end of the body need an instruction to land on.
        builder.emit(Opcode::Return(false));
        let code = builder.build(num_locals, literal.params.len(), literal.varargs);
        let constant = self.add_constant(Value::Closure(Rc::new(Closure::new(Rc::new(code)))));

        if free.is_empty() {
            self.emit(pos, Opcode::Constant(constant));
            return Ok(());
        }
        for symbol in &free {
            let op = match symbol.scope {
                SymbolScope::Local => Opcode::GetLocalPtr(symbol.index),
                _ => Opcode::GetFreePtr(symbol.index),
            };
            self.emit(pos, op);
        }
        self.emit(
            pos,
            Opcode::Closure {
                constant,
                free: free.len(),
            },
        );
        Ok(())
    }

    fn compile_function_body(&mut self, literal: &FuncLiteral) -> CompileResult {
        for param in &literal.params {
            if self.symbols.defined_in_current_scope(&param.name) {
                return Err(self.error(param.pos, format!("'{}' redeclared in this block", param.name)));
            }
            self.symbols.define(&param.name);
        }
        self.compile_nodes(&literal.body.nodes)
    }

    fn compile_import(&mut self, pos: Pos, name: &str) -> CompileResult {
        if let Some(&constant) = self.module_cache.get(name) {
            return self.emit_module(pos, name, constant);
        }
        let modules = self.modules;
        match modules.get(name) {
            Some(attrs) => {
                let constant = self.add_constant(attrs.clone());
                self.module_cache.insert(name.to_owned(), constant);
                self.emit(pos, Opcode::Constant(constant));
                Ok(())
            }
            None => {
                let Some(path) = self.module_path(name) else {
                    return Err(self.error(pos, format!("module '{name}' not found")));
                };
                let key = path.to_string_lossy().into_owned();
                if let Some(&constant) = self.module_cache.get(&key) {
                    return self.emit_module(pos, &key, constant);
                }
                let source = std::fs::read_to_string(&path)
                    .map_err(|error| self.error(pos, format!("module file read error: {error}")))?;
                let dir = path.parent().map(Path::to_path_buf);
                self.compile_source_module(pos, &key, &source, dir)
            }
        }
    }

    /// Resolves a file import under the directory of the importing module,
    /// or the import root for the main program.
    fn module_path(&self, name: &str) -> Option<PathBuf> {
        let dir = self.import_dirs.last().or(self.import_dir.as_ref())?;
        let mut file = name.to_owned();
        if !file.ends_with(SOURCE_FILE_EXT) {
            file.push_str(SOURCE_FILE_EXT);
        }
        let path = dir.join(file);
        path.is_file().then_some(path)
    }

    fn emit_module(&mut self, pos: Pos, key: &str, constant: usize) -> CompileResult {
        if self.import_stack.iter().any(|open| open == key) {
            return Err(self.error(pos, format!("cyclic module import: {key}")));
        }
        self.emit(pos, Opcode::Constant(constant));
        if matches!(self.constants.get(constant), Some(Value::Closure(_))) {
            self.emit(pos, Opcode::Call { args: 0, spread: false });
        }
        Ok(())
    }

    /// Compiles a source module into a zero-argument function constant and
    /// emits a call to it; the call evaluates to the module's export.
    fn compile_source_module(&mut self, pos: Pos, key: &str, source: &str, dir: Option<PathBuf>) -> CompileResult {
        if self.import_stack.iter().any(|open| open == key) {
            return Err(self.error(pos, format!("cyclic module import: {key}")));
        }
        tracing::debug!(module = key, "compiling source module");
        let file = parse(self.file_set, key, source).map_err(|error| CompileError {
            pos: error.pos,
            message: error.message,
        })?;

        self.import_stack.push(key.to_owned());
        let pushed_dir = dir.is_some();
        if let Some(dir) = dir {
            self.import_dirs.push(dir);
        }
        let module_symbols = self.symbols.fork_builtins();
        let outer_symbols = mem::replace(&mut self.symbols, module_symbols);
        let outer_scope = mem::replace(&mut self.scope, CompilationScope::new(ScopeKind::Module));

        self.symbols.enter_function();
        let result = self.compile_nodes(&file.nodes);
        let (num_locals, _) = self.symbols.leave_function();

        let scope = mem::replace(&mut self.scope, outer_scope);
        self.symbols = outer_symbols;
        if pushed_dir {
            self.import_dirs.pop();
        }
        self.import_stack.pop();
        result?;

        let mut builder = scope.builder;
        builder.emit(Opcode::Return(false));
        let code = builder.build(num_locals, 0, false);
        let constant = self.add_constant(Value::Closure(Rc::new(Closure::new(Rc::new(code)))));
        self.module_cache.insert(key.to_owned(), constant);
        self.emit_module(pos, key, constant)
    }
}
