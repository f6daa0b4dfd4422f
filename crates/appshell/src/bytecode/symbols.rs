//! Scope-aware symbol table.
//!
//! Names resolve, innermost first, through the block scopes of the function
//! being compiled, the variables that function already captured, the
//! enclosing functions, the globals and finally the builtins. A name found
//! as a local of an enclosing function is captured: it is recorded as a free
//! variable of every function between the definition and the use.
//!
//! Only definitions at the top level of the main program (outside any block
//! or function) become globals. Global slots are assigned once and never
//! change, which is what lets the REPL compile successive fragments against
//! the same table.

use ahash::AHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    /// Reserved globals are defined by the host and cannot be assigned.
    pub reserved: bool,
}

impl Symbol {
    fn new(name: &str, scope: SymbolScope, index: usize) -> Self {
        Self {
            name: name.to_owned(),
            scope,
            index,
            reserved: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct FunctionScope {
    blocks: Vec<AHashMap<String, Symbol>>,
    /// Live locals across the open blocks.
    num_locals: usize,
    max_locals: usize,
    /// Symbols captured from enclosing functions, as resolved there.
    free: Vec<Symbol>,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    globals: AHashMap<String, Symbol>,
    /// Global names by slot index.
    global_names: Vec<String>,
    builtins: AHashMap<String, Symbol>,
    /// `functions[0]` is the main program; it has no open blocks at the top
    /// level.
    functions: Vec<FunctionScope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self {
            globals: AHashMap::new(),
            global_names: Vec::new(),
            builtins: AHashMap::new(),
            functions: vec![FunctionScope::default()],
        }
    }
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with the same builtins and no globals, used to compile
    /// imported modules in isolation.
    #[must_use]
    pub fn fork_builtins(&self) -> Self {
        Self {
            builtins: self.builtins.clone(),
            ..Self::default()
        }
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol::new(name, SymbolScope::Builtin, index);
        self.builtins.insert(name.to_owned(), symbol.clone());
        symbol
    }

    /// Defines a global that user code can read but never assign.
    pub fn define_reserved(&mut self, name: &str) -> Symbol {
        let mut symbol = self.define_global(name);
        symbol.reserved = true;
        self.globals.insert(name.to_owned(), symbol.clone());
        symbol
    }

    /// Defines `name` in the innermost scope.
    pub fn define(&mut self, name: &str) -> Symbol {
        if self.is_top_level() {
            return self.define_global(name);
        }
        let Some(function) = self.functions.last_mut() else {
            return self.define_global(name);
        };
        let symbol = Symbol::new(name, SymbolScope::Local, function.num_locals);
        function.num_locals += 1;
        function.max_locals = function.max_locals.max(function.num_locals);
        if let Some(block) = function.blocks.last_mut() {
            block.insert(name.to_owned(), symbol.clone());
        }
        symbol
    }

    fn define_global(&mut self, name: &str) -> Symbol {
        if let Some(existing) = self.globals.get(name) {
            return existing.clone();
        }
        let symbol = Symbol::new(name, SymbolScope::Global, self.global_names.len());
        self.global_names.push(name.to_owned());
        self.globals.insert(name.to_owned(), symbol.clone());
        symbol
    }

    /// Whether `name` is already defined in the innermost scope, which makes
    /// a `:=` of it a redeclaration.
    #[must_use]
    pub fn defined_in_current_scope(&self, name: &str) -> bool {
        if self.is_top_level() {
            return self.globals.contains_key(name);
        }
        self.functions
            .last()
            .and_then(|function| function.blocks.last())
            .is_some_and(|block| block.contains_key(name))
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        let level = self.functions.len().checked_sub(1)?;
        self.resolve_at(level, name)
    }

    fn resolve_at(&mut self, level: usize, name: &str) -> Option<Symbol> {
        let function = &self.functions[level];
        if let Some(symbol) = function.blocks.iter().rev().find_map(|block| block.get(name)) {
            return Some(symbol.clone());
        }
        if let Some(index) = function.free.iter().position(|symbol| symbol.name == name) {
            return Some(Symbol::new(name, SymbolScope::Free, index));
        }
        if level == 0 {
            return self.globals.get(name).or_else(|| self.builtins.get(name)).cloned();
        }

        let outer = self.resolve_at(level - 1, name)?;
        match outer.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(outer),
            SymbolScope::Local | SymbolScope::Free => {
                let free = &mut self.functions[level].free;
                free.push(outer);
                Some(Symbol::new(name, SymbolScope::Free, free.len() - 1))
            }
        }
    }

    /// True outside of any block and function of the main program.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.functions.len() == 1 && self.functions[0].blocks.is_empty()
    }

    pub fn enter_block(&mut self) {
        if let Some(function) = self.functions.last_mut() {
            function.blocks.push(AHashMap::new());
        }
    }

    pub fn leave_block(&mut self) {
        if let Some(function) = self.functions.last_mut() {
            if let Some(block) = function.blocks.pop() {
                function.num_locals -= block.len();
            }
        }
    }

    pub fn enter_function(&mut self) {
        self.functions.push(FunctionScope {
            blocks: vec![AHashMap::new()],
            ..FunctionScope::default()
        });
    }

    /// Closes the innermost function, returning its local slot count and the
    /// symbols it captured (as resolved in the enclosing function).
    pub fn leave_function(&mut self) -> (usize, Vec<Symbol>) {
        if self.functions.len() <= 1 {
            return (0, Vec::new());
        }
        let function = self.functions.pop().unwrap_or_default();
        (function.max_locals, function.free)
    }

    /// Clears the main program's block state before compiling a new
    /// fragment. Leftovers only exist after a compilation that failed midway.
    pub fn begin_main(&mut self) {
        self.functions.truncate(1);
        if let Some(main) = self.functions.first_mut() {
            *main = FunctionScope::default();
        }
    }

    /// Local slots the main program needs for its block-scoped variables.
    #[must_use]
    pub fn main_locals(&self) -> usize {
        self.functions.first().map_or(0, |main| main.max_locals)
    }

    /// Number of global slots assigned so far.
    #[must_use]
    pub fn num_globals(&self) -> usize {
        self.global_names.len()
    }

    /// Global symbols in slot order.
    pub fn globals(&self) -> impl Iterator<Item = &Symbol> {
        self.global_names.iter().filter_map(|name| self.globals.get(name))
    }

    #[must_use]
    pub fn global(&self, name: &str) -> Option<&Symbol> {
        self.globals.get(name)
    }

    /// Builtin names in index order.
    #[must_use]
    pub fn builtin_names(&self) -> Vec<&str> {
        let mut symbols: Vec<&Symbol> = self.builtins.values().collect();
        symbols.sort_by_key(|symbol| symbol.index);
        symbols.iter().map(|symbol| symbol.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_definitions_are_stable_globals() {
        let mut table = SymbolTable::new();
        let a = table.define("a");
        let b = table.define("b");
        assert_eq!((a.scope, a.index), (SymbolScope::Global, 0));
        assert_eq!(b.index, 1);
        assert_eq!(table.define("a").index, 0);
        assert_eq!(table.num_globals(), 2);
    }

    #[test]
    fn nested_function_captures_through_intermediate_scope() {
        let mut table = SymbolTable::new();
        table.enter_function();
        let x = table.define("x");
        assert_eq!(x.scope, SymbolScope::Local);
        table.enter_function();
        table.enter_function();
        let inner = table.resolve("x").unwrap();
        assert_eq!(inner.scope, SymbolScope::Free);
        let (_, innermost_free) = table.leave_function();
        assert_eq!(innermost_free[0].scope, SymbolScope::Free);
        let (_, middle_free) = table.leave_function();
        assert_eq!(middle_free[0].scope, SymbolScope::Local);
    }

    #[test]
    fn sibling_blocks_reuse_local_slots() {
        let mut table = SymbolTable::new();
        table.enter_block();
        assert_eq!(table.define("a").scope, SymbolScope::Local);
        table.leave_block();
        table.enter_block();
        assert_eq!(table.define("b").index, 0);
        table.leave_block();
        assert_eq!(table.main_locals(), 1);
        assert!(table.resolve("a").is_none());
    }
}
