//! Lexical scopes used by the analyzer.
//!
//! Scopes form a stack: the parent of each entry is the entry below it.
//! A scope lives exactly as long as the construct that opened it.

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::types::Type;

/// How a resolved name is reached in lowered code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A variable slot. `global` slots live at file scope.
    Variable { storage: String, global: bool },
    /// A function with a fixed symbol, callable directly.
    Function { symbol: String },
    /// The enclosing named closure referring to itself.
    SelfClosure,
    Builtin,
    Module,
}

/// Storage name of variable `name`, qualified by `module` at file level.
///
/// Variables carry their own prefix so a user name such as `fn_x` never
/// lands on a function symbol.
pub fn variable_storage(module: Option<&str>, name: &str) -> String {
    match module {
        Some(prefix) => format!("quark_v_{prefix}__{name}"),
        None => format!("quark_v_{name}"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    /// Last write wins; the analyzer is not flow-sensitive.
    pub ty: Type,
    pub mutable: bool,
    pub binding: Binding,
    /// Node that introduced the name, when it has one.
    pub origin: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Module,
    Function,
    Lambda,
    Block,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    symbols: HashMap<String, Symbol>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Scope {
            kind,
            symbols: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    pub fn into_symbols(self) -> HashMap<String, Symbol> {
        self.symbols
    }
}

#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![Scope::new(ScopeKind::Global)],
        }
    }

    pub fn push(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    /// Pops the innermost scope. The global scope is never popped.
    pub fn pop(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Defines `symbol` in the innermost scope, returning any symbol it
    /// replaced there.
    pub fn define(&mut self, symbol: Symbol) -> Option<Symbol> {
        let scope = self.innermost_mut();
        scope.symbols.insert(symbol.name.clone(), symbol)
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.symbols.get_mut(name))
    }

    pub fn lookup_local(&self, name: &str) -> Option<&Symbol> {
        self.scopes.last().and_then(|scope| scope.get(name))
    }

    /// True while only global and module scopes are open. Names defined
    /// here get file-scope storage.
    pub fn at_file_level(&self) -> bool {
        self.scopes
            .iter()
            .all(|scope| matches!(scope.kind, ScopeKind::Global | ScopeKind::Module))
    }

    fn innermost_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}
