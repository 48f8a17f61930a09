//! Semantic analysis: best-effort type inference, name resolution and
//! closure capture analysis.
//!
//! The analyzer never aborts. Unknown types are `Any`, every problem is
//! recorded as a diagnostic and analysis carries on. Besides types it
//! records how every name resolves (`bindings`) and which assignments
//! introduce storage (`declarations`); lowering reads both instead of
//! tracking scopes a second time.

use std::collections::{HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, trace};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::builtins::BuiltinRegistry;
use crate::diagnostic::Diagnostic;
use crate::scope::{Binding, ScopeKind, ScopeStack, Symbol, variable_storage};
use crate::token::TokenKind;
use crate::types::{Basic, Type, merge_types, promote};

/// A captured name as seen from the closure's enclosing scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub binding: Binding,
    pub origin: Option<NodeId>,
}

/// Free variables of one closure, in first-use order.
pub type Captures = IndexMap<String, Capture>;

/// Storage introduced or reused by an assignment or declaration node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub storage: String,
    /// First write to this storage in its lexical scope.
    pub fresh: bool,
    pub global: bool,
}

/// How a named function definition is lowered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionPlan {
    /// Defined at file level: a plain function with a fixed symbol.
    Static { symbol: String },
    /// Defined inside a function or block: a closure value in `storage`.
    Closure { storage: String },
}

/// Everything the analyzer learned about one program.
#[derive(Debug, Default)]
pub struct Analysis {
    pub types: HashMap<NodeId, Type>,
    /// Resolution of identifier (and module member) nodes.
    pub bindings: HashMap<NodeId, Binding>,
    /// Declaring node of each resolved reference.
    pub origins: HashMap<NodeId, NodeId>,
    pub declarations: HashMap<NodeId, Declaration>,
    /// Capture lists keyed by lambda or nested function node.
    pub captures: HashMap<NodeId, Captures>,
    pub functions: HashMap<NodeId, FunctionPlan>,
    /// File-scope storage, in declaration order.
    pub globals: IndexSet<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Analysis {
    pub fn type_of(&self, id: NodeId) -> Type {
        self.types.get(&id).cloned().unwrap_or(Type::ANY)
    }

    pub fn captures_of(&self, id: NodeId) -> Option<&Captures> {
        self.captures.get(&id)
    }

    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Analyze the program rooted at `root`.
pub fn analyze(ast: &Ast, root: NodeId, builtins: &BuiltinRegistry) -> Analysis {
    let mut analyzer = Analyzer::new(ast, builtins);
    let ty = analyzer.statements(ast.children(root));
    analyzer.record(root, ty);
    let result = analyzer.result;
    debug!(
        typed = result.types.len(),
        closures = result.captures.len(),
        globals = result.globals.len(),
        diagnostics = result.diagnostics.len(),
        "analyzed program"
    );
    result
}

struct Analyzer<'a> {
    ast: &'a Ast,
    builtins: &'a BuiltinRegistry,
    scopes: ScopeStack,
    modules: HashMap<String, HashMap<String, Symbol>>,
    module_path: Vec<String>,
    result: Analysis,
}

impl<'a> Analyzer<'a> {
    fn new(ast: &'a Ast, builtins: &'a BuiltinRegistry) -> Self {
        Analyzer {
            ast,
            builtins,
            scopes: ScopeStack::new(),
            modules: HashMap::new(),
            module_path: Vec::new(),
            result: Analysis::default(),
        }
    }

    fn error(&mut self, node: NodeId, message: impl Into<String>) {
        let (line, column) = self.ast.position(node);
        let diagnostic = Diagnostic::type_error(line, column, message);
        if !self.result.diagnostics.contains(&diagnostic) {
            self.result.diagnostics.push(diagnostic);
        }
    }

    fn record(&mut self, node: NodeId, ty: Type) -> Type {
        self.result.types.insert(node, ty.clone());
        ty
    }

    fn module_prefix(&self) -> Option<String> {
        if self.module_path.is_empty() || !self.scopes.at_file_level() {
            None
        } else {
            Some(self.module_path.join("__"))
        }
    }

    fn variable_storage(&self, name: &str) -> String {
        variable_storage(self.module_prefix().as_deref(), name)
    }

    fn function_symbol(&self, name: &str) -> String {
        match self.module_prefix() {
            Some(prefix) => format!("quark_fn_{prefix}__{name}"),
            None => format!("quark_fn_{name}"),
        }
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    /// Predeclares the functions among `statements`, then analyzes each
    /// in order. Returns the type of the last one.
    fn statements(&mut self, statements: &'a [NodeId]) -> Type {
        for &stmt in statements {
            if self.ast.kind(stmt) == NodeKind::Function {
                self.predeclare(stmt);
            }
        }
        let mut last = Type::VOID;
        for &stmt in statements {
            last = self.statement(stmt);
        }
        last
    }

    fn block(&mut self, block: NodeId) -> Type {
        let ast = self.ast;
        self.scopes.push(ScopeKind::Block);
        let ty = self.statements(ast.children(block));
        self.scopes.pop();
        self.record(block, ty)
    }

    fn statement(&mut self, stmt: NodeId) -> Type {
        match self.ast.kind(stmt) {
            NodeKind::Function => self.function(stmt),
            NodeKind::Module => self.module(stmt),
            NodeKind::Use => self.use_decl(stmt),
            NodeKind::If => self.if_stmt(stmt),
            NodeKind::When => self.when(stmt),
            NodeKind::For => self.for_loop(stmt),
            NodeKind::While => self.while_loop(stmt),
            NodeKind::VarDecl => self.var_decl(stmt),
            NodeKind::Block => self.block(stmt),
            _ => self.expr(stmt),
        }
    }

    fn predeclare(&mut self, func: NodeId) {
        let ast = self.ast;
        let name = ast.literal(func).to_string();
        let params = ast
            .child(func, 0)
            .map(|params| {
                ast.children(params)
                    .iter()
                    .map(|&p| self.parameter_annotation(p).unwrap_or(Type::ANY))
                    .collect()
            })
            .unwrap_or_default();

        let existing = self.scopes.lookup_local(&name);
        let duplicate =
            existing.is_some_and(|s| !s.mutable && matches!(s.ty, Type::Function { .. }));
        let fresh = existing.is_none();
        if duplicate {
            self.error(func, format!("duplicate definition of '{name}'"));
        }

        let (plan, binding) = if self.scopes.at_file_level() {
            let symbol = self.function_symbol(&name);
            (
                FunctionPlan::Static {
                    symbol: symbol.clone(),
                },
                Binding::Function { symbol },
            )
        } else {
            let storage = variable_storage(None, &name);
            self.result.declarations.insert(
                func,
                Declaration {
                    storage: storage.clone(),
                    fresh,
                    global: false,
                },
            );
            (
                FunctionPlan::Closure {
                    storage: storage.clone(),
                },
                Binding::Variable {
                    storage,
                    global: false,
                },
            )
        };
        self.result.functions.insert(func, plan);
        self.scopes.define(Symbol {
            name,
            ty: Type::function(params, Type::ANY),
            mutable: false,
            binding,
            origin: Some(func),
        });
    }

    fn function(&mut self, func: NodeId) -> Type {
        let ast = self.ast;
        let name = ast.literal(func).to_string();
        let (Some(params), Some(body)) = (ast.child(func, 0), ast.child(func, 1)) else {
            return Type::VOID;
        };
        let is_closure = matches!(
            self.result.functions.get(&func),
            Some(FunctionPlan::Closure { .. })
        );

        self.scopes.push(ScopeKind::Function);
        if is_closure {
            let ty = self
                .scopes
                .lookup(&name)
                .map(|s| s.ty.clone())
                .unwrap_or(Type::ANY);
            self.scopes.define(Symbol {
                name: name.clone(),
                ty,
                mutable: false,
                binding: Binding::SelfClosure,
                origin: Some(func),
            });
        }
        let param_types = self.parameters(params);
        let ret = self.statements(ast.children(body));
        self.scopes.pop();

        let ty = Type::function(param_types, ret);
        if let Some(symbol) = self.scopes.lookup_mut(&name) {
            symbol.ty = ty.clone();
        }
        if is_closure {
            self.collect_captures(func);
        }
        self.record(func, ty);
        Type::VOID
    }

    fn parameter_annotation(&self, param: NodeId) -> Option<Type> {
        let annotation = self.ast.child(param, 0)?;
        self.annotation(annotation).ok()
    }

    /// Defines each parameter in the current scope and returns their types.
    fn parameters(&mut self, params: NodeId) -> Vec<Type> {
        let ast = self.ast;
        let mut types = Vec::new();
        for &param in ast.children(params) {
            let name = ast.literal(param).to_string();
            let ty = match ast.child(param, 0) {
                Some(annotation) => self.resolve_annotation(annotation),
                None => Type::ANY,
            };
            let storage = variable_storage(None, &name);
            self.result.declarations.insert(
                param,
                Declaration {
                    storage: storage.clone(),
                    fresh: true,
                    global: false,
                },
            );
            self.scopes.define(Symbol {
                name,
                ty: ty.clone(),
                mutable: true,
                binding: Binding::Variable {
                    storage,
                    global: false,
                },
                origin: Some(param),
            });
            types.push(self.record(param, ty));
        }
        types
    }

    fn annotation(&self, node: NodeId) -> Result<Type, String> {
        let ast = self.ast;
        let args: Vec<Type> = ast
            .children(node)
            .iter()
            .map(|&arg| self.annotation(arg))
            .collect::<Result<_, _>>()?;
        let arg = |n: usize| args.get(n).cloned().unwrap_or(Type::ANY);
        let ty = match ast.literal(node) {
            "list" => Type::list(arg(0)),
            "vector" => Type::vector(arg(0)),
            "dict" if args.len() >= 2 => Type::dict(arg(0), arg(1)),
            "dict" => Type::dict(Type::STR, arg(0)),
            other => Basic::from_name(other)
                .map(Type::Basic)
                .ok_or_else(|| format!("unknown type '{other}'"))?,
        };
        Ok(ty)
    }

    fn resolve_annotation(&mut self, node: NodeId) -> Type {
        match self.annotation(node) {
            Ok(ty) => ty,
            Err(message) => {
                self.error(node, message);
                Type::ANY
            }
        }
    }

    fn var_decl(&mut self, decl: NodeId) -> Type {
        let ast = self.ast;
        let (Some(annotation), Some(value)) = (ast.child(decl, 0), ast.child(decl, 1)) else {
            return Type::ANY;
        };
        let declared = self.resolve_annotation(annotation);
        let value_ty = self.expr(value);
        let name = ast.literal(decl).to_string();
        if !declared.can_assign(&value_ty) {
            self.error(
                value,
                format!("cannot assign value of type {value_ty} to '{name}' declared {declared}"),
            );
        }
        self.assign_name(decl, &name, declared.clone());
        self.record(decl, declared)
    }

    fn module(&mut self, module: NodeId) -> Type {
        let ast = self.ast;
        let name = ast.literal(module).to_string();
        if self.modules.contains_key(&name) {
            self.error(module, format!("duplicate definition of module '{name}'"));
        }
        self.scopes.define(Symbol {
            name: name.clone(),
            ty: Type::ANY,
            mutable: false,
            binding: Binding::Module,
            origin: Some(module),
        });

        self.scopes.push(ScopeKind::Module);
        self.module_path.push(name.clone());
        if let Some(body) = ast.child(module, 0) {
            self.statements(ast.children(body));
        }
        self.module_path.pop();
        let members = self
            .scopes
            .pop()
            .map(|scope| scope.into_symbols())
            .unwrap_or_default();
        debug!(module = %name, members = members.len(), "analyzed module");
        self.modules.insert(name, members);
        Type::VOID
    }

    fn use_decl(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let name = ast.literal(node).to_string();
        if ast.token(node).is_some_and(|t| t.kind == TokenKind::Str) {
            self.error(node, format!("unresolved import '{name}'"));
            return Type::VOID;
        }
        match self.modules.get(&name) {
            Some(members) => {
                let mut imported: Vec<Symbol> = members.values().cloned().collect();
                imported.sort_by(|a, b| a.name.cmp(&b.name));
                for symbol in imported {
                    self.scopes.define(symbol);
                }
            }
            None => self.error(node, format!("undefined module '{name}'")),
        }
        Type::VOID
    }

    fn if_stmt(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let children = ast.children(node);
        let mut branches = Vec::new();
        let mut has_else = false;

        if let [condition, then_block, rest @ ..] = children {
            self.expr(*condition);
            branches.push(self.block(*then_block));
            for &branch in rest {
                if ast.kind(branch) == NodeKind::If {
                    if let (Some(condition), Some(block)) = (ast.child(branch, 0), ast.child(branch, 1))
                    {
                        self.expr(condition);
                        let ty = self.block(block);
                        branches.push(self.record(branch, ty));
                    }
                } else {
                    has_else = true;
                    branches.push(self.block(branch));
                }
            }
        }
        if !has_else {
            branches.push(Type::NULL);
        }
        let ty = merge_types(branches);
        self.record(node, ty)
    }

    fn when(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let Some((&scrutinee, arms)) = ast.children(node).split_first() else {
            return Type::ANY;
        };
        self.expr(scrutinee);

        let mut results = Vec::new();
        let mut exhaustive = false;
        for &arm in arms {
            let Some((&result, alternatives)) = ast.children(arm).split_last() else {
                continue;
            };
            self.scopes.push(ScopeKind::Block);
            for &alt in alternatives {
                match ast.kind(alt) {
                    NodeKind::Wildcard => exhaustive = true,
                    NodeKind::ResultPattern => {
                        if let Some(bound) = ast.child(alt, 0)
                            && ast.kind(bound) == NodeKind::Identifier
                        {
                            let name = ast.literal(bound).to_string();
                            self.define_local(bound, &name, Type::ANY);
                        }
                    }
                    _ => {
                        self.expr(alt);
                    }
                }
            }
            let ty = if ast.kind(result) == NodeKind::Block {
                let ty = self.statements(ast.children(result));
                self.record(result, ty)
            } else {
                self.expr(result)
            };
            self.scopes.pop();
            results.push(self.record(arm, ty));
        }
        if !exhaustive {
            results.push(Type::NULL);
        }
        let ty = merge_types(results);
        self.record(node, ty)
    }

    fn for_loop(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let [variable, iterable, body] = ast.children(node) else {
            return Type::VOID;
        };
        let element = match self.expr(*iterable) {
            Type::List(elem) | Type::Vector(elem) => *elem,
            Type::Basic(Basic::Str) => Type::STR,
            _ => Type::ANY,
        };
        self.scopes.push(ScopeKind::Block);
        let name = ast.literal(*variable).to_string();
        self.define_local(*variable, &name, element);
        let ty = self.statements(ast.children(*body));
        self.record(*body, ty);
        self.scopes.pop();
        Type::VOID
    }

    fn while_loop(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        if let [condition, body] = ast.children(node) {
            self.expr(*condition);
            self.block(*body);
        }
        Type::VOID
    }

    /// Defines a fresh local (loop variable, pattern binding).
    fn define_local(&mut self, node: NodeId, name: &str, ty: Type) {
        let storage = variable_storage(None, name);
        self.result.declarations.insert(
            node,
            Declaration {
                storage: storage.clone(),
                fresh: true,
                global: false,
            },
        );
        let binding = Binding::Variable {
            storage,
            global: false,
        };
        self.result.bindings.insert(node, binding.clone());
        self.scopes.define(Symbol {
            name: name.to_string(),
            ty: ty.clone(),
            mutable: true,
            binding,
            origin: Some(node),
        });
        self.record(node, ty);
    }

    /// Assignment to a bare name: reuse visible storage or declare new
    /// storage in the current scope.
    fn assign_name(&mut self, target: NodeId, name: &str, ty: Type) {
        let existing = self
            .scopes
            .lookup(name)
            .map(|s| (s.binding.clone(), s.mutable, s.origin));
        match existing {
            Some((Binding::Variable { storage, global }, true, origin)) => {
                if let Some(symbol) = self.scopes.lookup_mut(name) {
                    symbol.ty = ty.clone();
                }
                self.result.declarations.insert(
                    target,
                    Declaration {
                        storage: storage.clone(),
                        fresh: false,
                        global,
                    },
                );
                self.result
                    .bindings
                    .insert(target, Binding::Variable { storage, global });
                if let Some(origin) = origin {
                    self.result.origins.insert(target, origin);
                }
            }
            Some(_) => {
                self.error(target, format!("cannot assign to '{name}'"));
            }
            None => {
                let global = self.scopes.at_file_level();
                let storage = self.variable_storage(name);
                if global {
                    self.result.globals.insert(storage.clone());
                }
                self.result.declarations.insert(
                    target,
                    Declaration {
                        storage: storage.clone(),
                        fresh: true,
                        global,
                    },
                );
                let binding = Binding::Variable { storage, global };
                self.result.bindings.insert(target, binding.clone());
                self.result.origins.insert(target, target);
                self.scopes.define(Symbol {
                    name: name.to_string(),
                    ty: ty.clone(),
                    mutable: true,
                    binding,
                    origin: Some(target),
                });
            }
        }
        self.record(target, ty);
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn expr(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let ty = match ast.kind(node) {
            NodeKind::Literal => literal_type(ast.token(node).map(|t| t.kind)),
            NodeKind::Identifier => self.identifier(node),
            NodeKind::Wildcard => Type::ANY,
            NodeKind::Operator => self.operator(node),
            NodeKind::FunctionCall => self.call(node, None),
            NodeKind::Pipe => self.pipe(node),
            NodeKind::Member => self.member(node),
            NodeKind::Index => self.index(node),
            NodeKind::Ternary => self.ternary(node),
            NodeKind::Lambda => self.lambda(node),
            NodeKind::List => self.list(node),
            NodeKind::Vector => self.vector(node),
            NodeKind::Dict => self.dict(node),
            NodeKind::ResultValue => {
                if let Some(value) = ast.child(node, 0) {
                    self.expr(value);
                }
                Type::ANY
            }
            NodeKind::Block => return self.block(node),
            NodeKind::If => return self.if_stmt(node),
            NodeKind::When => return self.when(node),
            other => {
                self.error(node, format!("unexpected {other:?} in expression"));
                Type::ANY
            }
        };
        self.record(node, ty)
    }

    fn identifier(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let name = ast.literal(node);
        if let Some(symbol) = self.scopes.lookup(name) {
            let ty = symbol.ty.clone();
            self.result.bindings.insert(node, symbol.binding.clone());
            if let Some(origin) = symbol.origin {
                self.result.origins.insert(node, origin);
            }
            return ty;
        }
        if let Some(builtin) = self.builtins.find(name) {
            self.result.bindings.insert(node, Binding::Builtin);
            return Type::function(vec![Type::ANY; builtin.min_arity], Type::ANY);
        }
        self.error(node, format!("undefined symbol '{name}'"));
        Type::ANY
    }

    fn operator(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let Some(token) = ast.token(node) else {
            return Type::ANY;
        };
        match ast.children(node) {
            [operand] => {
                let ty = self.expr(*operand);
                match token.kind {
                    TokenKind::Minus => {
                        if ty.is_any() || ty.is_numeric() || matches!(ty, Type::Vector(_)) {
                            ty
                        } else {
                            self.error(
                                node,
                                format!("unary '-' requires a numeric operand, got {ty}"),
                            );
                            Type::ANY
                        }
                    }
                    _ => Type::BOOL,
                }
            }
            [left, right] if token.kind == TokenKind::Assign => self.assignment(*left, *right),
            [left, right] => {
                let left_ty = self.expr(*left);
                let right_ty = self.expr(*right);
                match binary_type(token.kind, &token.literal, &left_ty, &right_ty) {
                    Ok(ty) => ty,
                    Err(message) => {
                        self.error(node, message);
                        Type::ANY
                    }
                }
            }
            _ => Type::ANY,
        }
    }

    fn assignment(&mut self, target: NodeId, value: NodeId) -> Type {
        let ast = self.ast;
        let ty = self.expr(value);
        match ast.kind(target) {
            NodeKind::Identifier => {
                let name = ast.literal(target).to_string();
                self.assign_name(target, &name, ty.clone());
            }
            NodeKind::Member => {
                self.member(target);
                self.record(target, ty.clone());
            }
            NodeKind::Index => {
                self.index(target);
                self.record(target, ty.clone());
            }
            _ => self.error(target, "invalid assignment target"),
        }
        ty
    }

    fn call(&mut self, call: NodeId, piped: Option<Type>) -> Type {
        let ast = self.ast;
        let (Some(callee), Some(arguments)) = (ast.child(call, 0), ast.child(call, 1)) else {
            return Type::ANY;
        };
        let args = ast.children(arguments);
        let offset = usize::from(piped.is_some());
        let mut arg_types: Vec<Type> = piped.into_iter().collect();
        for &arg in args {
            arg_types.push(self.expr(arg));
        }
        let type_name = (1usize)
            .checked_sub(offset)
            .and_then(|i| args.get(i))
            .filter(|&&arg| {
                ast.kind(arg) == NodeKind::Literal
                    && ast.token(arg).is_some_and(|t| t.kind == TokenKind::Str)
            })
            .map(|&arg| ast.literal(arg).to_string());
        let ty = self.apply(call, callee, &arg_types, type_name.as_deref());
        self.record(call, ty)
    }

    /// Types a call of `callee` with already-typed arguments.
    fn apply(
        &mut self,
        at: NodeId,
        callee: NodeId,
        args: &[Type],
        type_name: Option<&str>,
    ) -> Type {
        let ast = self.ast;
        if ast.kind(callee) == NodeKind::Identifier {
            let name = ast.literal(callee);
            if self.scopes.lookup(name).is_none()
                && let Some(builtin) = self.builtins.find(name)
            {
                self.result.bindings.insert(callee, Binding::Builtin);
                self.record(callee, Type::ANY);
                if let Err(message) = builtin.check_arity(args.len()) {
                    self.error(at, message);
                    return Type::ANY;
                }
                return match builtin.return_type(args, type_name) {
                    Ok(ty) => ty,
                    Err(message) => {
                        self.error(at, message);
                        Type::ANY
                    }
                };
            }
        }

        let callee_ty = self.expr(callee);
        match callee_ty {
            Type::Function { params, ret } => {
                let named = ast.kind(callee) == NodeKind::Identifier
                    && self
                        .scopes
                        .lookup(ast.literal(callee))
                        .is_some_and(|s| !s.mutable);
                if named && params.len() != args.len() {
                    self.error(
                        at,
                        format!(
                            "function '{}' expects {} arguments but got {}",
                            ast.literal(callee),
                            params.len(),
                            args.len()
                        ),
                    );
                }
                *ret
            }
            ty if ty.is_any() || matches!(ty, Type::Union(_)) => Type::ANY,
            ty => {
                self.error(at, format!("cannot call value of type {ty}"));
                Type::ANY
            }
        }
    }

    fn pipe(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let (Some(input), Some(target)) = (ast.child(node, 0), ast.child(node, 1)) else {
            return Type::ANY;
        };
        let input_ty = self.expr(input);
        match ast.kind(target) {
            NodeKind::FunctionCall => self.call(target, Some(input_ty)),
            NodeKind::Identifier | NodeKind::Member | NodeKind::Lambda => {
                self.apply(node, target, &[input_ty], None)
            }
            _ => {
                self.expr(target);
                self.error(target, "pipe target must be a function call");
                Type::ANY
            }
        }
    }

    fn member(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let member = ast.literal(node).to_string();
        let Some(object) = ast.child(node, 0) else {
            return Type::ANY;
        };

        if ast.kind(object) == NodeKind::Identifier {
            let name = ast.literal(object);
            let is_module = self
                .scopes
                .lookup(name)
                .is_some_and(|s| s.binding == Binding::Module);
            if is_module {
                self.result.bindings.insert(object, Binding::Module);
                self.record(object, Type::ANY);
                let found = self
                    .modules
                    .get(name)
                    .and_then(|members| members.get(&member))
                    .map(|s| (s.binding.clone(), s.ty.clone(), s.origin));
                return match found {
                    Some((binding, ty, origin)) => {
                        self.result.bindings.insert(node, binding);
                        if let Some(origin) = origin {
                            self.result.origins.insert(node, origin);
                        }
                        self.record(node, ty)
                    }
                    None => {
                        self.error(node, format!("module '{name}' has no member '{member}'"));
                        Type::ANY
                    }
                };
            }
        }

        let ty = match self.expr(object) {
            Type::Dict(_, value) => *value,
            ty if ty.is_any() || matches!(ty, Type::Union(_)) => Type::ANY,
            ty => {
                self.error(
                    node,
                    format!("cannot access member '{member}' on value of type {ty}"),
                );
                Type::ANY
            }
        };
        self.record(node, ty)
    }

    fn index(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let (Some(target), Some(index)) = (ast.child(node, 0), ast.child(node, 1)) else {
            return Type::ANY;
        };
        let target_ty = self.expr(target);
        self.expr(index);
        let ty = match target_ty {
            Type::List(elem) | Type::Vector(elem) => *elem,
            Type::Dict(_, value) => *value,
            Type::Basic(Basic::Str) => Type::STR,
            ty if ty.is_any() || matches!(ty, Type::Union(_)) => Type::ANY,
            ty => {
                self.error(node, format!("cannot index value of type {ty}"));
                Type::ANY
            }
        };
        self.record(node, ty)
    }

    fn ternary(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let [condition, then_value, else_value] = ast.children(node) else {
            return Type::ANY;
        };
        self.expr(*condition);
        let then_ty = self.expr(*then_value);
        let else_ty = self.expr(*else_value);
        merge_types([then_ty, else_ty])
    }

    fn lambda(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let (Some(params), Some(body)) = (ast.child(node, 0), ast.child(node, 1)) else {
            return Type::ANY;
        };
        self.scopes.push(ScopeKind::Lambda);
        let param_types = self.parameters(params);
        let ret = if ast.kind(body) == NodeKind::Block {
            let ty = self.statements(ast.children(body));
            self.record(body, ty)
        } else {
            self.expr(body)
        };
        self.scopes.pop();
        self.collect_captures(node);
        Type::function(param_types, ret)
    }

    fn list(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let elements: Vec<Type> = ast
            .children(node)
            .iter()
            .map(|&element| self.expr(element))
            .collect();
        if elements.is_empty() {
            return Type::list(Type::ANY);
        }
        Type::list(merge_types(elements))
    }

    fn vector(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let mut element: Option<Type> = None;
        for &child in ast.children(node) {
            let ty = self.expr(child);
            if ty.is_any() {
                continue;
            }
            match &element {
                None => element = Some(ty),
                Some(first) if *first != ty => {
                    self.error(
                        child,
                        format!("vector literal has heterogeneous element types {first} and {ty}"),
                    );
                    return Type::vector(Type::ANY);
                }
                Some(_) => {}
            }
        }
        match element {
            None => Type::vector(Type::ANY),
            Some(ty @ Type::Basic(Basic::Int | Basic::Float | Basic::Bool)) => Type::vector(ty),
            Some(ty) => {
                self.error(node, format!("vector elements must be numeric, got {ty}"));
                Type::vector(Type::ANY)
            }
        }
    }

    fn dict(&mut self, node: NodeId) -> Type {
        let ast = self.ast;
        let mut seen = HashSet::new();
        let mut values = Vec::new();
        for &entry in ast.children(node) {
            let key = ast.literal(entry);
            if !seen.insert(key) {
                self.error(entry, format!("duplicate dict key '{key}'"));
            }
            if let Some(value) = ast.child(entry, 0) {
                let ty = self.expr(value);
                values.push(self.record(entry, ty));
            }
        }
        if values.is_empty() {
            return Type::dict(Type::STR, Type::ANY);
        }
        Type::dict(Type::STR, merge_types(values))
    }

    // -----------------------------------------------------------------
    // Closure captures
    // -----------------------------------------------------------------

    /// Records the free variables of `closure`: resolved references inside
    /// its subtree whose declaration lies outside it. File-level variables
    /// count too; only functions with a fixed symbol, builtins and modules
    /// are reached without the environment. Parameters of nested closures
    /// sit inside the subtree, so a variable needed only by an inner
    /// closure is captured by every enclosing one as well.
    fn collect_captures(&mut self, closure: NodeId) {
        let ast = self.ast;
        let inside = subtree(ast, closure);
        let mut captures = Captures::new();
        let mut stack = vec![closure];
        let mut order = Vec::new();
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(ast.children(node).iter().rev());
        }
        for node in order {
            if ast.kind(node) != NodeKind::Identifier {
                continue;
            }
            let name = ast.literal(node);
            if captures.contains_key(name) {
                continue;
            }
            let Some(binding) = self.result.bindings.get(&node) else {
                continue;
            };
            let captured = match binding {
                Binding::Variable { .. } | Binding::SelfClosure => true,
                Binding::Function { .. } | Binding::Builtin | Binding::Module => false,
            };
            let origin = self.result.origins.get(&node).copied();
            if !captured || origin.is_some_and(|o| inside.contains(&o)) {
                continue;
            }
            captures.insert(
                name.to_string(),
                Capture {
                    binding: binding.clone(),
                    origin,
                },
            );
        }
        trace!(closure = closure.index(), captures = captures.len(), "captures");
        self.result.captures.insert(closure, captures);
    }
}

fn subtree(ast: &Ast, root: NodeId) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if seen.insert(node) {
            stack.extend_from_slice(ast.children(node));
        }
    }
    seen
}

fn literal_type(kind: Option<TokenKind>) -> Type {
    match kind {
        Some(TokenKind::Int) => Type::INT,
        Some(TokenKind::Float) => Type::FLOAT,
        Some(TokenKind::Str) => Type::STR,
        Some(TokenKind::True | TokenKind::False) => Type::BOOL,
        Some(TokenKind::Null) => Type::NULL,
        _ => Type::ANY,
    }
}

/// Result type of a binary operator, or the diagnostic message.
pub fn binary_type(op: TokenKind, symbol: &str, left: &Type, right: &Type) -> Result<Type, String> {
    let operands = || format!("got {left} and {right}");
    match op {
        TokenKind::Comma => Ok(right.clone()),
        TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash => {
            arithmetic(op, left, right)
                .ok_or_else(|| format!("operator '{symbol}' requires numeric operands, {}", operands()))
        }
        TokenKind::DoubleStar => {
            if left.is_any() || right.is_any() {
                Ok(Type::ANY)
            } else if left.is_numeric() && right.is_numeric() {
                Ok(promote(left, right))
            } else {
                Err(format!("operator '{symbol}' requires numeric operands, {}", operands()))
            }
        }
        TokenKind::Percent | TokenKind::Amper => {
            if left.is_any() || right.is_any() {
                Ok(Type::ANY)
            } else if *left == Type::INT && *right == Type::INT {
                Ok(Type::INT)
            } else {
                Err(format!("operator '{symbol}' requires integer operands, {}", operands()))
            }
        }
        TokenKind::DotDot => {
            let integral = |t: &Type| t.is_any() || *t == Type::INT;
            if integral(left) && integral(right) {
                Ok(Type::list(Type::INT))
            } else {
                Err(format!("operator '{symbol}' requires integer operands, {}", operands()))
            }
        }
        TokenKind::Lt | TokenKind::Lte | TokenKind::Gt | TokenKind::Gte => {
            let vector_operand = |t: &Type| matches!(t, Type::Vector(_)) || t.is_numeric();
            if left.is_any() || right.is_any() {
                Ok(Type::BOOL)
            } else if (matches!(left, Type::Vector(_)) || matches!(right, Type::Vector(_)))
                && vector_operand(left)
                && vector_operand(right)
            {
                Ok(Type::vector(Type::BOOL))
            } else if left.is_comparable() && right.is_comparable() {
                Ok(Type::BOOL)
            } else {
                Err(format!("operator '{symbol}' requires comparable operands, {}", operands()))
            }
        }
        TokenKind::Eq | TokenKind::NotEq => {
            if matches!(left, Type::Vector(_)) || matches!(right, Type::Vector(_)) {
                Ok(Type::vector(Type::BOOL))
            } else {
                Ok(Type::BOOL)
            }
        }
        TokenKind::And | TokenKind::Or => {
            if left.is_bool_like() && right.is_bool_like() {
                Ok(Type::BOOL)
            } else {
                Err(format!("operator '{symbol}' requires boolean operands, {}", operands()))
            }
        }
        _ => Ok(Type::ANY),
    }
}

fn arithmetic(op: TokenKind, left: &Type, right: &Type) -> Option<Type> {
    if left.is_any() || right.is_any() {
        return Some(Type::ANY);
    }
    let element = |a: &Type, b: &Type| -> Option<Type> {
        if a.is_any() || b.is_any() {
            Some(Type::ANY)
        } else if !a.is_numeric() || !b.is_numeric() {
            None
        } else if op == TokenKind::Slash {
            Some(Type::FLOAT)
        } else {
            Some(promote(a, b))
        }
    };
    match (left, right) {
        (Type::Vector(a), Type::Vector(b)) => element(a, b).map(Type::vector),
        (Type::Vector(a), scalar) | (scalar, Type::Vector(a)) => {
            element(a, scalar).map(Type::vector)
        }
        _ if left.is_numeric() && right.is_numeric() => Some(if op == TokenKind::Slash {
            Type::FLOAT
        } else {
            promote(left, right)
        }),
        _ if op == TokenKind::Plus && left.is_string() && right.is_string() => Some(Type::STR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    struct Analyzed {
        ast: Ast,
        root: NodeId,
        analysis: Analysis,
    }

    impl Analyzed {
        fn last(&self) -> Type {
            let last = *self.ast.children(self.root).last().expect("statement");
            self.analysis.type_of(last)
        }

        fn messages(&self) -> Vec<String> {
            self.analysis
                .diagnostics
                .iter()
                .map(|d| d.message.clone())
                .collect()
        }

        fn lambda_with_param(&self, param: &str) -> NodeId {
            let mut stack = vec![self.root];
            while let Some(id) = stack.pop() {
                let is_closure = matches!(self.ast.kind(id), NodeKind::Lambda | NodeKind::Function);
                let first_param = self
                    .ast
                    .child(id, 0)
                    .and_then(|params| self.ast.child(params, 0));
                if is_closure && first_param.is_some_and(|p| self.ast.literal(p) == param) {
                    return id;
                }
                stack.extend_from_slice(self.ast.children(id));
            }
            panic!("no closure with parameter {param}");
        }
    }

    fn analyzed(source: &str) -> Analyzed {
        let parsed = parse(tokenize(source));
        assert!(
            parsed.diagnostics.is_empty(),
            "parse errors: {:?}",
            parsed.diagnostics
        );
        let registry = BuiltinRegistry::standard();
        let analysis = analyze(&parsed.ast, parsed.root, &registry);
        Analyzed {
            ast: parsed.ast,
            root: parsed.root,
            analysis,
        }
    }

    fn assert_clean(source: &str) -> Analyzed {
        let result = analyzed(source);
        assert!(result.analysis.is_ok(), "unexpected errors: {:?}", result.messages());
        result
    }

    fn assert_error(source: &str, needle: &str) {
        let result = analyzed(source);
        let messages = result.messages();
        assert!(
            messages.iter().any(|m| m.contains(needle)),
            "expected an error containing {needle:?}, got {messages:?}"
        );
    }

    #[test]
    fn vector_literal_types() {
        assert_eq!(assert_clean("vector [1, 2, 3]\n").last(), Type::vector(Type::INT));
        assert_eq!(
            assert_clean("vector [1.0, 2.0]\n").last(),
            Type::vector(Type::FLOAT)
        );
        assert_error("vector [1, '2', 3]\n", "heterogeneous");
    }

    #[test]
    fn vector_division_promotes() {
        let prelude = "v = vector [1, 2]\nw = vector [3, 4]\n";
        assert_eq!(
            assert_clean(&format!("{prelude}v / w\n")).last(),
            Type::vector(Type::FLOAT)
        );
        assert_eq!(
            assert_clean(&format!("{prelude}v + 2\n")).last(),
            Type::vector(Type::INT)
        );
        assert_eq!(
            assert_clean(&format!("{prelude}v / 2\n")).last(),
            Type::vector(Type::FLOAT)
        );
        assert_eq!(
            assert_clean(&format!("{prelude}v * 1.5\n")).last(),
            Type::vector(Type::FLOAT)
        );
    }

    #[test]
    fn scalar_arithmetic_rules() {
        assert_eq!(assert_clean("1 + 2\n").last(), Type::INT);
        assert_eq!(assert_clean("1 + 2.0\n").last(), Type::FLOAT);
        assert_eq!(assert_clean("4 / 2\n").last(), Type::FLOAT);
        assert_eq!(assert_clean("'a' + 'b'\n").last(), Type::STR);
        assert_eq!(assert_clean("7 % 2\n").last(), Type::INT);
        assert_eq!(assert_clean("1 < 2\n").last(), Type::BOOL);
        assert_eq!(assert_clean("[1] == 2\n").last(), Type::BOOL);
        assert_error("[1] + 2\n", "requires numeric operands");
        assert_error("1.5 % 2\n", "requires integer operands");
        assert_error("[1] < 2\n", "requires comparable operands");
        assert_error("'a' and true\n", "requires boolean operands");
    }

    #[test]
    fn merges_poison_with_any() {
        let result = assert_clean("x = 1 if true else 'a'\n");
        assert_eq!(
            result.last(),
            merge_types([Type::INT, Type::STR]),
            "ternary merges both branches"
        );
        let result = assert_clean("x = 1 if true else (ok 2)\n");
        assert_eq!(result.last(), Type::ANY);
    }

    #[test]
    fn assignment_is_last_write_wins() {
        let result = assert_clean("x = 1\nif true:\n    x = 'a'\nx\n");
        assert_eq!(result.last(), Type::STR);
    }

    #[test]
    fn declarations_mark_fresh_storage() {
        let result = assert_clean("x = 1\nx = 2\n");
        let statements = result.ast.children(result.root);
        let first = result.ast.child(statements[0], 0).expect("target");
        let second = result.ast.child(statements[1], 0).expect("target");
        let decl = &result.analysis.declarations;
        assert_eq!(
            decl.get(&first),
            Some(&Declaration {
                storage: "quark_v_x".into(),
                fresh: true,
                global: true,
            })
        );
        assert_eq!(decl.get(&second).map(|d| d.fresh), Some(false));
        assert_eq!(result.analysis.globals.len(), 1);
    }

    #[test]
    fn when_without_wildcard_may_be_null() {
        let arms = "x = 2\nwhen x:\n    1 -> 'one'\n    2 or 3 -> 'few'\n";
        assert_eq!(
            assert_clean(arms).last(),
            merge_types([Type::NULL, Type::STR])
        );
        let exhaustive = format!("{arms}    _ -> 'many'\n");
        assert_eq!(assert_clean(&exhaustive).last(), Type::STR);
    }

    #[test]
    fn result_patterns_bind_locals() {
        assert_clean("r = ok 1\nwhen r:\n    ok v -> v\n    err e -> println(e)\n");
        assert_error(
            "r = ok 1\nwhen r:\n    ok v -> v\nprintln(v)\n",
            "undefined symbol 'v'",
        );
    }

    #[test]
    fn builtin_arity_is_checked() {
        assert_error("len()\n", "builtin 'len' expects");
        let result = analyzed("d = {a: 1}\ndget(d)\n");
        let messages = result.messages();
        assert!(
            messages.iter().any(|m| m.contains("'dget'")
                && m.contains("expects 2")
                && m.contains("got 1")),
            "{messages:?}"
        );
        assert_error("d = {a: 1}\ndget(d, 'a', 'b')\n", "got 3");
    }

    #[test]
    fn pipe_counts_the_piped_value() {
        assert_clean("d = {a: 1}\nd | dget 'a'\n");
        assert_clean("'a,b' | split ','\n");
        assert_clean("'abc' | upper\n");
        assert_error(
            "'a' | replace 'b'\n",
            "builtin 'replace' expects 3 arguments but got 2",
        );
        assert_error("1 | 2\n", "pipe target must be a function call");
    }

    #[test]
    fn builtin_calls_type_check() {
        assert_clean(
            "d = {a: 1, b: 2}\n\
             println(dget(d, 'a'))\n\
             parts = split('a,b', ',')\n\
             v = vector [1.0, 2.0, 3.0]\n\
             total = sum(v)\n\
             lo = min(v)\n\
             hi = max(v)\n\
             for i in to_vector(range(3)):\n    println(i)\n\
             println(type(v))\n\
             w = fillna(v, 0)\n\
             k = astype(v, 'i64')\n\
             c = cat_from_str(parts)\n\
             s = cat_to_str(c)\n",
        );
        assert_eq!(
            assert_clean("v = vector [1.0, 2.0]\nsum(v)\n").last(),
            Type::FLOAT
        );
        assert_error("to_vector(list [1, 2.0, 3])\n", "homogeneous numeric");
    }

    #[test]
    fn reports_semantic_errors() {
        assert_error("y = z + 1\n", "undefined symbol 'z'");
        assert_error("d = {a: 1, a: 2}\n", "duplicate dict key 'a'");
        assert_error("fn f() -> 1\nfn f() -> 2\n", "duplicate definition of 'f'");
        assert_error("x = 1\nx(2)\n", "cannot call value of type int");
        assert_error("x = 1\nx[0]\n", "cannot index value of type int");
        assert_error("n: int = 'a'\n", "cannot assign value of type str");
        assert_error("x: widget = 1\n", "unknown type 'widget'");
        assert_error("use nowhere\n", "undefined module 'nowhere'");
    }

    #[test]
    fn analysis_continues_after_errors() {
        let result = analyzed("a = missing\nb = [1] + 2\nc = {k: 1, k: 2}\n");
        assert_eq!(result.analysis.diagnostics.len(), 3, "{:?}", result.messages());
    }

    #[test]
    fn forward_references_between_functions() {
        let result = assert_clean(
            "fn even(n) -> n == 0 or odd(n - 1)\nfn odd(n) -> n != 0 and even(n - 1)\n",
        );
        let even = result.ast.children(result.root)[0];
        assert_eq!(
            result.analysis.functions.get(&even),
            Some(&FunctionPlan::Static {
                symbol: "quark_fn_even".into()
            })
        );
        assert_error("fn f(a, b) -> a\nf(1)\n", "function 'f' expects 2 arguments but got 1");
    }

    #[test]
    fn modules_resolve_members_and_imports() {
        let result = assert_clean(
            "module math:\n    fn double(x) -> x * 2\n    scale = 3\n\
             y = math.double(2)\nuse math\nz = double(scale)\n",
        );
        assert!(
            result
                .analysis
                .bindings
                .values()
                .any(|b| *b == Binding::Function {
                    symbol: "quark_fn_math__double".into()
                })
        );
        assert!(result.analysis.globals.contains("quark_v_math__scale"));
        assert_error(
            "module m:\n    a = 1\nm.b\n",
            "module 'm' has no member 'b'",
        );
    }

    #[test]
    fn captures_flow_through_enclosing_lambdas() {
        let result = assert_clean(
            "fn outer(a) ->\n    f = fn x ->\n        g = fn y -> a + x + y\n        g\n    f\n",
        );
        let f = result.lambda_with_param("x");
        let g = result.lambda_with_param("y");
        let f_captures: Vec<&str> = result
            .analysis
            .captures_of(f)
            .expect("f captures")
            .keys()
            .map(String::as_str)
            .collect();
        let g_captures: Vec<&str> = result
            .analysis
            .captures_of(g)
            .expect("g captures")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(f_captures, vec!["a"]);
        assert_eq!(g_captures, vec!["a", "x"]);
    }

    #[test]
    fn captures_include_file_level_variables() {
        let result = assert_clean(
            "total = 10\nfn run(n) ->\n    h = fn x ->\n        t = len(x)\n        t + n + total\n    h\n",
        );
        let h = result.lambda_with_param("x");
        let names: Vec<&str> = result
            .analysis
            .captures_of(h)
            .expect("h captures")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(names, vec!["n", "total"]);
    }

    #[test]
    fn captures_skip_builtins_functions_and_locals() {
        let result = assert_clean(
            "fn helper(v) -> v\nh = fn x ->\n    t = len(x)\n    helper(t) + 1\n",
        );
        let h = result.lambda_with_param("x");
        assert!(
            result
                .analysis
                .captures_of(h)
                .expect("h captures")
                .is_empty()
        );
    }

    #[test]
    fn nested_functions_become_closures() {
        let result = assert_clean("fn make(n) ->\n    fn add(x) -> x + n\n    add\n");
        let add = result.lambda_with_param("x");
        assert_eq!(
            result.analysis.functions.get(&add),
            Some(&FunctionPlan::Closure {
                storage: "quark_v_add".into()
            })
        );
        let names: Vec<&str> = result
            .analysis
            .captures_of(add)
            .expect("add captures")
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(names, vec!["n"]);
    }

    #[test]
    fn binary_rules_directly() {
        let v_int = Type::vector(Type::INT);
        assert_eq!(
            binary_type(TokenKind::Slash, "/", &v_int, &v_int),
            Ok(Type::vector(Type::FLOAT))
        );
        assert_eq!(
            binary_type(TokenKind::Lt, "<", &v_int, &Type::INT),
            Ok(Type::vector(Type::BOOL))
        );
        assert_eq!(
            binary_type(TokenKind::Plus, "+", &Type::ANY, &Type::list(Type::INT)),
            Ok(Type::ANY)
        );
        assert_eq!(
            binary_type(TokenKind::DotDot, "..", &Type::INT, &Type::INT),
            Ok(Type::list(Type::INT))
        );
    }
}
