//! Lowering of an analyzed program to C++ text.
//!
//! A single pass over the AST driven by the analyzer's side tables:
//! `bindings` say how each name is reached, `declarations` say whether an
//! assignment introduces storage, and capture lists shape closure
//! environments. Every runtime symbol comes from a [`ValueAbi`].
//!
//! Lowering never fails. Whatever it cannot express degrades to the null
//! value and is reported with `warn!`.

use std::collections::HashMap;
use std::fmt::Write as _;

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::abi::{BinaryOp, UnaryOp, ValueAbi};
use crate::analyzer::{Analysis, Captures, FunctionPlan};
use crate::ast::{Ast, NodeId, NodeKind};
use crate::builtins::BuiltinRegistry;
use crate::scope::{Binding, variable_storage};
use crate::token::TokenKind;
use crate::types::Type;

const INDENT: &str = "    ";

/// Lower the program rooted at `root` into a complete translation unit
/// whose entry function is `entry_name`.
pub fn lower<A: ValueAbi>(
    ast: &Ast,
    root: NodeId,
    analysis: &Analysis,
    builtins: &BuiltinRegistry,
    abi: &A,
    entry_name: &str,
) -> String {
    let mut lowering = Lowering::new(ast, analysis, builtins, abi);
    lowering.current.indent = 1;
    lowering.line(format!("{};", abi.runtime_init()));
    lowering.statements(ast.children(root), false);
    lowering.line("return 0;");
    let main = std::mem::take(&mut lowering.current);
    lowering.finish(main, entry_name)
}

/// A nested named function whose value exists before its definition runs.
#[derive(Debug)]
struct HoistedClosure {
    symbol: String,
    /// Environment to fill at the definition; `None` without captures.
    env: Option<String>,
}

/// Output of one function body under construction.
#[derive(Debug, Default)]
struct Frame<'a> {
    lines: Vec<String>,
    indent: usize,
    /// Capture list of the closure being lowered; `None` outside closures.
    captures: Option<&'a Captures>,
}

struct Lowering<'a, A: ValueAbi> {
    ast: &'a Ast,
    analysis: &'a Analysis,
    builtins: &'a BuiltinRegistry,
    abi: &'a A,
    current: Frame<'a>,
    outer: Vec<Frame<'a>>,
    forward: Vec<String>,
    definitions: Vec<String>,
    /// Builtins used as values, with the arity of their wrapper.
    wrappers: IndexMap<String, usize>,
    hoisted: HashMap<NodeId, HoistedClosure>,
    temps: usize,
    lambdas: usize,
    closures: usize,
}

impl<'a, A: ValueAbi> Lowering<'a, A> {
    fn new(
        ast: &'a Ast,
        analysis: &'a Analysis,
        builtins: &'a BuiltinRegistry,
        abi: &'a A,
    ) -> Self {
        Lowering {
            ast,
            analysis,
            builtins,
            abi,
            current: Frame::default(),
            outer: Vec::new(),
            forward: Vec::new(),
            definitions: Vec::new(),
            wrappers: IndexMap::new(),
            hoisted: HashMap::new(),
            temps: 0,
            lambdas: 0,
            closures: 0,
        }
    }

    fn finish(mut self, main: Frame<'a>, entry_name: &str) -> String {
        self.builtin_wrappers();
        let abi = self.abi;
        let mut out = String::new();
        for line in abi.prelude() {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');

        if !self.analysis.globals.is_empty() {
            for global in &self.analysis.globals {
                let _ = writeln!(out, "static {} {global} = {};", abi.value_type(), abi.null());
            }
            out.push('\n');
        }
        if !self.forward.is_empty() {
            for declaration in &self.forward {
                out.push_str(declaration);
                out.push('\n');
            }
            out.push('\n');
        }
        for definition in &self.definitions {
            out.push_str(definition);
            out.push_str("\n\n");
        }

        let _ = writeln!(out, "int {entry_name}() {{");
        for line in &main.lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("}\n");

        debug!(
            functions = self.definitions.len(),
            lambdas = self.lambdas,
            temps = self.temps,
            bytes = out.len(),
            "lowered program"
        );
        out
    }

    // -----------------------------------------------------------------
    // Output helpers
    // -----------------------------------------------------------------

    fn line(&mut self, text: impl AsRef<str>) {
        let pad = INDENT.repeat(self.current.indent);
        self.current.lines.push(format!("{pad}{}", text.as_ref()));
    }

    fn temp(&mut self) -> String {
        let name = format!("_t{}", self.temps);
        self.temps += 1;
        name
    }

    /// Stores `value` in a fresh temporary and returns its name.
    fn bind(&mut self, value: &str) -> String {
        let name = self.temp();
        self.line(format!("{} {name} = {value};", self.abi.value_type()));
        name
    }

    /// Temporary initialised to null, used to collect a branch result.
    fn result_slot(&mut self) -> String {
        let null = self.abi.null();
        self.bind(&null)
    }

    fn enter(&mut self, frame: Frame<'a>) {
        let outer = std::mem::replace(&mut self.current, frame);
        self.outer.push(outer);
    }

    fn leave(&mut self) -> Frame<'a> {
        let restored = self.outer.pop().unwrap_or_default();
        std::mem::replace(&mut self.current, restored)
    }

    /// Runs `f` with an empty line buffer and returns the lines it
    /// emitted alongside its result.
    fn detached<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> (Vec<String>, R) {
        let saved = std::mem::take(&mut self.current.lines);
        let value = f(self);
        let emitted = std::mem::replace(&mut self.current.lines, saved);
        (emitted, value)
    }

    fn push_indented(&mut self, lines: Vec<String>) {
        for line in lines {
            self.current.lines.push(format!("{INDENT}{line}"));
        }
    }

    fn is_vector(&self, node: NodeId) -> bool {
        matches!(self.analysis.type_of(node), Type::Vector(_))
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    /// Lowers `statements` in order. With `want`, returns the value of the
    /// last one; otherwise null.
    fn statements(&mut self, statements: &'a [NodeId], want: bool) -> String {
        self.hoist_closures(statements);
        let mut value = self.abi.null();
        let last = statements.len().saturating_sub(1);
        for (i, &stmt) in statements.iter().enumerate() {
            let lowered = self.statement(stmt, want && i == last);
            if i == last {
                value = lowered;
            }
        }
        value
    }

    /// Allocates every closure-valued function of the block ahead of its
    /// first statement, so siblings can call each other in any order.
    /// Capture slots stay empty until the definition itself is reached.
    fn hoist_closures(&mut self, statements: &[NodeId]) {
        let ast = self.ast;
        let analysis = self.analysis;
        let abi = self.abi;
        for &stmt in statements {
            let Some(FunctionPlan::Closure { storage }) = analysis.functions.get(&stmt) else {
                continue;
            };
            let symbol = format!("quark_closure_{}_{}", ast.literal(stmt), self.closures);
            self.closures += 1;
            let count = analysis.captures_of(stmt).map_or(0, |c| c.len());
            let (env, value) = if count == 0 {
                (None, abi.function_value(&symbol))
            } else {
                let env = self.temp();
                self.line(format!(
                    "{} {env} = {};",
                    abi.env_type(),
                    abi.alloc_closure(&symbol, count)
                ));
                let value = abi.closure_value(&env);
                (Some(env), value)
            };
            if analysis.declarations.get(&stmt).is_some_and(|d| d.fresh) {
                self.line(format!("{} {storage} = {value};", abi.value_type()));
            } else {
                self.line(format!("{storage} = {value};"));
            }
            self.hoisted.insert(stmt, HoistedClosure { symbol, env });
        }
    }

    fn statement(&mut self, stmt: NodeId, want: bool) -> String {
        let ast = self.ast;
        match ast.kind(stmt) {
            NodeKind::Function => {
                self.function(stmt);
                self.abi.null()
            }
            NodeKind::Module => {
                if let Some(body) = ast.child(stmt, 0) {
                    self.statements(ast.children(body), false);
                }
                self.abi.null()
            }
            NodeKind::Use => self.abi.null(),
            NodeKind::For => {
                self.for_loop(stmt);
                self.abi.null()
            }
            NodeKind::While => {
                self.while_loop(stmt);
                self.abi.null()
            }
            NodeKind::If => self.if_chain(stmt, want),
            NodeKind::When => self.when(stmt, want),
            NodeKind::Block => self.nested_block(stmt, want),
            _ => {
                let value = self.expr(stmt);
                if want {
                    return value;
                }
                if !is_silent(ast, stmt) {
                    self.line(format!("{value};"));
                }
                self.abi.null()
            }
        }
    }

    fn nested_block(&mut self, block: NodeId, want: bool) -> String {
        let ast = self.ast;
        let result = want.then(|| self.result_slot());
        self.line("{");
        self.current.indent += 1;
        let value = self.statements(ast.children(block), want);
        if let Some(result) = &result {
            self.line(format!("{result} = {value};"));
        }
        self.current.indent -= 1;
        self.line("}");
        result.unwrap_or_else(|| self.abi.null())
    }

    fn function(&mut self, func: NodeId) {
        let ast = self.ast;
        let analysis = self.analysis;
        let (Some(params), Some(body)) = (ast.child(func, 0), ast.child(func, 1)) else {
            return;
        };
        match analysis.functions.get(&func) {
            Some(FunctionPlan::Static { symbol }) => {
                self.define(symbol, params, body, None);
            }
            Some(FunctionPlan::Closure { storage }) => {
                let captures = analysis.captures_of(func);
                let Some(hoisted) = self.hoisted.remove(&func) else {
                    let symbol = format!("quark_closure_{}_{}", ast.literal(func), self.closures);
                    self.closures += 1;
                    self.define(&symbol, params, body, captures);
                    let value = self.closure_value(&symbol, captures);
                    self.line(format!("{storage} = {value};"));
                    return;
                };
                self.define(&hoisted.symbol, params, body, captures);
                if let (Some(env), Some(captures)) = (hoisted.env, captures) {
                    self.fill_captures(&env, captures);
                }
            }
            None => warn!(function = ast.literal(func), "function without a plan skipped"),
        }
    }

    /// Emits a function definition with the uniform closure signature.
    fn define(
        &mut self,
        symbol: &str,
        params: NodeId,
        body: NodeId,
        captures: Option<&'a Captures>,
    ) {
        let ast = self.ast;
        let analysis = self.analysis;
        let abi = self.abi;
        let mut signature = format!(
            "{} {symbol}({} {}",
            abi.value_type(),
            abi.env_type(),
            abi.env_param()
        );
        for &param in ast.children(params) {
            let storage = analysis
                .declarations
                .get(&param)
                .map(|d| d.storage.clone())
                .unwrap_or_else(|| variable_storage(None, ast.literal(param)));
            let _ = write!(signature, ", {} {storage}", abi.value_type());
        }
        signature.push(')');
        trace!(
            symbol,
            captures = captures.map_or(0, |c| c.len()),
            "lowering function"
        );

        self.enter(Frame {
            lines: Vec::new(),
            indent: 1,
            captures,
        });
        let value = if ast.kind(body) == NodeKind::Block {
            self.statements(ast.children(body), true)
        } else {
            self.expr(body)
        };
        self.line(format!("return {value};"));
        let frame = self.leave();

        self.forward.push(format!("{signature};"));
        let mut definition = format!("{signature} {{\n");
        for line in frame.lines {
            definition.push_str(&line);
            definition.push('\n');
        }
        definition.push('}');
        self.definitions.push(definition);
    }

    /// Function value for `symbol`, allocating an environment filled with
    /// the current values of `captures` when there are any.
    fn closure_value(&mut self, symbol: &str, captures: Option<&'a Captures>) -> String {
        let abi = self.abi;
        let Some(captures) = captures.filter(|c| !c.is_empty()) else {
            return abi.function_value(symbol);
        };
        let env = self.temp();
        self.line(format!(
            "{} {env} = {};",
            abi.env_type(),
            abi.alloc_closure(symbol, captures.len())
        ));
        self.fill_captures(&env, captures);
        trace!(symbol, captures = captures.len(), "allocated closure");
        abi.closure_value(&env)
    }

    /// Copies the current value of each captured name into `env`.
    fn fill_captures(&mut self, env: &str, captures: &'a Captures) {
        let abi = self.abi;
        for (index, (name, capture)) in captures.iter().enumerate() {
            let value = self.load(name, Some(&capture.binding), capture.origin);
            self.line(format!("{} = {value};", abi.capture_slot(env, index)));
        }
    }

    fn for_loop(&mut self, node: NodeId) {
        let ast = self.ast;
        let abi = self.abi;
        let [variable, iterable, body] = ast.children(node) else {
            return;
        };
        let storage = self
            .analysis
            .declarations
            .get(variable)
            .map(|d| d.storage.clone())
            .unwrap_or_else(|| variable_storage(None, ast.literal(*variable)));
        let native = abi.native_int_type();

        if let Some((start, end)) = self.range_bounds(*iterable) {
            let (first, limit, counter) = (self.temp(), self.temp(), self.temp());
            self.line(format!("{native} {first} = {};", abi.native_int(&start)));
            self.line(format!("{native} {limit} = {};", abi.native_int(&end)));
            self.line(format!(
                "for ({native} {counter} = {first}; {counter} < {limit}; {counter}++) {{"
            ));
            self.current.indent += 1;
            self.line(format!(
                "{} {storage} = {};",
                abi.value_type(),
                abi.int(&counter)
            ));
        } else {
            let value = self.expr(*iterable);
            let items = self.bind(&value);
            let counter = self.temp();
            let length = abi.native_int(&abi.length(&items));
            self.line(format!(
                "for ({native} {counter} = 0; {counter} < {length}; {counter}++) {{"
            ));
            self.current.indent += 1;
            self.line(format!(
                "{} {storage} = {};",
                abi.value_type(),
                abi.iter_get(&items, &abi.int(&counter))
            ));
        }
        self.statements(ast.children(*body), false);
        self.current.indent -= 1;
        self.line("}");
    }

    /// Bounds of `a .. b`, `range(n)` or `range(a, b)`, lowered.
    fn range_bounds(&mut self, iterable: NodeId) -> Option<(String, String)> {
        let ast = self.ast;
        match ast.kind(iterable) {
            NodeKind::Operator
                if ast.token(iterable).is_some_and(|t| t.kind == TokenKind::DotDot) =>
            {
                let [start, end] = ast.children(iterable) else {
                    return None;
                };
                let start = self.expr(*start);
                let end = self.expr(*end);
                Some((start, end))
            }
            NodeKind::FunctionCall => {
                let callee = ast.child(iterable, 0)?;
                let arguments = ast.child(iterable, 1)?;
                let is_range = ast.literal(callee) == "range"
                    && self.analysis.bindings.get(&callee) == Some(&Binding::Builtin);
                if !is_range {
                    return None;
                }
                match ast.children(arguments) {
                    [end] => {
                        let end = self.expr(*end);
                        Some((self.abi.int("0"), end))
                    }
                    [start, end] => {
                        let start = self.expr(*start);
                        let end = self.expr(*end);
                        Some((start, end))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn while_loop(&mut self, node: NodeId) {
        let ast = self.ast;
        let abi = self.abi;
        let [condition, body] = ast.children(node) else {
            return;
        };
        let (setup, condition) = self.detached(|this| this.expr(*condition));
        if setup.is_empty() {
            self.line(format!("while ({}) {{", abi.truthy_test(&condition)));
        } else {
            self.line("while (true) {");
            self.push_indented(setup);
            let pad = INDENT.repeat(self.current.indent + 1);
            self.current
                .lines
                .push(format!("{pad}if (!{}) break;", abi.truthy_test(&condition)));
        }
        self.current.indent += 1;
        self.statements(ast.children(*body), false);
        self.current.indent -= 1;
        self.line("}");
    }

    // -----------------------------------------------------------------
    // Branching
    // -----------------------------------------------------------------

    fn if_chain(&mut self, node: NodeId, want: bool) -> String {
        let ast = self.ast;
        let abi = self.abi;
        let [condition, then_block, rest @ ..] = ast.children(node) else {
            return abi.null();
        };
        let result = want.then(|| self.result_slot());
        let condition = self.expr(*condition);
        self.line(format!("if ({}) {{", abi.truthy_test(&condition)));
        self.branch(*then_block, result.as_deref());

        let mut nested = 0;
        for &branch in rest {
            if ast.kind(branch) == NodeKind::If {
                let (Some(condition), Some(block)) = (ast.child(branch, 0), ast.child(branch, 1))
                else {
                    continue;
                };
                let (setup, condition) = self.detached(|this| this.expr(condition));
                self.open_else_if(setup, &abi.truthy_test(&condition), &mut nested);
                self.branch(block, result.as_deref());
            } else {
                self.line("} else {");
                self.branch(branch, result.as_deref());
            }
        }
        self.close_ladder(nested);
        result.unwrap_or_else(|| abi.null())
    }

    fn branch(&mut self, block: NodeId, result: Option<&str>) {
        let ast = self.ast;
        self.current.indent += 1;
        let value = self.statements(ast.children(block), result.is_some());
        if let Some(result) = result {
            self.line(format!("{result} = {value};"));
        }
        self.current.indent -= 1;
    }

    /// Continues an if/else-if ladder. A test that needs setup statements
    /// opens a nested `if` inside an `else`, counted in `nested`.
    fn open_else_if(&mut self, setup: Vec<String>, test: &str, nested: &mut usize) {
        if setup.is_empty() {
            self.line(format!("}} else if ({test}) {{"));
            return;
        }
        self.line("} else {");
        self.current.indent += 1;
        self.push_indented(setup);
        self.line(format!("if ({test}) {{"));
        *nested += 1;
    }

    fn close_ladder(&mut self, nested: usize) {
        self.line("}");
        for _ in 0..nested {
            self.current.indent -= 1;
            self.line("}");
        }
    }

    fn when(&mut self, node: NodeId, want: bool) -> String {
        let ast = self.ast;
        let abi = self.abi;
        let Some((&scrutinee, arms)) = ast.children(node).split_first() else {
            return abi.null();
        };
        let result = want.then(|| self.result_slot());
        let value = self.expr(scrutinee);
        let subject = self.bind(&value);

        let mut nested = 0;
        let mut opened = false;
        for &arm in arms {
            let Some((&body, alternatives)) = ast.children(arm).split_last() else {
                continue;
            };
            let (setup, test) = self.detached(|this| this.pattern_test(&subject, alternatives));
            if opened {
                self.open_else_if(setup, &test, &mut nested);
            } else {
                self.current.lines.extend(setup);
                self.line(format!("if ({test}) {{"));
                opened = true;
            }

            self.current.indent += 1;
            self.bind_result_patterns(&subject, alternatives);
            let value = if ast.kind(body) == NodeKind::Block {
                self.statements(ast.children(body), result.is_some())
            } else {
                let value = self.expr(body);
                if result.is_none() && !is_silent(ast, body) {
                    self.line(format!("{value};"));
                }
                value
            };
            if let Some(result) = &result {
                self.line(format!("{result} = {value};"));
            }
            self.current.indent -= 1;
        }
        if opened {
            self.close_ladder(nested);
        }
        trace!(arms = arms.len(), "lowered when");
        result.unwrap_or_else(|| abi.null())
    }

    /// Native condition matching one arm: alternatives are OR-joined.
    fn pattern_test(&mut self, subject: &str, alternatives: &[NodeId]) -> String {
        let ast = self.ast;
        let abi = self.abi;
        let mut tests = Vec::new();
        for &alternative in alternatives {
            match ast.kind(alternative) {
                NodeKind::Wildcard => return "true".to_string(),
                NodeKind::ResultPattern => {
                    if ast.token(alternative).is_some_and(|t| t.kind == TokenKind::Ok) {
                        tests.push(abi.is_ok_test(subject));
                    } else {
                        tests.push(abi.is_err_test(subject));
                    }
                }
                _ => {
                    let value = self.expr(alternative);
                    tests.push(abi.equals_test(subject, &value));
                }
            }
        }
        if tests.is_empty() {
            return "false".to_string();
        }
        tests.join(" || ")
    }

    fn bind_result_patterns(&mut self, subject: &str, alternatives: &[NodeId]) {
        let ast = self.ast;
        let analysis = self.analysis;
        let abi = self.abi;
        for &alternative in alternatives {
            if ast.kind(alternative) != NodeKind::ResultPattern {
                continue;
            }
            let Some(bound) = ast.child(alternative, 0) else {
                continue;
            };
            let Some(declaration) = analysis.declarations.get(&bound) else {
                continue;
            };
            let value = if ast.token(alternative).is_some_and(|t| t.kind == TokenKind::Ok) {
                abi.result_value(subject)
            } else {
                abi.result_error(subject)
            };
            self.line(format!(
                "{} {} = {value};",
                abi.value_type(),
                declaration.storage
            ));
        }
    }

    // -----------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------

    fn expr(&mut self, node: NodeId) -> String {
        let ast = self.ast;
        let analysis = self.analysis;
        let abi = self.abi;
        match ast.kind(node) {
            NodeKind::Literal => self.literal(node),
            NodeKind::Identifier => self.load(
                ast.literal(node),
                analysis.bindings.get(&node),
                analysis.origins.get(&node).copied(),
            ),
            NodeKind::Wildcard => abi.null(),
            NodeKind::Operator => self.operator(node),
            NodeKind::FunctionCall => self.call(node, None),
            NodeKind::Pipe => self.pipe(node),
            NodeKind::Member => self.member(node),
            NodeKind::Index => {
                let (Some(target), Some(index)) = (ast.child(node, 0), ast.child(node, 1)) else {
                    return abi.null();
                };
                let target = self.expr(target);
                let index = self.expr(index);
                abi.index_get(&target, &index)
            }
            NodeKind::Ternary => self.ternary(node),
            NodeKind::Lambda => self.lambda(node),
            NodeKind::List => self.sequence(node, false),
            NodeKind::Vector => self.sequence(node, true),
            NodeKind::Dict => self.dict(node),
            NodeKind::ResultValue => {
                let value = match ast.child(node, 0) {
                    Some(value) => self.expr(value),
                    None => abi.null(),
                };
                if ast.token(node).is_some_and(|t| t.kind == TokenKind::Ok) {
                    abi.ok(&value)
                } else {
                    abi.err(&value)
                }
            }
            NodeKind::VarDecl => {
                let value = match ast.child(node, 1) {
                    Some(value) => self.expr(value),
                    None => abi.null(),
                };
                self.store(node, value)
            }
            NodeKind::If | NodeKind::When | NodeKind::Block => self.statement(node, true),
            other => {
                warn!(kind = ?other, "unexpected node in expression lowered to null");
                abi.null()
            }
        }
    }

    fn literal(&self, node: NodeId) -> String {
        let abi = self.abi;
        let Some(token) = self.ast.token(node) else {
            return abi.null();
        };
        match token.kind {
            TokenKind::Int => abi.int(&token.literal),
            TokenKind::Float => abi.float(&token.literal),
            TokenKind::Str => abi.string(&token.literal),
            TokenKind::True => abi.boolean(true),
            TokenKind::False => abi.boolean(false),
            _ => abi.null(),
        }
    }

    /// Value of a resolved name as seen from the current frame.
    fn load(&mut self, name: &str, binding: Option<&Binding>, origin: Option<NodeId>) -> String {
        let abi = self.abi;
        if matches!(binding, Some(Binding::Variable { .. } | Binding::SelfClosure))
            && let Some(index) = self.capture_index(name, origin)
        {
            return abi.capture_slot(abi.env_param(), index);
        }
        match binding {
            Some(Binding::Variable { storage, .. }) => storage.clone(),
            Some(Binding::SelfClosure) => abi.closure_value(abi.env_param()),
            Some(Binding::Function { symbol }) => abi.function_value(symbol),
            Some(Binding::Builtin) => {
                let wrapper = self.builtin_wrapper(name);
                abi.function_value(&wrapper)
            }
            Some(Binding::Module) | None => {
                warn!(name, "unresolved name lowered to null");
                abi.null()
            }
        }
    }

    fn capture_index(&self, name: &str, origin: Option<NodeId>) -> Option<usize> {
        let (index, _, capture) = self.current.captures?.get_full(name)?;
        (capture.origin == origin).then_some(index)
    }

    fn operator(&mut self, node: NodeId) -> String {
        let ast = self.ast;
        let abi = self.abi;
        let Some(token) = ast.token(node) else {
            return abi.null();
        };
        match ast.children(node) {
            [operand] => {
                let value = self.expr(*operand);
                let op = if token.kind == TokenKind::Minus {
                    UnaryOp::Neg
                } else {
                    UnaryOp::Not
                };
                abi.unary(op, &value)
            }
            [target, value] if token.kind == TokenKind::Assign => self.assign(*target, *value),
            [left, right] if token.kind == TokenKind::Comma => {
                let left_value = self.expr(*left);
                if !is_silent(ast, *left) {
                    self.line(format!("{left_value};"));
                }
                self.expr(*right)
            }
            [left, right] => {
                let left_value = self.expr(*left);
                let right_value = self.expr(*right);
                let Some(op) = binary_op(token.kind) else {
                    warn!(operator = %token.literal, "operator without an entry point lowered to null");
                    return abi.null();
                };
                let vector = matches!(
                    op,
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
                ) && (self.is_vector(*left) || self.is_vector(*right));
                abi.binary(op, &left_value, &right_value, vector)
            }
            _ => abi.null(),
        }
    }

    fn assign(&mut self, target: NodeId, value: NodeId) -> String {
        let ast = self.ast;
        let analysis = self.analysis;
        let abi = self.abi;
        let value = self.expr(value);
        match ast.kind(target) {
            NodeKind::Identifier => self.store(target, value),
            NodeKind::Member => {
                if let Some(Binding::Variable { storage, .. }) = analysis.bindings.get(&target) {
                    self.line(format!("{storage} = {value};"));
                    return storage.clone();
                }
                let Some(object) = ast.child(target, 0) else {
                    return value;
                };
                let object = self.expr(object);
                let value = self.bind(&value);
                let set = abi.member_set(&object, ast.literal(target), &value);
                self.line(format!("{set};"));
                value
            }
            NodeKind::Index => {
                let (Some(container), Some(index)) = (ast.child(target, 0), ast.child(target, 1))
                else {
                    return value;
                };
                let is_dict = matches!(analysis.type_of(container), Type::Dict(..));
                let container = self.expr(container);
                let index = self.expr(index);
                let value = self.bind(&value);
                let set = if is_dict {
                    abi.dict_set(&container, &index, &value)
                } else {
                    abi.index_set(&container, &index, &value)
                };
                self.line(format!("{set};"));
                value
            }
            other => {
                warn!(kind = ?other, "invalid assignment target ignored");
                value
            }
        }
    }

    /// Writes `value` to the storage the analyzer assigned to `target`.
    fn store(&mut self, target: NodeId, value: String) -> String {
        let ast = self.ast;
        let analysis = self.analysis;
        let abi = self.abi;
        let name = ast.literal(target);
        let Some(declaration) = analysis.declarations.get(&target) else {
            warn!(name, "assignment without storage dropped");
            return value;
        };
        let origin = analysis.origins.get(&target).copied();
        if let Some(index) = self.capture_index(name, origin) {
            let slot = abi.capture_slot(abi.env_param(), index);
            self.line(format!("{slot} = {value};"));
            return slot;
        }
        let storage = &declaration.storage;
        if declaration.fresh && !declaration.global {
            self.line(format!("{} {storage} = {value};", abi.value_type()));
        } else {
            self.line(format!("{storage} = {value};"));
        }
        storage.clone()
    }

    fn call(&mut self, call: NodeId, piped: Option<(NodeId, String)>) -> String {
        let ast = self.ast;
        let (Some(callee), Some(arguments)) = (ast.child(call, 0), ast.child(call, 1)) else {
            return self.abi.null();
        };
        let mut first = None;
        let mut args = Vec::new();
        if let Some((input, value)) = piped {
            first = Some(input);
            args.push(value);
        }
        for &arg in ast.children(arguments) {
            first.get_or_insert(arg);
            args.push(self.expr(arg));
        }
        self.apply(callee, args, first)
    }

    /// Calls `callee`, preferring a builtin, then a statically known
    /// function, then an indirect call through the function value.
    fn apply(&mut self, callee: NodeId, args: Vec<String>, first: Option<NodeId>) -> String {
        let ast = self.ast;
        let analysis = self.analysis;
        match (ast.kind(callee), analysis.bindings.get(&callee)) {
            (NodeKind::Identifier, Some(Binding::Builtin)) => {
                return self.builtin(ast.literal(callee), args, first);
            }
            (NodeKind::Identifier | NodeKind::Member, Some(Binding::Function { symbol })) => {
                if let Some(arity) = self.static_arity(callee) {
                    return self.direct_call(symbol, args, arity);
                }
            }
            _ => {}
        }
        let callee = self.expr(callee);
        self.dynamic_call(&callee, args)
    }

    fn builtin(&mut self, name: &str, mut args: Vec<String>, first: Option<NodeId>) -> String {
        let abi = self.abi;
        let Some(descriptor) = self.builtins.find(name) else {
            warn!(builtin = name, "unknown builtin lowered to null");
            return abi.null();
        };
        if args.len() < descriptor.min_arity {
            warn!(
                builtin = name,
                given = args.len(),
                minimum = descriptor.min_arity,
                "builtin call with too few arguments lowered to null"
            );
            return abi.null();
        }
        args.truncate(descriptor.max_arity);
        let vector = first.is_some_and(|node| self.is_vector(node));
        abi.builtin_call(name, &args, vector)
    }

    fn static_arity(&self, callee: NodeId) -> Option<usize> {
        let ast = self.ast;
        let origin = *self.analysis.origins.get(&callee)?;
        if ast.kind(origin) != NodeKind::Function {
            return None;
        }
        ast.child(origin, 0).map(|params| ast.children(params).len())
    }

    /// Direct call with arguments padded with null or cut to `arity`.
    fn direct_call(&self, symbol: &str, mut args: Vec<String>, arity: usize) -> String {
        let abi = self.abi;
        if args.len() != arity {
            warn!(symbol, given = args.len(), arity, "argument count adjusted");
        }
        args.resize_with(arity, || abi.null());
        let mut call = format!("{symbol}({}", abi.null_env());
        for arg in &args {
            let _ = write!(call, ", {arg}");
        }
        call.push(')');
        call
    }

    fn dynamic_call(&mut self, callee: &str, args: Vec<String>) -> String {
        let abi = self.abi;
        if args.len() <= abi.max_direct_arity() {
            return abi.call_value(callee, &args);
        }
        let argv = self.temp();
        self.line(format!(
            "{} {argv}[] = {{{}}};",
            abi.value_type(),
            args.join(", ")
        ));
        abi.call_value_n(callee, args.len(), &argv)
    }

    fn pipe(&mut self, node: NodeId) -> String {
        let ast = self.ast;
        let (Some(input), Some(target)) = (ast.child(node, 0), ast.child(node, 1)) else {
            return self.abi.null();
        };
        let value = self.expr(input);
        match ast.kind(target) {
            NodeKind::FunctionCall => self.call(target, Some((input, value))),
            NodeKind::Identifier | NodeKind::Member | NodeKind::Lambda => {
                self.apply(target, vec![value], Some(input))
            }
            other => {
                warn!(kind = ?other, "pipe target is not callable; lowered to null");
                self.abi.null()
            }
        }
    }

    fn member(&mut self, node: NodeId) -> String {
        let ast = self.ast;
        let analysis = self.analysis;
        if let Some(binding) = analysis.bindings.get(&node) {
            let origin = analysis.origins.get(&node).copied();
            return self.load(ast.literal(node), Some(binding), origin);
        }
        let Some(object) = ast.child(node, 0) else {
            return self.abi.null();
        };
        let object = self.expr(object);
        self.abi.member_get(&object, ast.literal(node))
    }

    fn ternary(&mut self, node: NodeId) -> String {
        let ast = self.ast;
        let abi = self.abi;
        let [condition, then_value, else_value] = ast.children(node) else {
            return abi.null();
        };
        let result = self.result_slot();
        let condition = self.expr(*condition);
        self.line(format!("if ({}) {{", abi.truthy_test(&condition)));
        self.current.indent += 1;
        let value = self.expr(*then_value);
        self.line(format!("{result} = {value};"));
        self.current.indent -= 1;
        self.line("} else {");
        self.current.indent += 1;
        let value = self.expr(*else_value);
        self.line(format!("{result} = {value};"));
        self.current.indent -= 1;
        self.line("}");
        result
    }

    fn lambda(&mut self, node: NodeId) -> String {
        let ast = self.ast;
        let (Some(params), Some(body)) = (ast.child(node, 0), ast.child(node, 1)) else {
            return self.abi.null();
        };
        let symbol = format!("quark_lambda_{}", self.lambdas);
        self.lambdas += 1;
        let captures = self.analysis.captures_of(node);
        self.define(&symbol, params, body, captures);
        self.closure_value(&symbol, captures)
    }

    fn sequence(&mut self, node: NodeId, vector: bool) -> String {
        let ast = self.ast;
        let abi = self.abi;
        let elements = ast.children(node);
        let empty = if vector {
            abi.vector(elements.len())
        } else {
            abi.list(elements.len())
        };
        let target = self.bind(&empty);
        for &element in elements {
            let value = self.expr(element);
            let push = if vector {
                abi.vector_push(&target, &value)
            } else {
                abi.list_push(&target, &value)
            };
            self.line(format!("{target} = {push};"));
        }
        target
    }

    fn dict(&mut self, node: NodeId) -> String {
        let ast = self.ast;
        let abi = self.abi;
        let target = self.bind(&abi.dict());
        for &entry in ast.children(node) {
            let Some(value) = ast.child(entry, 0) else {
                continue;
            };
            let value = self.expr(value);
            let key = abi.string(ast.literal(entry));
            self.line(format!("{};", abi.dict_set(&target, &key, &value)));
        }
        target
    }

    // -----------------------------------------------------------------
    // Builtins as values
    // -----------------------------------------------------------------

    fn builtin_wrapper(&mut self, name: &str) -> String {
        let arity = self.builtins.find(name).map_or(0, |b| b.min_arity);
        self.wrappers.entry(name.to_string()).or_insert(arity);
        format!("quark_builtin_{name}")
    }

    /// Emits a closure-shaped adapter for every builtin used as a value.
    fn builtin_wrappers(&mut self) {
        let abi = self.abi;
        let wrappers = std::mem::take(&mut self.wrappers);
        for (name, arity) in wrappers {
            let params: Vec<String> = (0..arity).map(|i| format!("quark_arg{i}")).collect();
            let mut signature = format!(
                "{} quark_builtin_{name}({} {}",
                abi.value_type(),
                abi.env_type(),
                abi.env_param()
            );
            for param in &params {
                let _ = write!(signature, ", {} {param}", abi.value_type());
            }
            signature.push(')');
            self.forward.push(format!("{signature};"));
            self.definitions.push(format!(
                "{signature} {{\n{INDENT}return {};\n}}",
                abi.builtin_call(&name, &params, false)
            ));
        }
    }
}

/// Statements whose value is never emitted on its own line.
fn is_silent(ast: &Ast, node: NodeId) -> bool {
    match ast.kind(node) {
        NodeKind::Identifier
        | NodeKind::Literal
        | NodeKind::Wildcard
        | NodeKind::Lambda
        | NodeKind::VarDecl => true,
        NodeKind::Operator => ast.token(node).is_some_and(|t| t.kind == TokenKind::Assign),
        _ => false,
    }
}

fn binary_op(kind: TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::DoubleStar => BinaryOp::Pow,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Lte => BinaryOp::Lte,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Gte => BinaryOp::Gte,
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::NotEq,
        TokenKind::And => BinaryOp::And,
        TokenKind::Or => BinaryOp::Or,
        TokenKind::Amper => BinaryOp::BitAnd,
        TokenKind::DotDot => BinaryOp::Range,
        _ => return None,
    };
    Some(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{CPP_CORE_ENTRY_POINTS, CppAbi};
    use crate::analyzer::analyze;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn emit_unchecked(source: &str) -> String {
        let parsed = parse(tokenize(source));
        assert!(
            parsed.diagnostics.is_empty(),
            "parse diagnostics: {:?}",
            parsed.diagnostics
        );
        let builtins = BuiltinRegistry::standard();
        let analysis = analyze(&parsed.ast, parsed.root, &builtins);
        lower(
            &parsed.ast,
            parsed.root,
            &analysis,
            &builtins,
            &CppAbi,
            "main",
        )
    }

    fn emit(source: &str) -> String {
        let parsed = parse(tokenize(source));
        assert!(
            parsed.diagnostics.is_empty(),
            "parse diagnostics: {:?}",
            parsed.diagnostics
        );
        let builtins = BuiltinRegistry::standard();
        let analysis = analyze(&parsed.ast, parsed.root, &builtins);
        assert!(
            analysis.is_ok(),
            "type diagnostics: {:?}",
            analysis.diagnostics
        );
        lower(
            &parsed.ast,
            parsed.root,
            &analysis,
            &builtins,
            &CppAbi,
            "main",
        )
    }

    fn runtime_symbols(code: &str) -> Vec<String> {
        code.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|word| word.starts_with("q_") || word.starts_with("qv_"))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn program_layout() {
        let code = emit("x = 1\nprintln x\n");
        assert!(code.starts_with("#include \"quark/quark.hpp\"\n"));
        assert!(code.contains("static QValue quark_v_x = qv_null();"));
        assert!(code.contains("int main() {\n    q_gc_init();"));
        assert!(code.contains("    quark_v_x = qv_int(1);"));
        assert!(code.contains("    q_println(quark_v_x);"));
        assert!(code.trim_end().ends_with("return 0;\n}"));
    }

    #[test]
    fn capturing_lambda_allocates_an_environment() {
        let code = emit("fn outer(x) ->\n    f = fn y -> x + y\n    f 1\n");
        assert!(code.contains("QValue quark_fn_outer(QClosure* env, QValue quark_v_x)"));
        assert!(code.contains("QValue quark_lambda_0(QClosure* env, QValue quark_v_y)"));
        assert!(code.contains("q_alloc_closure((void*)quark_lambda_0, 1);"));
        assert!(code.contains("->captures[0] = quark_v_x;"));
        assert!(code.contains("return q_add(env->captures[0], quark_v_y);"));
        assert!(code.contains("QValue quark_v_f = qv_closure("));
        assert!(code.contains("return q_call1(quark_v_f, qv_int(1));"));
    }

    #[test]
    fn capture_free_lambda_is_a_plain_function_value() {
        let code = emit("g = fn a -> a * 2\n");
        assert!(code.contains("quark_v_g = qv_func((void*)quark_lambda_0);"));
        assert!(!code.contains("q_alloc_closure"));
    }

    #[test]
    fn when_lowers_to_a_single_ladder() {
        let code = emit(
            "fn describe(n) ->\n    when n:\n        1 -> 'one'\n        2 or 3 -> 'few'\n        _ -> 'many'\n",
        );
        assert!(code.contains("QValue _t0 = qv_null();"));
        assert!(code.contains("QValue _t1 = quark_v_n;"));
        assert!(code.contains("if (q_truthy(q_eq(_t1, qv_int(1)))) {"));
        assert!(code.contains(
            "} else if (q_truthy(q_eq(_t1, qv_int(2))) || q_truthy(q_eq(_t1, qv_int(3)))) {"
        ));
        assert!(code.contains("} else if (true) {"));
        assert!(code.contains("_t0 = qv_string(\"many\");"));
        assert!(code.contains("return _t0;"));
    }

    #[test]
    fn result_patterns_bind_their_payload() {
        let code = emit("r = ok 5\nwhen r:\n    ok v -> println v\n    err e -> println e\n");
        assert!(code.contains("if (q_is_ok(_t0)) {"));
        assert!(code.contains("QValue quark_v_v = q_result_value(_t0);"));
        assert!(code.contains("} else if (_t0.type == QValue::VAL_RESULT && !q_is_ok(_t0)) {"));
        assert!(code.contains("QValue quark_v_e = q_result_error(_t0);"));
        assert!(code.contains("q_println(quark_v_v);"));
    }

    #[test]
    fn err_pattern_skips_plain_values() {
        let code = emit(
            "v = 5\nwhen v:\n    ok x -> println x\n    err e -> println e\n    _ -> println v\n",
        );
        assert!(code.contains("QValue _t0 = quark_v_v;"));
        assert!(!code.contains("!q_is_ok(_t0)) {"));
        assert!(code.contains("} else if (_t0.type == QValue::VAL_RESULT && !q_is_ok(_t0)) {"));
        assert!(code.contains("} else if (true) {"));
    }

    #[test]
    fn range_loops_use_a_native_counter() {
        let code = emit("for i in 0 .. 3:\n    println i\n");
        assert!(code.contains("long long _t0 = qv_int(0).data.int_val;"));
        assert!(code.contains("long long _t1 = qv_int(3).data.int_val;"));
        assert!(code.contains("for (long long _t2 = _t0; _t2 < _t1; _t2++) {"));
        assert!(code.contains("QValue quark_v_i = qv_int(_t2);"));
        assert!(code.contains("q_println(quark_v_i);"));
    }

    #[test]
    fn other_iterables_use_length_and_iter_get() {
        let code = emit("for c in ['a', 'b']:\n    println c\n");
        assert!(code.contains("q_len(_t1).data.int_val"));
        assert!(code.contains("QValue quark_v_c = q_iter_get(_t1, qv_int(_t2));"));
    }

    #[test]
    fn pipe_prefers_builtins_then_static_functions() {
        let code = emit(
            "fn double(x) -> x * 2\nxs = [1, 2]\nn = xs | len\nm = 3 | double\nh = fn v -> v\nk = 4 | h\n",
        );
        assert!(code.contains("quark_v_n = q_len(quark_v_xs);"));
        assert!(code.contains("quark_v_m = quark_fn_double(nullptr, qv_int(3));"));
        assert!(code.contains("quark_v_k = q_call1(quark_v_h, qv_int(4));"));
    }

    #[test]
    fn piped_call_prepends_the_input() {
        let code = emit("s = 'a,b' | split ','\n");
        assert!(code.contains("quark_v_s = q_split(qv_string(\"a,b\"), qv_string(\",\"));"));
    }

    #[test]
    fn nested_named_function_is_a_closure() {
        let code = emit(
            "fn outer(n) ->\n    fn count(k) ->\n        k if k > n else count k + 1\n    count 0\n",
        );
        assert!(code.contains("QClosure* _t0 = q_alloc_closure((void*)quark_closure_count_0, 1);"));
        assert!(code.contains("QValue quark_v_count = qv_closure(_t0);"));
        assert!(code.contains("QValue quark_closure_count_0(QClosure* env, QValue quark_v_k)"));
        assert!(code.contains("q_call1(qv_closure(env), q_add(quark_v_k, qv_int(1)))"));
        assert!(code.contains("q_gt(quark_v_k, env->captures[0])"));
        assert!(code.contains("_t0->captures[0] = quark_v_n;"));
        assert!(code.contains("return q_call1(quark_v_count, qv_int(0));"));
    }

    #[test]
    fn sibling_functions_exist_before_any_capture_is_copied() {
        let code = emit(
            "fn outer(n) ->\n    fn a(k) -> b(k)\n    fn b(k) -> k\n    a(n)\n",
        );
        let position = |needle: &str| {
            code.find(needle)
                .unwrap_or_else(|| panic!("missing {needle:?} in\n{code}"))
        };
        let alloc_a = position("QClosure* _t0 = q_alloc_closure((void*)quark_closure_a_0, 1);");
        let store_a = position("QValue quark_v_a = qv_closure(_t0);");
        let store_b = position("QValue quark_v_b = qv_func((void*)quark_closure_b_1);");
        let fill_a = position("_t0->captures[0] = quark_v_b;");
        let call = position("return q_call1(quark_v_a, quark_v_n);");
        assert!(alloc_a < store_a && store_a < store_b && store_b < fill_a && fill_a < call);
        assert!(code.contains("return q_call1(env->captures[0], quark_v_k);"));
    }

    #[test]
    fn file_level_variables_are_captured_by_value() {
        let code = emit("x = 1\nf = fn -> x\nx = 2\nprintln f()\n");
        assert!(code.contains("QValue quark_lambda_0(QClosure* env) {\n    return env->captures[0];\n}"));
        let fill = code.find("_t0->captures[0] = quark_v_x;").expect("capture copy");
        let store = code.find("quark_v_f = qv_closure(_t0);").expect("closure store");
        let reassign = code.find("quark_v_x = qv_int(2);").expect("reassignment");
        assert!(fill < store && store < reassign);
        assert!(code.contains("q_println(q_call0(quark_v_f));"));
    }

    #[test]
    fn variables_and_functions_use_distinct_prefixes() {
        let code = emit("fn x() -> 1\nfn_x = 2\nprintln x()\nprintln fn_x\n");
        assert!(code.contains("QValue quark_fn_x(QClosure* env)"));
        assert!(code.contains("static QValue quark_v_fn_x = qv_null();"));
        assert!(code.contains("quark_v_fn_x = qv_int(2);"));
        assert!(code.contains("q_println(quark_fn_x(nullptr));"));
    }

    #[test]
    fn builtins_used_as_values_get_wrappers() {
        let code = emit("xs = [[1], [2, 3]]\nys = map xs, len\n");
        assert!(code.contains("QValue quark_builtin_len(QClosure* env, QValue quark_arg0)"));
        assert!(code.contains("return q_len(quark_arg0);"));
        assert!(code.contains("quark_v_ys = q_map(quark_v_xs, qv_func((void*)quark_builtin_len));"));
    }

    #[test]
    fn container_writes_use_the_mutating_call() {
        let code = emit("d = {a: 1}\nd['b'] = 2\nxs = [1]\nxs[0] = 5\n");
        assert!(code.contains("q_dict_set(_t0, qv_string(\"a\"), qv_int(1));"));
        assert!(code.contains("q_dict_set(quark_v_d, qv_string(\"b\"), _t1);"));
        assert!(code.contains("q_set(quark_v_xs, qv_int(0), _t3);"));
    }

    #[test]
    fn vector_arithmetic_uses_elementwise_entries() {
        let code = emit("v = vector [1, 2]\nw = v * 2\nt = sum v\n");
        assert!(code.contains("_t0 = q_vec_push(_t0, qv_int(1));"));
        assert!(code.contains("quark_v_w = q_vec_mul(quark_v_v, qv_int(2));"));
        assert!(code.contains("quark_v_t = q_vec_sum(quark_v_v);"));
    }

    #[test]
    fn while_condition_with_setup_moves_into_the_loop() {
        let code = emit("n = 0\nwhile n < 3:\n    n = n + 1\n");
        assert!(code.contains("while (q_truthy(q_lt(quark_v_n, qv_int(3)))) {"));
        assert!(code.contains("quark_v_n = q_add(quark_v_n, qv_int(1));"));

        let code = emit("n = 0\nwhile n < len([1, 2]):\n    n = n + 1\n");
        assert!(code.contains("while (true) {"));
        assert!(code.contains("if (!q_truthy(q_lt(quark_v_n, q_len(_t0)))) break;"));
    }

    #[test]
    fn many_arguments_fall_back_to_calln() {
        let code = emit("f = fn a, b, c, d, e -> a\nf(1, 2, 3, 4, 5)\n");
        assert!(code.contains("QValue _t0[] = {qv_int(1), qv_int(2), qv_int(3), qv_int(4), qv_int(5)};"));
        assert!(code.contains("q_calln(quark_v_f, 5, _t0);"));
    }

    #[test]
    fn degraded_calls_lower_to_null() {
        let code = emit_unchecked("x = len()\nfn add(a, b) -> a + b\ny = add(1)\n");
        assert!(code.contains("quark_v_x = qv_null();"));
        assert!(code.contains("quark_v_y = quark_fn_add(nullptr, qv_int(1), qv_null());"));
    }

    #[test]
    fn if_value_collects_each_branch() {
        let code = emit(
            "fn sign(n) ->\n    if n > 0:\n        1\n    elseif n < 0:\n        -1\n    else:\n        0\n",
        );
        assert!(code.contains("if (q_truthy(q_gt(quark_v_n, qv_int(0)))) {"));
        assert!(code.contains("} else if (q_truthy(q_lt(quark_v_n, qv_int(0)))) {"));
        assert!(code.contains("_t0 = q_neg(qv_int(1));"));
        assert!(code.contains("} else {"));
        assert!(code.contains("return _t0;"));
    }

    #[test]
    fn output_references_only_abi_entry_points() {
        let code = emit(
            "fn fact(n) ->\n    1 if n <= 1 else n * fact n - 1\n\
             xs = [1, 2, 3]\n\
             total = reduce xs, fn a, b -> a + b, 0\n\
             d = {name: 'q', size: 2}\n\
             d.size = 3\n\
             v = to_vector([1.0, 2.0])\n\
             u = v / v\n\
             r = err 'no'\n\
             when r:\n    ok x -> println x\n    _ -> println 'failed'\n\
             for i in range(3):\n    println fact i\n\
             s = 'a b' | split ' ' | len\n",
        );
        let abi = CppAbi;
        let builtins = BuiltinRegistry::standard();
        for symbol in runtime_symbols(&code) {
            let known = CPP_CORE_ENTRY_POINTS.contains(&symbol.as_str())
                || builtins.iter().any(|b| {
                    abi.builtin_entry(b.name, false) == symbol
                        || abi.builtin_entry(b.name, true) == symbol
                });
            assert!(known, "unexpected runtime symbol {symbol}");
        }
    }
}
