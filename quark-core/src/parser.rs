//! Statement parser for Quark.
//!
//! Statements are parsed by recursive descent; expressions are handed
//! to the precedence-climbing engine in [`crate::expr`]. The parser never
//! aborts: a required-token mismatch records a diagnostic and yields
//! `None` for that subtree, and the enclosing loop skips one token.

use tracing::debug;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::diagnostic::Diagnostic;
use crate::expr::Precedence;
use crate::token::{Token, TokenKind};

/// Result of parsing a token stream into a fresh arena.
#[derive(Debug)]
pub struct ParseResult {
    pub ast: Ast,
    pub root: NodeId,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a token stream into a new AST.
pub fn parse(tokens: Vec<Token>) -> ParseResult {
    let mut ast = Ast::new();
    let (root, diagnostics) = parse_into(&mut ast, tokens);
    ParseResult {
        ast,
        root,
        diagnostics,
    }
}

/// Parse a token stream, appending nodes to an existing arena.
///
/// The module loader uses this to keep every imported file in a single
/// arena so their nodes can be spliced together.
pub fn parse_into(ast: &mut Ast, tokens: Vec<Token>) -> (NodeId, Vec<Diagnostic>) {
    let mut parser = Parser::new(ast, tokens);
    let root = parser.parse_program();
    debug!(
        nodes = parser.ast.len(),
        diagnostics = parser.diagnostics.len(),
        "parsed program"
    );
    (root, parser.diagnostics)
}

pub(crate) struct Parser<'a> {
    pub(crate) ast: &'a mut Ast,
    tokens: Vec<Token>,
    pos: usize,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl<'a> Parser<'a> {
    fn new(ast: &'a mut Ast, mut tokens: Vec<Token>) -> Self {
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let (line, column) = tokens.last().map_or((1, 1), |t| (t.line, t.column));
            tokens.push(Token::new(TokenKind::Eof, "", line, column));
        }
        Parser {
            ast,
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    // -----------------------------------------------------------------
    // Token cursor
    // -----------------------------------------------------------------

    pub(crate) fn cur(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    pub(crate) fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + 1).min(last)]
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)]
    }

    pub(crate) fn previous(&self) -> Option<&Token> {
        self.pos.checked_sub(1).and_then(|i| self.tokens.get(i))
    }

    pub(crate) fn cur_is(&self, kind: TokenKind) -> bool {
        self.cur().kind == kind
    }

    pub(crate) fn peek_is(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    /// Consume a token of `kind` or record "expected X but got Y".
    pub(crate) fn expect(&mut self, kind: TokenKind) -> Option<Token> {
        if self.cur_is(kind) {
            return Some(self.advance());
        }
        let found = self.cur().clone();
        self.unexpected(&found, &format!("expected {kind} but got {}", describe(&found)));
        None
    }

    /// Record a diagnostic for `token`. Illegal tokens report their own
    /// lexer message instead of `message`.
    pub(crate) fn unexpected(&mut self, token: &Token, message: &str) {
        let diagnostic = if token.kind == TokenKind::Illegal {
            Diagnostic::lex(token.line, token.column, token.literal.clone())
        } else {
            Diagnostic::parse(token.line, token.column, message)
        };
        if !self.diagnostics.contains(&diagnostic) {
            self.diagnostics.push(diagnostic);
        }
    }

    pub(crate) fn error_here(&mut self, message: &str) {
        let token = self.cur().clone();
        self.unexpected(&token, message);
    }

    /// Skip one token after a failed statement, never crossing a block end.
    fn recover(&mut self) {
        if !self.cur_is(TokenKind::Dedent) && !self.cur_is(TokenKind::Eof) {
            self.advance();
        }
    }

    // -----------------------------------------------------------------
    // Program and blocks
    // -----------------------------------------------------------------

    fn parse_program(&mut self) -> NodeId {
        let mut statements = Vec::new();
        while !self.cur_is(TokenKind::Eof) {
            match self.cur().kind {
                TokenKind::Newline => {
                    self.advance();
                }
                TokenKind::Dedent | TokenKind::Indent => {
                    let token = self.advance();
                    self.unexpected(&token, &format!("unexpected {}", describe(&token)));
                }
                _ => match self.parse_statement() {
                    Some(stmt) => statements.push(stmt),
                    None => self.recover(),
                },
            }
        }
        self.ast.add(NodeKind::CompilationUnit, None, statements)
    }

    /// `NEWLINE INDENT stmt* DEDENT`, or a single inline statement.
    pub(crate) fn parse_block(&mut self) -> NodeId {
        if self.cur_is(TokenKind::Newline) && self.peek_is(TokenKind::Indent) {
            self.advance();
            self.advance();
            let mut statements = Vec::new();
            while !self.cur_is(TokenKind::Dedent) && !self.cur_is(TokenKind::Eof) {
                if self.cur_is(TokenKind::Newline) {
                    self.advance();
                    continue;
                }
                match self.parse_statement() {
                    Some(stmt) => statements.push(stmt),
                    None => self.recover(),
                }
            }
            if self.cur_is(TokenKind::Dedent) {
                self.advance();
            }
            return self.ast.add(NodeKind::Block, None, statements);
        }

        if self.cur_is(TokenKind::Newline) {
            self.advance();
            self.error_here("expected indented block");
            return self.ast.add(NodeKind::Block, None, Vec::new());
        }

        let statements = self.parse_statement().into_iter().collect();
        self.ast.add(NodeKind::Block, None, statements)
    }

    // -----------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------

    pub(crate) fn parse_statement(&mut self) -> Option<NodeId> {
        match self.cur().kind {
            TokenKind::Fn
                if self.peek_is(TokenKind::Ident) && self.peek_at(2).kind == TokenKind::LParen =>
            {
                self.parse_function()
            }
            TokenKind::Module => self.parse_module(),
            TokenKind::Use => self.parse_use(),
            TokenKind::If => self.parse_if(),
            TokenKind::When => self.parse_when(),
            TokenKind::For => self.parse_for(),
            TokenKind::While => self.parse_while(),
            TokenKind::Ident if self.peek_is(TokenKind::Colon) => {
                let decl = self.parse_var_decl()?;
                self.finish_simple_statement();
                Some(decl)
            }
            _ => {
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.finish_simple_statement();
                Some(expr)
            }
        }
    }

    fn finish_simple_statement(&mut self) {
        if self.previous().is_some_and(|t| t.kind == TokenKind::Dedent) {
            return;
        }
        match self.cur().kind {
            TokenKind::Newline => {
                self.advance();
            }
            TokenKind::Eof | TokenKind::Dedent => {}
            _ => {
                let token = self.advance();
                self.unexpected(
                    &token,
                    &format!("expected end of statement but got {}", describe(&token)),
                );
            }
        }
    }

    /// `fn name(params) -> block`
    fn parse_function(&mut self) -> Option<NodeId> {
        self.expect(TokenKind::Fn)?;
        let name = self.expect(TokenKind::Ident)?;
        let params = self.parse_parameter_list()?;
        self.expect(TokenKind::Arrow)?;
        let body = self.parse_block();
        Some(self.ast.add(NodeKind::Function, Some(name), vec![params, body]))
    }

    /// `( [param {, param} [,]] )`
    fn parse_parameter_list(&mut self) -> Option<NodeId> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.cur_is(TokenKind::RParen) {
            params.push(self.parse_parameter()?);
            if self.cur_is(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Some(self.ast.add(NodeKind::Parameters, None, params))
    }

    pub(crate) fn parse_parameter(&mut self) -> Option<NodeId> {
        let name = self.expect(TokenKind::Ident)?;
        let mut children = Vec::new();
        if self.cur_is(TokenKind::Colon) {
            self.advance();
            children.push(self.parse_type_annotation()?);
        }
        Some(self.ast.add(NodeKind::Parameter, Some(name), children))
    }

    /// `name [ '[' type {, type} ']' ]`
    fn parse_type_annotation(&mut self) -> Option<NodeId> {
        let name = match self.cur().kind {
            TokenKind::Ident
            | TokenKind::List
            | TokenKind::Dict
            | TokenKind::Vector
            | TokenKind::Null => self.advance(),
            _ => {
                let found = self.cur().clone();
                self.unexpected(&found, &format!("expected type but got {}", describe(&found)));
                return None;
            }
        };
        let mut args = Vec::new();
        if self.cur_is(TokenKind::LBracket) {
            self.advance();
            loop {
                args.push(self.parse_type_annotation()?);
                if self.cur_is(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RBracket)?;
        }
        Some(self.ast.add(NodeKind::TypeAnnotation, Some(name), args))
    }

    /// `name: type = value`
    fn parse_var_decl(&mut self) -> Option<NodeId> {
        let name = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_annotation()?;
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expression(Precedence::Lowest)?;
        Some(self.ast.add(NodeKind::VarDecl, Some(name), vec![ty, value]))
    }

    /// `module name: block`
    fn parse_module(&mut self) -> Option<NodeId> {
        self.expect(TokenKind::Module)?;
        let name = self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_block();
        Some(self.ast.add(NodeKind::Module, Some(name), vec![body]))
    }

    /// `use name` or `use './path'`
    fn parse_use(&mut self) -> Option<NodeId> {
        self.expect(TokenKind::Use)?;
        let target = match self.cur().kind {
            TokenKind::Ident | TokenKind::Str => self.advance(),
            _ => {
                let found = self.cur().clone();
                self.unexpected(
                    &found,
                    &format!("expected module name but got {}", describe(&found)),
                );
                return None;
            }
        };
        self.finish_simple_statement();
        Some(self.ast.add(NodeKind::Use, Some(target), Vec::new()))
    }

    /// `if cond: block {elseif cond: block} [else: block]`
    fn parse_if(&mut self) -> Option<NodeId> {
        let keyword = self.advance();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::Colon)?;
        let then_block = self.parse_block();
        let mut children = vec![condition, then_block];

        while self.cur_is(TokenKind::ElseIf) {
            let keyword = self.advance();
            let condition = self.parse_expression(Precedence::Lowest)?;
            self.expect(TokenKind::Colon)?;
            let block = self.parse_block();
            children.push(
                self.ast
                    .add(NodeKind::If, Some(keyword), vec![condition, block]),
            );
        }

        if self.cur_is(TokenKind::Else) {
            self.advance();
            self.expect(TokenKind::Colon)?;
            children.push(self.parse_block());
        }

        Some(self.ast.add(NodeKind::If, Some(keyword), children))
    }

    /// `when expr: NEWLINE INDENT arm* DEDENT`
    fn parse_when(&mut self) -> Option<NodeId> {
        let keyword = self.advance();
        let scrutinee = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;

        let mut children = vec![scrutinee];
        while !self.cur_is(TokenKind::Dedent) && !self.cur_is(TokenKind::Eof) {
            if self.cur_is(TokenKind::Newline) {
                self.advance();
                continue;
            }
            match self.parse_pattern_arm() {
                Some(arm) => children.push(arm),
                None => self.recover(),
            }
        }
        if self.cur_is(TokenKind::Dedent) {
            self.advance();
        }

        Some(self.ast.add(NodeKind::When, Some(keyword), children))
    }

    /// `ok name | err name | _ | expr {or expr}` then `-> result`.
    fn parse_pattern_arm(&mut self) -> Option<NodeId> {
        let mut children = Vec::new();

        let is_result_pattern = matches!(self.cur().kind, TokenKind::Ok | TokenKind::Err)
            && matches!(self.peek().kind, TokenKind::Ident | TokenKind::Underscore)
            && self.peek_at(2).kind == TokenKind::Arrow;

        if is_result_pattern {
            let tag = self.advance();
            let binding = self.advance();
            let kind = if binding.kind == TokenKind::Underscore {
                NodeKind::Wildcard
            } else {
                NodeKind::Identifier
            };
            let binding = self.ast.add(kind, Some(binding), Vec::new());
            children.push(
                self.ast
                    .add(NodeKind::ResultPattern, Some(tag), vec![binding]),
            );
        } else if self.cur_is(TokenKind::Underscore) && self.peek_is(TokenKind::Arrow) {
            let token = self.advance();
            children.push(self.ast.add(NodeKind::Wildcard, Some(token), Vec::new()));
        } else {
            children.push(self.parse_expression(Precedence::And)?);
            while self.cur_is(TokenKind::Or) {
                self.advance();
                children.push(self.parse_expression(Precedence::And)?);
            }
        }

        let arrow = self.expect(TokenKind::Arrow)?;
        let result = if self.cur_is(TokenKind::Newline) && self.peek_is(TokenKind::Indent) {
            self.parse_block()
        } else {
            let value = self.parse_expression(Precedence::Lowest)?;
            self.finish_simple_statement();
            value
        };
        children.push(result);

        Some(self.ast.add(NodeKind::Pattern, Some(arrow), children))
    }

    /// `for name in iterable: block`
    fn parse_for(&mut self) -> Option<NodeId> {
        let keyword = self.advance();
        let name = self.expect(TokenKind::Ident)?;
        let variable = self.ast.add(NodeKind::Identifier, Some(name), Vec::new());
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_block();
        Some(
            self.ast
                .add(NodeKind::For, Some(keyword), vec![variable, iterable, body]),
        )
    }

    /// `while cond: block`
    fn parse_while(&mut self) -> Option<NodeId> {
        let keyword = self.advance();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::Colon)?;
        let body = self.parse_block();
        Some(
            self.ast
                .add(NodeKind::While, Some(keyword), vec![condition, body]),
        )
    }
}

/// Human-readable token description for diagnostics.
pub(crate) fn describe(token: &Token) -> String {
    match token.kind {
        TokenKind::Ident | TokenKind::Int | TokenKind::Float => {
            format!("{} '{}'", token.kind, token.literal)
        }
        TokenKind::Str => format!("STRING '{}'", token.literal.escape_debug()),
        TokenKind::Illegal => token.literal.clone(),
        kind => kind.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> ParseResult {
        parse(tokenize(source))
    }

    fn statements(result: &ParseResult) -> Vec<NodeId> {
        result.ast.children(result.root).to_vec()
    }

    #[test]
    fn parses_function_definition_with_typed_params() {
        let result = parse_source("fn add(a: int, b,) ->\n    a + b\n");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let func = statements(&result)[0];
        assert_eq!(result.ast.kind(func), NodeKind::Function);
        assert_eq!(result.ast.literal(func), "add");
        let params = result.ast.children(func)[0];
        assert_eq!(result.ast.children(params).len(), 2);
        let first = result.ast.children(params)[0];
        let annotation = result.ast.children(first)[0];
        assert_eq!(result.ast.literal(annotation), "int");
    }

    #[test]
    fn parses_if_elseif_else_chain() {
        let result = parse_source("if a:\n    1\nelseif b: 2\nelse:\n    3\n");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let stmt = statements(&result)[0];
        let children = result.ast.children(stmt);
        assert_eq!(children.len(), 4);
        assert_eq!(result.ast.kind(children[2]), NodeKind::If);
        assert_eq!(result.ast.kind(children[3]), NodeKind::Block);
    }

    #[test]
    fn parses_when_patterns() {
        let source = "when r:\n    ok v -> v\n    err _ -> 0\n    1 or 2 -> 'small'\n    _ -> 'other'\n";
        let result = parse_source(source);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let when = statements(&result)[0];
        let arms = &result.ast.children(when)[1..];
        assert_eq!(arms.len(), 4);

        let ok_arm = result.ast.children(arms[0]);
        assert_eq!(result.ast.kind(ok_arm[0]), NodeKind::ResultPattern);
        assert_eq!(result.ast.literal(ok_arm[0]), "ok");

        let or_arm = result.ast.children(arms[2]);
        assert_eq!(or_arm.len(), 3, "two alternatives and a result");

        let wildcard_arm = result.ast.children(arms[3]);
        assert_eq!(result.ast.kind(wildcard_arm[0]), NodeKind::Wildcard);
    }

    #[test]
    fn parses_loops_modules_and_uses() {
        let source = "module m:\n    x = 1\nuse m\nuse './lib'\nfor i in 0 .. 3:\n    println i\nwhile x < 3: x = x + 1\n";
        let result = parse_source(source);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let kinds: Vec<NodeKind> = statements(&result)
            .iter()
            .map(|&id| result.ast.kind(id))
            .collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Module,
                NodeKind::Use,
                NodeKind::Use,
                NodeKind::For,
                NodeKind::While
            ]
        );
    }

    #[test]
    fn parses_typed_declaration() {
        let result = parse_source("xs: list[int] = [1, 2]\n");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let decl = statements(&result)[0];
        assert_eq!(result.ast.kind(decl), NodeKind::VarDecl);
        let ty = result.ast.children(decl)[0];
        assert_eq!(result.ast.literal(ty), "list");
        assert_eq!(result.ast.children(ty).len(), 1);
    }

    #[test]
    fn recovers_after_bad_statement() {
        let result = parse_source("x = )\ny = 2\nz = (1\n");
        assert!(!result.diagnostics.is_empty());
        let has_y = statements(&result).iter().any(|&id| {
            result.ast.kind(id) == NodeKind::Operator
                && result.ast.literal(result.ast.children(id)[0]) == "y"
        });
        assert!(has_y, "parser should resynchronize and keep later statements");
        assert!(result.diagnostics.iter().all(|d| d.line > 0));
    }

    #[test]
    fn illegal_tokens_become_lex_diagnostics() {
        let result = parse_source("if true:\nx\n");
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.phase == crate::diagnostic::Phase::Lex
                    && d.message.contains("expected indented block"))
        );
    }

    #[test]
    fn reports_line_annotated_errors() {
        let result = parse_source("x = 1\nfn f(a -> a\n");
        let diagnostic = result.diagnostics.first().expect("diagnostic");
        assert_eq!(diagnostic.line, 2);
        assert!(diagnostic.to_string().starts_with("line 2:"));
    }

    #[test]
    fn block_lambda_ends_its_statement() {
        let result = parse_source("f = fn x ->\n    y = x\n    y\nf 1\n");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let stmts = statements(&result);
        assert_eq!(stmts.len(), 2);
        let lambda = result.ast.children(stmts[0])[1];
        assert_eq!(result.ast.kind(lambda), NodeKind::Lambda);
        assert_eq!(result.ast.kind(stmts[1]), NodeKind::FunctionCall);
    }
}
