//! Precedence-climbing expression engine.
//!
//! Each operator token maps to a prefix and/or infix handler. Function
//! application has no token of its own: it is inferred when the current
//! token can start an expression and no infix handler claims it at the
//! ambient precedence.

use crate::ast::{NodeId, NodeKind};
use crate::parser::{Parser, describe};
use crate::token::{Token, TokenKind};

/// Binding strength, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    Lowest,
    Assignment,
    Pipe,
    Comma,
    Ternary,
    Or,
    And,
    BitwiseAnd,
    Equality,
    Comparison,
    Range,
    Term,
    Factor,
    Exponent,
    Unary,
    Application,
    Access,
}

impl Precedence {
    /// One level tighter; used by left-associative binary handlers.
    pub fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            Lowest => Assignment,
            Assignment => Pipe,
            Pipe => Comma,
            Comma => Ternary,
            Ternary => Or,
            Or => And,
            And => BitwiseAnd,
            BitwiseAnd => Equality,
            Equality => Comparison,
            Comparison => Range,
            Range => Term,
            Term => Factor,
            Factor => Exponent,
            Exponent => Unary,
            Unary => Application,
            Application | Access => Access,
        }
    }
}

/// Precedence of the infix handler for `kind`, if it has one.
pub fn infix_precedence(kind: TokenKind) -> Option<Precedence> {
    let precedence = match kind {
        TokenKind::Assign => Precedence::Assignment,
        TokenKind::Pipe => Precedence::Pipe,
        TokenKind::Comma => Precedence::Comma,
        TokenKind::Or => Precedence::Or,
        TokenKind::And => Precedence::And,
        TokenKind::Amper => Precedence::BitwiseAnd,
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equality,
        TokenKind::Lt | TokenKind::Lte | TokenKind::Gt | TokenKind::Gte => Precedence::Comparison,
        TokenKind::DotDot => Precedence::Range,
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
        TokenKind::DoubleStar => Precedence::Exponent,
        TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen => Precedence::Access,
        _ => return None,
    };
    Some(precedence)
}

/// Whether a token can begin an expression (and so an application argument).
pub fn can_start_expression(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Ident
            | TokenKind::Int
            | TokenKind::Float
            | TokenKind::Str
            | TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::LBrace
            | TokenKind::Underscore
            | TokenKind::Bang
            | TokenKind::Not
            | TokenKind::Minus
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::Fn
            | TokenKind::Ok
            | TokenKind::Err
            | TokenKind::List
            | TokenKind::Dict
            | TokenKind::Vector
    )
}

impl Parser<'_> {
    pub(crate) fn parse_expression(&mut self, precedence: Precedence) -> Option<NodeId> {
        let mut left = self.parse_prefix()?;

        loop {
            if self.cur_is(TokenKind::Newline) && self.peek_is(TokenKind::Pipe) {
                self.advance();
            }
            if self.at_expression_end() {
                break;
            }

            let kind = self.cur().kind;
            if kind == TokenKind::If && precedence <= Precedence::Ternary {
                left = self.parse_ternary(left)?;
                continue;
            }

            if self.applies_as_argument(left, precedence) {
                left = self.parse_application(left, precedence)?;
                continue;
            }

            match infix_precedence(kind) {
                Some(infix) if infix >= precedence => {
                    left = self.parse_infix(left, infix)?;
                }
                _ => break,
            }
        }

        Some(left)
    }

    /// Statement terminators, plus the token right after a closed block.
    fn at_expression_end(&self) -> bool {
        if self.previous().is_some_and(|t| t.kind == TokenKind::Dedent) {
            return true;
        }
        matches!(
            self.cur().kind,
            TokenKind::Newline
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Colon
                | TokenKind::Indent
                | TokenKind::Dedent
                | TokenKind::Eof
        )
    }

    /// Decide whether the current token starts an argument of `callee`.
    fn applies_as_argument(&self, callee: NodeId, precedence: Precedence) -> bool {
        let kind = self.cur().kind;
        if precedence > Precedence::Application || !can_start_expression(kind) {
            return false;
        }
        if !matches!(
            self.ast.kind(callee),
            NodeKind::Identifier
                | NodeKind::Member
                | NodeKind::Index
                | NodeKind::FunctionCall
                | NodeKind::Lambda
        ) {
            return false;
        }
        if kind == TokenKind::Minus && !self.minus_is_prefix() {
            return false;
        }
        match infix_precedence(kind) {
            None => true,
            Some(infix) => infix < precedence || kind == TokenKind::Minus,
        }
    }

    /// `f -1` passes a negative argument; `a - 1` and `a-1` subtract.
    fn minus_is_prefix(&self) -> bool {
        let minus = self.cur();
        let next = self.peek();
        let attached = next.line == minus.line && next.column == minus.column + 1;
        let spaced = self
            .previous()
            .is_none_or(|prev| prev.line != minus.line || minus.column > source_end(prev));
        attached && spaced
    }

    fn parse_application(&mut self, callee: NodeId, precedence: Precedence) -> Option<NodeId> {
        let mut args = vec![self.parse_expression(Precedence::Term)?];
        if precedence <= Precedence::Comma {
            while self.cur_is(TokenKind::Comma) {
                self.advance();
                args.push(self.parse_expression(Precedence::Term)?);
            }
        }
        let arguments = self.ast.add(NodeKind::Arguments, None, args);
        Some(
            self.ast
                .add(NodeKind::FunctionCall, None, vec![callee, arguments]),
        )
    }

    // -----------------------------------------------------------------
    // Prefix handlers
    // -----------------------------------------------------------------

    fn parse_prefix(&mut self) -> Option<NodeId> {
        let token = self.cur().clone();
        match token.kind {
            TokenKind::Ident => {
                self.advance();
                Some(self.ast.add(NodeKind::Identifier, Some(token), Vec::new()))
            }
            TokenKind::Int
            | TokenKind::Float
            | TokenKind::Str
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null => {
                self.advance();
                Some(self.ast.add(NodeKind::Literal, Some(token), Vec::new()))
            }
            TokenKind::Underscore => {
                self.advance();
                Some(self.ast.add(NodeKind::Wildcard, Some(token), Vec::new()))
            }
            TokenKind::Minus | TokenKind::Bang | TokenKind::Not => {
                self.advance();
                let operand = self.parse_expression(Precedence::Unary)?;
                Some(self.ast.add(NodeKind::Operator, Some(token), vec![operand]))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RParen)?;
                Some(inner)
            }
            TokenKind::LBracket => self.parse_sequence(NodeKind::List, token),
            TokenKind::List => {
                self.advance();
                self.parse_sequence(NodeKind::List, token)
            }
            TokenKind::Vector => {
                self.advance();
                self.parse_sequence(NodeKind::Vector, token)
            }
            TokenKind::LBrace => self.parse_dict(token),
            TokenKind::Dict => {
                self.advance();
                self.parse_dict(token)
            }
            TokenKind::Fn => self.parse_lambda(),
            TokenKind::Ok | TokenKind::Err => {
                self.advance();
                let value = self.parse_expression(Precedence::Term)?;
                Some(
                    self.ast
                        .add(NodeKind::ResultValue, Some(token), vec![value]),
                )
            }
            TokenKind::Illegal => {
                self.advance();
                self.unexpected(&token, "");
                None
            }
            _ => {
                self.unexpected(&token, &format!("unexpected {}", describe(&token)));
                None
            }
        }
    }

    /// `[a, b, ...]` after an optional `list` / `vector` keyword.
    fn parse_sequence(&mut self, kind: NodeKind, opener: Token) -> Option<NodeId> {
        self.expect(TokenKind::LBracket)?;
        let mut elements = Vec::new();
        while !self.cur_is(TokenKind::RBracket) {
            elements.push(self.parse_expression(Precedence::Ternary)?);
            if self.cur_is(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBracket)?;
        Some(self.ast.add(kind, Some(opener), elements))
    }

    /// `{key: value, ...}` after an optional `dict` keyword.
    fn parse_dict(&mut self, opener: Token) -> Option<NodeId> {
        self.expect(TokenKind::LBrace)?;
        let mut entries = Vec::new();
        while !self.cur_is(TokenKind::RBrace) {
            let key = match self.cur().kind {
                TokenKind::Ident | TokenKind::Str => self.advance(),
                _ => {
                    let found = self.cur().clone();
                    self.unexpected(
                        &found,
                        &format!("expected dict key but got {}", describe(&found)),
                    );
                    return None;
                }
            };
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expression(Precedence::Ternary)?;
            entries.push(self.ast.add(NodeKind::DictEntry, Some(key), vec![value]));
            if self.cur_is(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Some(self.ast.add(NodeKind::Dict, Some(opener), entries))
    }

    /// `fn a, b -> body` or `fn (a, b) -> body`; the body may be a block.
    fn parse_lambda(&mut self) -> Option<NodeId> {
        let keyword = self.advance();
        let parenthesized = self.cur_is(TokenKind::LParen);
        if parenthesized {
            self.advance();
        }

        let mut params = Vec::new();
        while self.cur_is(TokenKind::Ident) {
            params.push(self.parse_parameter()?);
            if self.cur_is(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        if parenthesized {
            self.expect(TokenKind::RParen)?;
        }
        let params = self.ast.add(NodeKind::Parameters, None, params);

        self.expect(TokenKind::Arrow)?;
        let body = if self.cur_is(TokenKind::Newline) && self.peek_is(TokenKind::Indent) {
            self.parse_block()
        } else {
            self.parse_expression(Precedence::Ternary)?
        };

        Some(
            self.ast
                .add(NodeKind::Lambda, Some(keyword), vec![params, body]),
        )
    }

    // -----------------------------------------------------------------
    // Infix handlers
    // -----------------------------------------------------------------

    fn parse_infix(&mut self, left: NodeId, precedence: Precedence) -> Option<NodeId> {
        let token = self.advance();
        match token.kind {
            TokenKind::Assign => {
                let value = self.parse_expression(Precedence::Assignment)?;
                Some(
                    self.ast
                        .add(NodeKind::Operator, Some(token), vec![left, value]),
                )
            }
            TokenKind::Pipe => {
                let target = self.parse_expression(Precedence::Pipe.next())?;
                Some(self.ast.add(NodeKind::Pipe, Some(token), vec![left, target]))
            }
            TokenKind::DoubleStar => {
                let right = self.parse_expression(Precedence::Exponent)?;
                Some(
                    self.ast
                        .add(NodeKind::Operator, Some(token), vec![left, right]),
                )
            }
            TokenKind::Dot => {
                let member = self.expect(TokenKind::Ident)?;
                Some(self.ast.add(NodeKind::Member, Some(member), vec![left]))
            }
            TokenKind::LBracket => {
                let index = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RBracket)?;
                Some(self.ast.add(NodeKind::Index, Some(token), vec![left, index]))
            }
            TokenKind::LParen => self.parse_call(left),
            _ => {
                let right = self.parse_expression(precedence.next())?;
                Some(
                    self.ast
                        .add(NodeKind::Operator, Some(token), vec![left, right]),
                )
            }
        }
    }

    /// `callee(a, b)` with the opening parenthesis already consumed.
    fn parse_call(&mut self, callee: NodeId) -> Option<NodeId> {
        let mut args = Vec::new();
        while !self.cur_is(TokenKind::RParen) {
            args.push(self.parse_expression(Precedence::Ternary)?);
            if self.cur_is(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        let arguments = self.ast.add(NodeKind::Arguments, None, args);
        Some(
            self.ast
                .add(NodeKind::FunctionCall, None, vec![callee, arguments]),
        )
    }

    /// `value if condition else other`
    fn parse_ternary(&mut self, then_value: NodeId) -> Option<NodeId> {
        let keyword = self.advance();
        let condition = self.parse_expression(Precedence::Ternary.next())?;
        self.expect(TokenKind::Else)?;
        let else_value = self.parse_expression(Precedence::Ternary)?;
        Some(self.ast.add(
            NodeKind::Ternary,
            Some(keyword),
            vec![condition, then_value, else_value],
        ))
    }
}

/// Column just past `token` in the source.
fn source_end(token: &Token) -> usize {
    let width = match token.kind {
        TokenKind::Str => token.literal.chars().count() + 2,
        TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof => 0,
        _ => token.literal.chars().count(),
    };
    token.column + width
}
