//! Lexer for Quark.
//!
//! Lexing runs in three passes over an internal raw-token stream:
//!
//!   source text
//!     -> scan     (raw tokens, line-start depths, bracket-aware newlines)
//!     -> annotate (which line-start tokens must open an indented block)
//!     -> indent   (INDENT / DEDENT / ILLEGAL injection)
//!
//! The lexer is total: malformed input turns into `Illegal` tokens whose
//! literal carries the message, and the parser reports them.

use tracing::debug;

use crate::token::{Token, TokenKind, keyword};

/// Lex a source string into an indentation-normalized token stream.
///
/// The returned stream always ends with `Eof`.
pub fn tokenize(source: &str) -> Vec<Token> {
    let mut scanner = Scanner {
        chars: source.chars().collect(),
        index: 0,
        line: 1,
        column: 1,
        nesting: 0,
        line_start: true,
        line_depth: None,
        tokens: Vec::new(),
    };
    let raw = scanner.run();
    let annotated = annotate(raw);
    let tokens = apply_indentation(annotated);
    debug!(count = tokens.len(), "tokenized source");
    tokens
}

/// A token from the scan pass. `depth` is set on the first token of a
/// line outside brackets and holds that line's indentation width.
#[derive(Debug, Clone)]
struct RawToken {
    token: Token,
    depth: Option<usize>,
}

/// A raw token after the annotate pass.
#[derive(Debug, Clone)]
struct AnnotatedToken {
    token: Token,
    depth: Option<usize>,
    must_indent: bool,
}

struct Scanner {
    chars: Vec<char>,
    index: usize,
    line: usize,
    column: usize,
    /// Open `()`, `[]` and `{}` pairs. Newlines are suppressed while non-zero.
    nesting: usize,
    line_start: bool,
    line_depth: Option<usize>,
    tokens: Vec<RawToken>,
}

impl Scanner {
    fn run(&mut self) -> Vec<RawToken> {
        while let Some(ch) = self.peek_char() {
            if self.line_start && self.nesting == 0 {
                self.measure_line();
                continue;
            }

            match ch {
                ' ' | '\t' | '\r' => {
                    self.consume_char();
                }
                '\n' => self.newline(),
                '/' if self.peek_next() == Some('/') => self.skip_comment(),
                '\'' => self.lex_string(),
                '0'..='9' => self.lex_number(),
                '.' if self.starts_fraction() => self.lex_number(),
                _ if is_ident_start(ch) => self.lex_ident_or_keyword(),
                _ => self.lex_operator(ch),
            }
        }

        if self
            .tokens
            .last()
            .is_some_and(|raw| raw.token.kind != TokenKind::Newline)
        {
            let (line, column) = (self.line, self.column);
            self.push(Token::new(TokenKind::Newline, "\n", line, column));
        }

        std::mem::take(&mut self.tokens)
    }

    /// Measure the indentation of a fresh line. Blank and comment-only
    /// lines are dropped without touching the line-start state.
    fn measure_line(&mut self) {
        let mut depth = 0;
        while let Some(' ' | '\t') = self.peek_char() {
            self.consume_char();
            depth += 1;
        }
        match self.peek_char() {
            None => self.line_start = false,
            Some('\n') => self.newline(),
            Some('\r') => {
                self.consume_char();
            }
            Some('/') if self.peek_next() == Some('/') => self.skip_comment(),
            Some(_) => {
                self.line_start = false;
                self.line_depth = Some(depth);
            }
        }
    }

    fn newline(&mut self) {
        let (line, column) = (self.line, self.column);
        self.consume_char();
        if self.nesting > 0 {
            return;
        }
        let previous_is_newline = self
            .tokens
            .last()
            .is_none_or(|raw| raw.token.kind == TokenKind::Newline);
        if !previous_is_newline {
            self.push(Token::new(TokenKind::Newline, "\n", line, column));
        }
        self.line_start = true;
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.consume_char();
        }
    }

    fn push(&mut self, token: Token) {
        let depth = if token.kind == TokenKind::Newline {
            None
        } else {
            self.line_depth.take()
        };
        self.tokens.push(RawToken { token, depth });
    }

    fn simple(&mut self, kind: TokenKind, text: &str) {
        let (line, column) = (self.line, self.column);
        for _ in text.chars() {
            self.consume_char();
        }
        self.push(Token::new(kind, text, line, column));
    }

    fn lex_operator(&mut self, ch: char) {
        let next = self.peek_next();
        match (ch, next) {
            ('*', Some('*')) => self.simple(TokenKind::DoubleStar, "**"),
            ('-', Some('>')) => self.simple(TokenKind::Arrow, "->"),
            ('=', Some('=')) => self.simple(TokenKind::Eq, "=="),
            ('!', Some('=')) => self.simple(TokenKind::NotEq, "!="),
            ('<', Some('=')) => self.simple(TokenKind::Lte, "<="),
            ('>', Some('=')) => self.simple(TokenKind::Gte, ">="),
            ('.', Some('.')) => self.simple(TokenKind::DotDot, ".."),
            ('+', _) => self.simple(TokenKind::Plus, "+"),
            ('-', _) => self.simple(TokenKind::Minus, "-"),
            ('*', _) => self.simple(TokenKind::Star, "*"),
            ('/', _) => self.simple(TokenKind::Slash, "/"),
            ('%', _) => self.simple(TokenKind::Percent, "%"),
            ('!', _) => self.simple(TokenKind::Bang, "!"),
            ('=', _) => self.simple(TokenKind::Assign, "="),
            ('<', _) => self.simple(TokenKind::Lt, "<"),
            ('>', _) => self.simple(TokenKind::Gt, ">"),
            ('&', _) => self.simple(TokenKind::Amper, "&"),
            ('.', _) => self.simple(TokenKind::Dot, "."),
            (',', _) => self.simple(TokenKind::Comma, ","),
            ('|', _) => self.simple(TokenKind::Pipe, "|"),
            (':', _) => self.simple(TokenKind::Colon, ":"),
            ('(', _) => {
                self.nesting += 1;
                self.simple(TokenKind::LParen, "(")
            }
            ('[', _) => {
                self.nesting += 1;
                self.simple(TokenKind::LBracket, "[")
            }
            ('{', _) => {
                self.nesting += 1;
                self.simple(TokenKind::LBrace, "{")
            }
            (')', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                self.simple(TokenKind::RParen, ")")
            }
            (']', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                self.simple(TokenKind::RBracket, "]")
            }
            ('}', _) => {
                self.nesting = self.nesting.saturating_sub(1);
                self.simple(TokenKind::RBrace, "}")
            }
            _ => {
                let (line, column) = (self.line, self.column);
                self.consume_char();
                self.push(Token::new(
                    TokenKind::Illegal,
                    format!("illegal character '{ch}'"),
                    line,
                    column,
                ));
            }
        }
    }

    fn lex_string(&mut self) {
        let (line, column) = (self.line, self.column);
        self.consume_char(); // opening quote

        let mut value = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => {
                    self.push(Token::new(
                        TokenKind::Illegal,
                        "unterminated string",
                        line,
                        column,
                    ));
                    return;
                }
                Some('\'') => {
                    self.consume_char();
                    break;
                }
                Some('\\') => {
                    self.consume_char();
                    match self.peek_char() {
                        Some('\'') => value.push('\''),
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('\\') => value.push('\\'),
                        Some('r') => value.push('\r'),
                        Some('0') => value.push('\0'),
                        Some('\n') | None => {
                            value.push('\\');
                            continue;
                        }
                        Some(other) => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                    self.consume_char();
                }
                Some(ch) => {
                    value.push(ch);
                    self.consume_char();
                }
            }
        }

        self.push(Token::new(TokenKind::Str, value, line, column));
    }

    /// `.5` is a float unless the dot reads as member access.
    fn starts_fraction(&self) -> bool {
        let digit_follows = self.peek_next().is_some_and(|c| c.is_ascii_digit());
        let after_value = self.tokens.last().is_some_and(|raw| {
            matches!(
                raw.token.kind,
                TokenKind::Ident | TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace
            )
        });
        digit_follows && !after_value
    }

    fn lex_number(&mut self) {
        let (line, column) = (self.line, self.column);
        let mut text = String::new();
        let mut is_float = false;

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.consume_char();
            } else {
                break;
            }
        }

        // `2.` is a float, but `2..5` is a range.
        if self.peek_char() == Some('.') && self.peek_next() != Some('.') {
            is_float = true;
            text.push('.');
            self.consume_char();
            while let Some(ch) = self.peek_char() {
                if ch.is_ascii_digit() {
                    text.push(ch);
                    self.consume_char();
                } else {
                    break;
                }
            }
        }

        let kind = if is_float {
            TokenKind::Float
        } else {
            TokenKind::Int
        };
        self.push(Token::new(kind, text, line, column));
    }

    fn lex_ident_or_keyword(&mut self) {
        let (line, column) = (self.line, self.column);

        if self.peek_char() == Some('_') && !self.peek_next().is_some_and(is_ident_continue) {
            self.simple(TokenKind::Underscore, "_");
            return;
        }

        let mut text = String::new();
        while let Some(ch) = self.peek_char() {
            if is_ident_continue(ch) {
                text.push(ch);
                self.consume_char();
            } else {
                break;
            }
        }

        let kind = keyword(&text).unwrap_or(TokenKind::Ident);
        self.push(Token::new(kind, text, line, column));
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.index += 1;
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndentState {
    NoIndent,
    MayIndent,
    MustIndent,
}

/// `:` and `->` allow an indented block; the following newline demands
/// one; any other token cancels the request.
fn annotate(raw: Vec<RawToken>) -> Vec<AnnotatedToken> {
    let mut state = IndentState::NoIndent;
    let mut out = Vec::with_capacity(raw.len());

    for RawToken { token, depth } in raw {
        let mut must_indent = false;
        match token.kind {
            TokenKind::Colon | TokenKind::Arrow => state = IndentState::MayIndent,
            TokenKind::Newline => {
                if state == IndentState::MayIndent {
                    state = IndentState::MustIndent;
                }
            }
            _ => {
                must_indent = depth.is_some() && state == IndentState::MustIndent;
                state = IndentState::NoIndent;
            }
        }
        out.push(AnnotatedToken {
            token,
            depth,
            must_indent,
        });
    }

    out
}

fn apply_indentation(tokens: Vec<AnnotatedToken>) -> Vec<Token> {
    let mut stack = vec![0usize];
    let mut out = Vec::with_capacity(tokens.len() + 8);
    let (mut last_line, mut last_column) = (1, 1);

    for AnnotatedToken {
        token,
        depth,
        must_indent,
    } in tokens
    {
        // A line opening with `|` continues the previous expression.
        let depth = depth.filter(|_| token.kind != TokenKind::Pipe);
        if let Some(depth) = depth {
            let top = stack.last().copied().unwrap_or(0);
            let (line, column) = (token.line, token.column);
            if must_indent {
                if depth > top {
                    stack.push(depth);
                    out.push(Token::new(TokenKind::Indent, "", line, column));
                } else {
                    out.push(Token::new(
                        TokenKind::Illegal,
                        "expected indented block",
                        line,
                        column,
                    ));
                }
            } else if depth > top {
                out.push(Token::new(
                    TokenKind::Illegal,
                    "unexpected indent",
                    line,
                    column,
                ));
            } else if depth < top {
                while stack.len() > 1 && stack.last().is_some_and(|&d| d > depth) {
                    stack.pop();
                    out.push(Token::new(TokenKind::Dedent, "", line, column));
                }
                if stack.last().copied() != Some(depth) {
                    out.push(Token::new(
                        TokenKind::Illegal,
                        "inconsistent indentation",
                        line,
                        column,
                    ));
                }
            }
        }
        last_line = token.line;
        last_column = token.column;
        out.push(token);
    }

    while stack.len() > 1 {
        stack.pop();
        out.push(Token::new(TokenKind::Dedent, "", last_line, last_column));
    }
    out.push(Token::new(TokenKind::Eof, "", last_line, last_column));
    out
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn indented_block_opens_and_closes() {
        let tokens = kinds("if true:\n    x\n");
        assert_eq!(
            tokens,
            vec![
                TokenKind::If,
                TokenKind::True,
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Ident,
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn missing_indent_is_illegal() {
        let tokens = tokenize("if true:\nx\n");
        let illegal = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Illegal)
            .expect("illegal token");
        assert!(illegal.literal.contains("expected indented block"));
    }

    #[test]
    fn unexpected_and_inconsistent_indentation() {
        let unexpected = tokenize("x = 1\n    y = 2\n");
        assert!(
            unexpected
                .iter()
                .any(|t| t.kind == TokenKind::Illegal && t.literal == "unexpected indent")
        );

        let inconsistent = tokenize("if a:\n    b\n  c\n");
        assert!(
            inconsistent
                .iter()
                .any(|t| t.kind == TokenKind::Illegal && t.literal == "inconsistent indentation")
        );
    }

    #[test]
    fn indents_and_dedents_balance() {
        let source = "fn f(x) ->\n    if x:\n        when x:\n            1 -> 'a'\n            _ -> 'b'\n    else:\n        x\nf 1\n";
        let tokens = kinds(source);
        let mut depth = 0i32;
        for kind in &tokens {
            match kind {
                TokenKind::Indent => depth += 1,
                TokenKind::Dedent => {
                    depth -= 1;
                    assert!(depth >= 0, "dedent without indent");
                }
                TokenKind::Illegal => panic!("unexpected illegal token"),
                _ => {}
            }
        }
        assert_eq!(depth, 0);
        let indents = tokens.iter().filter(|k| **k == TokenKind::Indent).count();
        assert_eq!(indents, 4);
    }

    #[test]
    fn blank_and_comment_lines_are_dropped() {
        let tokens = kinds("if x:\n\n    // note\n    y\n\n\nz\n");
        assert!(!tokens.contains(&TokenKind::Illegal));
        assert_eq!(
            tokens.iter().filter(|k| **k == TokenKind::Newline).count(),
            3
        );
    }

    #[test]
    fn inline_block_needs_no_indent() {
        let tokens = kinds("if x: y\nz\n");
        assert!(!tokens.contains(&TokenKind::Indent));
        assert!(!tokens.contains(&TokenKind::Illegal));
    }

    #[test]
    fn newlines_inside_brackets_are_suppressed() {
        let tokens = kinds("xs = [\n    1,\n    2\n]\n");
        assert_eq!(
            tokens.iter().filter(|k| **k == TokenKind::Newline).count(),
            1
        );
        assert!(!tokens.contains(&TokenKind::Indent));
    }

    #[test]
    fn longest_match_operators() {
        let tokens = kinds("a ** b -> c == d != e <= f >= g .. h");
        assert_eq!(
            &tokens[..15],
            &[
                TokenKind::Ident,
                TokenKind::DoubleStar,
                TokenKind::Ident,
                TokenKind::Arrow,
                TokenKind::Ident,
                TokenKind::Eq,
                TokenKind::Ident,
                TokenKind::NotEq,
                TokenKind::Ident,
                TokenKind::Lte,
                TokenKind::Ident,
                TokenKind::Gte,
                TokenKind::Ident,
                TokenKind::DotDot,
                TokenKind::Ident,
            ]
        );
    }

    #[test]
    fn number_forms() {
        let tokens = tokenize(".5 2. 3.25 1..4");
        let summary: Vec<(TokenKind, &str)> = tokens
            .iter()
            .take(6)
            .map(|t| (t.kind, t.literal.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (TokenKind::Float, ".5"),
                (TokenKind::Float, "2."),
                (TokenKind::Float, "3.25"),
                (TokenKind::Int, "1"),
                (TokenKind::DotDot, ".."),
                (TokenKind::Int, "4"),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let tokens = tokenize(r"'it\'s\n\t\\ \q'");
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].literal, "it's\n\t\\ \\q");
    }

    #[test]
    fn unterminated_string_is_illegal() {
        let tokens = tokenize("x = 'abc\ny = 1\n");
        assert!(
            tokens
                .iter()
                .any(|t| t.kind == TokenKind::Illegal && t.literal == "unterminated string")
        );
    }

    #[test]
    fn underscore_and_keywords() {
        let tokens = tokenize("_ _x vector fn ok");
        assert_eq!(tokens[0].kind, TokenKind::Underscore);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].literal, "_x");
        assert_eq!(tokens[2].kind, TokenKind::Vector);
        assert_eq!(tokens[3].kind, TokenKind::Fn);
        assert_eq!(tokens[4].kind, TokenKind::Ok);
    }

    #[test]
    fn positions_are_one_based() {
        let tokens = tokenize("a\n  \nbb = 1\n");
        let bb = tokens
            .iter()
            .find(|t| t.literal == "bb")
            .expect("bb token");
        assert_eq!((bb.line, bb.column), (3, 1));
        let one = tokens.iter().find(|t| t.literal == "1").expect("1 token");
        assert_eq!((one.line, one.column), (3, 6));
    }

    #[test]
    fn leading_pipe_continues_expression() {
        let tokens = kinds("xs\n    | map f\n    | sum\ny\n");
        assert!(!tokens.contains(&TokenKind::Indent));
        assert!(!tokens.contains(&TokenKind::Illegal));
    }

    #[test]
    fn crlf_line_endings() {
        let tokens = kinds("if x:\r\n    y\r\n");
        assert!(tokens.contains(&TokenKind::Indent));
        assert!(!tokens.contains(&TokenKind::Illegal));
    }
}
