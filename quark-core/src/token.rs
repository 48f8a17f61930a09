//! Token model shared by the lexer and parser.

use std::fmt;

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Special
    Illegal,
    Eof,
    Newline,
    Indent,
    Dedent,

    // Identifiers and literals
    Ident,
    Int,
    Float,
    Str,

    // Operators
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Percent,    // %
    DoubleStar, // **
    Bang,       // !
    Assign,     // =
    Lt,         // <
    Gt,         // >
    Lte,        // <=
    Gte,        // >=
    Eq,         // ==
    NotEq,      // !=
    Arrow,      // ->
    Amper,      // &

    // Punctuation
    LParen,     // (
    RParen,     // )
    LBracket,   // [
    RBracket,   // ]
    LBrace,     // {
    RBrace,     // }
    Dot,        // .
    DotDot,     // ..
    Comma,      // ,
    Pipe,       // |
    Colon,      // :
    Underscore, // _

    // Keywords
    Use,
    Module,
    In,
    And,
    Or,
    Not,
    If,
    ElseIf,
    Else,
    For,
    While,
    When,
    Fn,
    True,
    False,
    Null,
    Ok,
    Err,
    List,
    Dict,
    Vector,
}

impl TokenKind {
    /// Upper-case name used by the `lex` dump.
    pub fn name(self) -> &'static str {
        use TokenKind::*;
        match self {
            Illegal => "ILLEGAL",
            Eof => "EOF",
            Newline => "NEWLINE",
            Indent => "INDENT",
            Dedent => "DEDENT",
            Ident => "ID",
            Int => "INT",
            Float => "FLOAT",
            Str => "STRING",
            Plus => "PLUS",
            Minus => "MINUS",
            Star => "MULTIPLY",
            Slash => "DIVIDE",
            Percent => "MODULO",
            DoubleStar => "DOUBLESTAR",
            Bang => "BANG",
            Assign => "EQUALS",
            Lt => "LT",
            Gt => "GT",
            Lte => "LTE",
            Gte => "GTE",
            Eq => "DEQ",
            NotEq => "NE",
            Arrow => "ARROW",
            Amper => "AMPER",
            LParen => "LPAR",
            RParen => "RPAR",
            LBracket => "LBRACKET",
            RBracket => "RBRACKET",
            LBrace => "LBRACE",
            RBrace => "RBRACE",
            Dot => "DOT",
            DotDot => "DOTDOT",
            Comma => "COMMA",
            Pipe => "PIPE",
            Colon => "COLON",
            Underscore => "UNDERSCORE",
            Use => "USE",
            Module => "MODULE",
            In => "IN",
            And => "AND",
            Or => "OR",
            Not => "NOT",
            If => "IF",
            ElseIf => "ELSEIF",
            Else => "ELSE",
            For => "FOR",
            While => "WHILE",
            When => "WHEN",
            Fn => "FN",
            True => "TRUE",
            False => "FALSE",
            Null => "NULL",
            Ok => "OK",
            Err => "ERR",
            List => "LIST",
            Dict => "DICT",
            Vector => "VECTOR",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Map an identifier to its keyword kind, if it is one.
pub fn keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "use" => TokenKind::Use,
        "module" => TokenKind::Module,
        "in" => TokenKind::In,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "if" => TokenKind::If,
        "elseif" => TokenKind::ElseIf,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "while" => TokenKind::While,
        "when" => TokenKind::When,
        "fn" => TokenKind::Fn,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "ok" => TokenKind::Ok,
        "err" => TokenKind::Err,
        "list" => TokenKind::List,
        "dict" => TokenKind::Dict,
        "vector" => TokenKind::Vector,
        _ => return None,
    };
    Some(kind)
}

/// A single token. Immutable once produced.
///
/// `literal` holds the source text, except for string literals where it
/// holds the unescaped contents and for `Illegal` where it holds the
/// error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            literal: literal.into(),
            line,
            column,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' {}:{}",
            self.kind,
            self.literal.escape_debug(),
            self.line,
            self.column
        )
    }
}
