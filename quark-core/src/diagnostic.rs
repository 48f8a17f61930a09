//! Diagnostics shared by every compiler stage.

use std::fmt;

/// Stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lex,
    Parse,
    Type,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Lex => "lex",
            Phase::Parse => "parse",
            Phase::Type => "type",
        };
        f.write_str(name)
    }
}

/// A line/column annotated message.
///
/// Stages never abort on these; they are accumulated in a `Vec` and
/// inspected by the pipeline once the stage finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub phase: Phase,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(phase: Phase, line: usize, column: usize, message: impl Into<String>) -> Self {
        Diagnostic {
            phase,
            line,
            column,
            message: message.into(),
        }
    }

    pub fn lex(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(Phase::Lex, line, column, message)
    }

    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(Phase::Parse, line, column, message)
    }

    pub fn type_error(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::new(Phase::Type, line, column, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{}: {}", self.line, self.column, self.message)
    }
}

/// Render a list of diagnostics one per line.
pub fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
