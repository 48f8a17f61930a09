use std::path::PathBuf;

use thiserror::Error;

use crate::diagnostic::{Diagnostic, render};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read source: {0}")]
    SourceIo(#[from] std::io::Error),
    #[error("library root was not found at {0}")]
    MissingLibrary(PathBuf),
    #[error("import error: {0}")]
    Import(String),
    #[error("lex errors:\n{}", render(.0))]
    Lex(Vec<Diagnostic>),
    #[error("parse errors:\n{}", render(.0))]
    Parse(Vec<Diagnostic>),
    #[error("type errors:\n{}", render(.0))]
    Semantic(Vec<Diagnostic>),
}

impl CoreError {
    /// Diagnostics carried by a stage failure, empty for I/O and import errors.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            CoreError::Lex(d) | CoreError::Parse(d) | CoreError::Semantic(d) => d,
            _ => &[],
        }
    }
}
