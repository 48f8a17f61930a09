//! Core compiler pipeline for the Quark language.
//!
//! The pipeline is roughly:
//!
//!   source .qrk
//!     -> lexer    (tokens, INDENT/DEDENT, line joining)
//!     -> parser   (arena AST, Pratt expressions)
//!     -> loader   (`use './file'` splicing, library lookup)
//!     -> analyzer (types, bindings, closure captures)
//!     -> lower    (C++ over the dynamic-value runtime ABI)
//!
//! The CLI and any other front ends should depend on this crate rather
//! than reimplementing the pipeline.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod token;
pub mod lexer;
pub mod ast;
mod expr;
pub mod parser;

// ---------------------------------------------------------------------
// Semantic layers: types, scopes, builtins, analysis
// ---------------------------------------------------------------------

pub mod types;
pub mod scope;
pub mod builtins;
pub mod analyzer;

// ---------------------------------------------------------------------
// Back-end: runtime ABI and lowering
// ---------------------------------------------------------------------

pub mod abi;
pub mod lower;

// ---------------------------------------------------------------------
// Imports and compiler orchestration
// ---------------------------------------------------------------------

pub mod library;
pub mod loader;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{
    CheckedProgram, CompilationArtifact, CompilerOptions, check, check_file, compile_file, emit,
    parse_source,
};
pub use diagnostic::{Diagnostic, Phase};
pub use error::CoreError;
pub use library::{LibraryIndex, default_library_root};
