use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::abi::CppAbi;
use crate::analyzer::{Analysis, analyze};
use crate::ast::{Ast, NodeId};
use crate::builtins::BuiltinRegistry;
use crate::diagnostic::{Diagnostic, Phase};
use crate::error::CoreError;
use crate::lexer::tokenize;
use crate::library::LibraryIndex;
use crate::loader::resolve_imports;
use crate::lower::lower;
use crate::parser::{ParseResult, parse};

/// Settings shared by every stage of one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Search root for non-relative imports such as `use 'math'`.
    pub library_root: Option<PathBuf>,
    pub builtins: BuiltinRegistry,
    /// Name of the generated entry function.
    pub entry_name: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            library_root: None,
            builtins: BuiltinRegistry::standard(),
            entry_name: "main".to_string(),
        }
    }
}

/// A program that passed analysis with no diagnostics.
#[derive(Debug)]
pub struct CheckedProgram {
    pub ast: Ast,
    pub root: NodeId,
    pub analysis: Analysis,
    /// Files spliced in by imports, in load order.
    pub imports: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationArtifact {
    pub cpp: String,
    pub imports: Vec<PathBuf>,
}

/// Parses `source`, failing on any lex or parse diagnostic.
pub fn parse_source(source: &str) -> Result<ParseResult, CoreError> {
    let tokens = tokenize(source);
    debug!(tokens = tokens.len(), "tokenized source");
    let parsed = parse(tokens);
    front_end_result(parsed.diagnostics.clone())?;
    Ok(parsed)
}

/// Runs every stage up to analysis. `path` is the file `source` came
/// from; relative imports resolve against its directory.
pub fn check(
    source: &str,
    path: Option<&Path>,
    options: &CompilerOptions,
) -> Result<CheckedProgram, CoreError> {
    let ParseResult { mut ast, root, .. } = parse_source(source)?;

    let library = options
        .library_root
        .as_deref()
        .map(LibraryIndex::scan)
        .transpose()?;
    let origin = path.map_or_else(|| PathBuf::from("<input>"), Path::to_path_buf);
    let imports = resolve_imports(&mut ast, root, &origin, library.as_ref())?;

    let analysis = analyze(&ast, root, &options.builtins);
    if !analysis.is_ok() {
        return Err(CoreError::Semantic(analysis.diagnostics));
    }
    Ok(CheckedProgram {
        ast,
        root,
        analysis,
        imports,
    })
}

/// Compiles `source` to C++.
pub fn emit(
    source: &str,
    path: Option<&Path>,
    options: &CompilerOptions,
) -> Result<CompilationArtifact, CoreError> {
    let program = check(source, path, options)?;
    let cpp = lower(
        &program.ast,
        program.root,
        &program.analysis,
        &options.builtins,
        &CppAbi,
        &options.entry_name,
    );
    Ok(CompilationArtifact {
        cpp,
        imports: program.imports,
    })
}

pub fn check_file(path: &Path, options: &CompilerOptions) -> Result<CheckedProgram, CoreError> {
    let source = fs::read_to_string(path)?;
    check(&source, Some(path), options)
}

pub fn compile_file(
    path: &Path,
    options: &CompilerOptions,
) -> Result<CompilationArtifact, CoreError> {
    let source = fs::read_to_string(path)?;
    emit(&source, Some(path), options)
}

/// Lex diagnostics take precedence: a stream with illegal tokens reports
/// those alone.
fn front_end_result(diagnostics: Vec<Diagnostic>) -> Result<(), CoreError> {
    if diagnostics.is_empty() {
        return Ok(());
    }
    let (lex, parse): (Vec<_>, Vec<_>) = diagnostics
        .into_iter()
        .partition(|d| d.phase == Phase::Lex);
    if lex.is_empty() {
        Err(CoreError::Parse(parse))
    } else {
        Err(CoreError::Lex(lex))
    }
}
