//! Multi-file imports.
//!
//! `use './path'` statements at the top level of a file are replaced by
//! the imported file's top-level statements, followed by a synthetic
//! `use <module>` for each module that file defines. Every file is parsed
//! into the same arena, so the result is one tree the analyzer sees as a
//! single program.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::ast::{Ast, NodeId, NodeKind};
use crate::error::CoreError;
use crate::lexer::tokenize;
use crate::library::{LibraryIndex, SOURCE_EXTENSION};
use crate::parser::parse_into;
use crate::token::{Token, TokenKind};

/// Resolves the file imports of the program rooted at `root`, which was
/// parsed from `current_file`. Returns the imported files in load order.
pub fn resolve_imports(
    ast: &mut Ast,
    root: NodeId,
    current_file: &Path,
    library: Option<&LibraryIndex>,
) -> Result<Vec<PathBuf>, CoreError> {
    let mut loader = ModuleLoader::new(library);
    loader.resolve(ast, root, current_file);
    loader.finish()
}

/// Import resolver state for one compilation.
#[derive(Debug)]
pub struct ModuleLoader<'l> {
    library: Option<&'l LibraryIndex>,
    loaded: HashSet<PathBuf>,
    /// Files whose imports are being resolved, outermost first.
    stack: Vec<PathBuf>,
    files: Vec<PathBuf>,
    errors: Vec<String>,
}

impl<'l> ModuleLoader<'l> {
    pub fn new(library: Option<&'l LibraryIndex>) -> Self {
        ModuleLoader {
            library,
            loaded: HashSet::new(),
            stack: Vec::new(),
            files: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn resolve(&mut self, ast: &mut Ast, root: NodeId, current_file: &Path) {
        let path = absolute(current_file);
        self.stack.push(path.clone());
        self.resolve_node(ast, root, &path);
        self.stack.pop();
        self.loaded.insert(path);
    }

    /// Imported files in load order, or every error joined by newlines.
    pub fn finish(self) -> Result<Vec<PathBuf>, CoreError> {
        if self.errors.is_empty() {
            Ok(self.files)
        } else {
            Err(CoreError::Import(self.errors.join("\n")))
        }
    }

    fn resolve_node(&mut self, ast: &mut Ast, node: NodeId, current_file: &Path) {
        let dir = current_file.parent().map(Path::to_path_buf).unwrap_or_default();
        let children = ast.children(node).to_vec();
        let mut spliced = Vec::with_capacity(children.len());

        for child in children {
            let Some((target, line)) = file_import(ast, child) else {
                spliced.push(child);
                continue;
            };
            let Some(path) = self.locate(&dir, &target, line) else {
                continue;
            };
            let path = absolute(&path);

            if let Some(start) = self.stack.iter().position(|p| *p == path) {
                let chain: Vec<String> = self.stack[start..]
                    .iter()
                    .chain(std::iter::once(&path))
                    .map(|p| display_name(p))
                    .collect();
                self.errors.push(format!(
                    "line {line}: circular import detected: {}",
                    chain.join(" -> ")
                ));
                continue;
            }
            if self.loaded.contains(&path) {
                trace!(path = %path.display(), "import already loaded");
                continue;
            }
            if !path.is_file() {
                self.errors.push(format!(
                    "line {line}: cannot find module '{target}': file '{}' does not exist",
                    path.display()
                ));
                continue;
            }
            let source = match fs::read_to_string(&path) {
                Ok(source) => source,
                Err(err) => {
                    self.errors.push(format!(
                        "line {line}: cannot read '{}': {err}",
                        path.display()
                    ));
                    continue;
                }
            };

            let (imported, diagnostics) = parse_into(ast, tokenize(&source));
            if !diagnostics.is_empty() {
                for diagnostic in diagnostics {
                    self.errors.push(format!("in '{target}': {diagnostic}"));
                }
                continue;
            }
            let modules: Vec<String> = ast
                .children(imported)
                .iter()
                .filter(|&&stmt| ast.kind(stmt) == NodeKind::Module)
                .map(|&stmt| ast.literal(stmt).to_string())
                .collect();

            self.stack.push(path.clone());
            self.resolve_node(ast, imported, &path);
            self.stack.pop();
            self.loaded.insert(path.clone());
            self.files.push(path.clone());

            if modules.is_empty() {
                self.errors.push(format!(
                    "line {line}: imported file '{target}' does not define a module"
                ));
                continue;
            }
            spliced.extend_from_slice(ast.children(imported));
            for module in modules {
                let token = Token::new(TokenKind::Ident, module, line, 0);
                spliced.push(ast.add(NodeKind::Use, Some(token), Vec::new()));
            }
            debug!(path = %path.display(), "spliced import");
        }

        ast.set_children(node, spliced);
    }

    /// File for an import target: relative to `dir` for `./` and `../`
    /// paths, else looked up in the library index.
    fn locate(&mut self, dir: &Path, target: &str, line: usize) -> Option<PathBuf> {
        if target.starts_with("./") || target.starts_with("../") {
            return Some(dir.join(format!("{target}.{SOURCE_EXTENSION}")));
        }
        let Some(library) = self.library else {
            self.errors.push(format!(
                "line {line}: library imports require a library root ('{target}')"
            ));
            return None;
        };
        match library.find(target) {
            Some(path) => Some(path.to_path_buf()),
            None => {
                self.errors.push(format!(
                    "line {line}: cannot find library module '{target}' under '{}'",
                    library.root().display()
                ));
                None
            }
        }
    }
}

/// Target and line of a `use './path'` statement.
fn file_import(ast: &Ast, node: NodeId) -> Option<(String, usize)> {
    if ast.kind(node) != NodeKind::Use {
        return None;
    }
    let token = ast.token(node)?;
    (token.kind == TokenKind::Str).then(|| (token.literal.clone(), token.line))
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn display_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn load(entry: &Path, library: Option<&LibraryIndex>) -> (Ast, NodeId, Result<Vec<PathBuf>, CoreError>) {
        let source = fs::read_to_string(entry).expect("read entry");
        let parsed = parse(tokenize(&source));
        assert!(parsed.diagnostics.is_empty(), "{:?}", parsed.diagnostics);
        let mut ast = parsed.ast;
        let result = resolve_imports(&mut ast, parsed.root, entry, library);
        (ast, parsed.root, result)
    }

    fn top_level(ast: &Ast, root: NodeId) -> Vec<String> {
        ast.children(root)
            .iter()
            .map(|&id| format!("{:?} {}", ast.kind(id), ast.literal(id)))
            .collect()
    }

    #[test]
    fn import_is_replaced_by_module_and_use() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("shapes.qrk"), "module shapes:\n    fn area(r) -> r * r\n")
            .expect("write");
        let entry = dir.path().join("main.qrk");
        fs::write(&entry, "use './shapes'\nprintln area 2\n").expect("write");

        let (ast, root, result) = load(&entry, None);
        let files = result.expect("imports resolve");
        assert_eq!(files.len(), 1);
        assert_eq!(
            top_level(&ast, root),
            vec!["Module shapes", "Use shapes", "FunctionCall "]
        );
    }

    #[test]
    fn shared_imports_are_loaded_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("base.qrk"), "module base:\n    one = 1\n").expect("write");
        fs::write(dir.path().join("left.qrk"), "use './base'\nmodule left:\n    l = 2\n")
            .expect("write");
        fs::write(dir.path().join("right.qrk"), "use './base'\nmodule right:\n    r = 3\n")
            .expect("write");
        let entry = dir.path().join("main.qrk");
        fs::write(&entry, "use './left'\nuse './right'\n").expect("write");

        let (ast, root, result) = load(&entry, None);
        assert_eq!(result.expect("imports resolve").len(), 3);
        assert_eq!(
            top_level(&ast, root),
            vec![
                "Module base",
                "Use base",
                "Module left",
                "Use left",
                "Module right",
                "Use right",
            ]
        );
    }

    #[test]
    fn cycles_report_the_import_chain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let entry = dir.path().join("a.qrk");
        fs::write(&entry, "use './b'\nmodule a:\n    x = 1\n").expect("write");
        fs::write(dir.path().join("b.qrk"), "use './a'\nmodule b:\n    y = 2\n").expect("write");

        let (_, _, result) = load(&entry, None);
        let err = result.expect_err("cycle");
        assert!(
            err.to_string().contains("circular import detected: a -> b -> a"),
            "{err}"
        );
    }

    #[test]
    fn imported_file_needs_a_module() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("loose.qrk"), "x = 1\n").expect("write");
        let entry = dir.path().join("main.qrk");
        fs::write(&entry, "use './loose'\n").expect("write");

        let (_, _, result) = load(&entry, None);
        let err = result.expect_err("no module");
        assert!(err.to_string().contains("imported file './loose' does not define a module"));
    }

    #[test]
    fn missing_files_and_library_roots_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let entry = dir.path().join("main.qrk");
        fs::write(&entry, "use './ghost'\nuse 'math'\n").expect("write");

        let (_, _, result) = load(&entry, None);
        let message = result.expect_err("errors").to_string();
        assert!(message.contains("cannot find module './ghost'"), "{message}");
        assert!(message.contains("library imports require a library root"), "{message}");
    }

    #[test]
    fn library_imports_use_the_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lib = dir.path().join("lib");
        fs::create_dir_all(&lib).expect("mkdir");
        fs::write(lib.join("stats.qrk"), "module stats:\n    fn mean(a, b) -> (a + b) / 2\n")
            .expect("write");
        let entry = dir.path().join("main.qrk");
        fs::write(&entry, "use 'stats'\n").expect("write");

        let index = LibraryIndex::scan(&lib).expect("scan");
        let (ast, root, result) = load(&entry, Some(&index));
        result.expect("library import resolves");
        assert_eq!(top_level(&ast, root), vec!["Module stats", "Use stats"]);
    }
}
