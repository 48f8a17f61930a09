use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quark_core::lexer::tokenize;
use quark_core::{CompilerOptions, check_file, compile_file, default_library_root, parse_source};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Compiler for the Quark language: lexes, parses, type checks and lowers
/// `.qrk` sources to C++.
#[derive(Parser, Debug)]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Library root for `use 'name'` imports (defaults to $QUARK_LIB, then the bundled library)"
    )]
    lib: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log pipeline stages to stderr")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one token per line.
    Lex { file: PathBuf },
    /// Print the syntax tree.
    Parse { file: PathBuf },
    /// Run every stage up to type checking.
    Check { file: PathBuf },
    /// Lower to C++.
    Emit {
        file: PathBuf,
        #[arg(short, long, value_name = "OUT", help = "Write to OUT instead of stdout")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    execute(cli)
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("QUARK_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    let options = CompilerOptions {
        library_root: library_root(cli.lib),
        ..CompilerOptions::default()
    };
    debug!(library = ?options.library_root, "resolved options");

    match cli.command {
        Command::Lex { file } => {
            let source = read_source(&file)?;
            for token in tokenize(&source) {
                println!("{token}");
            }
        }
        Command::Parse { file } => {
            let source = read_source(&file)?;
            let parsed = parse_source(&source)?;
            print!("{}", parsed.ast.dump(parsed.root));
        }
        Command::Check { file } => {
            check_file(&file, &options)
                .with_context(|| format!("{} failed to check", file.display()))?;
            println!("ok");
        }
        Command::Emit { file, output } => {
            let artifact = compile_file(&file, &options)
                .with_context(|| format!("{} failed to compile", file.display()))?;
            match output {
                Some(path) => write_output(&path, artifact.cpp.as_bytes())?,
                None => print!("{}", artifact.cpp),
            }
        }
    }
    Ok(())
}

/// `--lib`, then `QUARK_LIB`, then the bundled library when it exists.
fn library_root(flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| env::var_os("QUARK_LIB").map(PathBuf::from))
        .or_else(|| Some(default_library_root()).filter(|root| root.is_dir()))
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read input file {}", path.display()))
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {parent:?}"))?;
        }
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write output file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::tempdir;

    fn quark() -> Command {
        let mut cmd = Command::cargo_bin("quark").expect("binary exists");
        cmd.env_remove("QUARK_LIB").env_remove("QUARK_LOG");
        cmd
    }

    #[test]
    fn lexes_one_token_per_line() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "x = 1\n").expect("write input");

        quark()
            .arg("lex")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("ID 'x' 1:1"))
            .stdout(predicate::str::contains("INT '1' 1:5"));
    }

    #[test]
    fn parses_into_a_tree_dump() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "fn inc(n) -> n + 1\n").expect("write input");

        quark()
            .arg("parse")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::starts_with("CompilationUnit\n"))
            .stdout(predicate::str::contains("  Function 'inc'"));
    }

    #[test]
    fn check_prints_ok() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "xs = [1, 2, 3]\nprintln len(xs)\n").expect("write input");

        quark()
            .arg("check")
            .arg(&input_path)
            .assert()
            .success()
            .stdout("ok\n");
    }

    #[test]
    fn check_reports_type_errors() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "y = z + 1\n").expect("write input");

        quark()
            .arg("check")
            .arg(&input_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("line 1:5: undefined symbol 'z'"));
    }

    #[test]
    fn emits_cpp_to_stdout() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "println 'hi'\n").expect("write input");

        quark()
            .arg("emit")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("#include \"quark/quark.hpp\""))
            .stdout(predicate::str::contains("q_println(qv_string(\"hi\"));"));
    }

    #[test]
    fn emit_creates_output_directories() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "x = 2 ** 3\n").expect("write input");
        let output_path = dir.path().join("build/out.cpp");

        quark()
            .arg("emit")
            .arg(&input_path)
            .arg("-o")
            .arg(&output_path)
            .assert()
            .success();

        let cpp = fs::read_to_string(&output_path).expect("read output");
        assert!(cpp.contains("int main() {"));
    }

    #[test]
    fn bundled_library_is_the_default() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "use 'math'\nprintln square 3\n").expect("write input");

        quark()
            .arg("emit")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("quark_fn_math__square"));
    }

    #[test]
    fn supports_custom_library_root() {
        let dir = tempdir().expect("tempdir");
        let library = dir.path().join("lib");
        fs::create_dir_all(&library).expect("create library root");
        fs::write(library.join("greet.qrk"), "module greet:\n    fn hello(n) -> 'hi ' + n\n")
            .expect("write library module");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "use 'greet'\nprintln hello 'bob'\n").expect("write input");

        quark()
            .arg("check")
            .arg(&input_path)
            .arg("--lib")
            .arg(&library)
            .assert()
            .success();

        quark()
            .env("QUARK_LIB", &library)
            .arg("emit")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("quark_fn_greet__hello"));
    }

    #[test]
    fn reports_missing_library_root() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("input.qrk");
        fs::write(&input_path, "x = 1\n").expect("write input");

        quark()
            .arg("emit")
            .arg(&input_path)
            .arg("--lib")
            .arg(dir.path().join("missing"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("library root was not found"));
    }

    #[test]
    fn help_describes_the_compiler() {
        quark()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Compiler for the Quark language"))
            .stdout(predicate::str::contains("emit"));
    }

    #[test]
    fn reports_missing_input() {
        let dir = tempdir().expect("tempdir");

        quark()
            .arg("lex")
            .arg(dir.path().join("absent.qrk"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed to read input file"));
    }
}
