pub mod ast;
pub mod binary;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod vm;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use ast::{Program, Stmt};
use compiler::{Chunk, Compiler};
use error::{TarnError, TarnResult};
use lexer::Scanner;
use parser::Parser;
use vm::{Value, VM};

/// Lex and parse one source string
pub fn parse_source(source: &str, file: &str) -> TarnResult<Program> {
    let tokens = Scanner::new(source, file).scan_tokens()?;
    Parser::new(tokens, file, source).parse()
}

/// Full front-end pipeline: source text to a compiled chunk
pub fn compile_source(source: &str, file: &str) -> TarnResult<Chunk> {
    let program = parse_source(source, file)?;
    Compiler::new(file, source).compile(&program)
}

/// Compile and execute one source string, printing to stdout
pub fn run(source: &str, file: &str) -> TarnResult<Value> {
    let chunk = compile_source(source, file)?;
    VM::new().run(&chunk, file, source)
}

/// Run a script file, resolving its imports first
pub fn run_file(path: impl AsRef<Path>) -> TarnResult<Value> {
    let path = path.as_ref();
    let file = path.to_string_lossy().to_string();
    let source = fs::read_to_string(path).map_err(|e| {
        TarnError::compile_error(
            format!("Cannot read '{}': {}", path.display(), e),
            error::Span::default(),
            &file,
        )
    })?;

    let program = parse_source(&source, &file)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut imported = HashSet::new();
    let statements = resolve_imports(&program.statements, base_dir, &mut imported)?;
    let program = Program::new(statements);

    let chunk = Compiler::new(&file, &source).compile(&program)?;
    VM::new().run(&chunk, &file, &source)
}

/// Resolve `import "path";` statements by naive concatenation: each import is
/// replaced by the imported file's statements, recursively. A visited set
/// breaks cycles; a file imported twice is spliced only once.
pub fn resolve_imports(
    statements: &[Stmt],
    base_dir: &Path,
    imported: &mut HashSet<PathBuf>,
) -> TarnResult<Vec<Stmt>> {
    let mut result = Vec::new();

    for stmt in statements {
        if let Stmt::Import { path, span } = stmt {
            let file_path = base_dir.join(path);
            let key = file_path
                .canonicalize()
                .unwrap_or_else(|_| file_path.clone());
            if imported.contains(&key) {
                continue;
            }
            imported.insert(key);

            let file_name = file_path.to_string_lossy().to_string();
            let source = fs::read_to_string(&file_path).map_err(|e| {
                TarnError::compile_error(
                    format!("Cannot import '{}': {}", path, e),
                    *span,
                    &file_name,
                )
            })?;

            let sub_program = parse_source(&source, &file_name)?;
            let sub_dir = file_path.parent().unwrap_or(base_dir);
            let resolved = resolve_imports(&sub_program.statements, sub_dir, imported)?;
            result.extend(resolved);
        } else {
            result.push(stmt.clone());
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tarn-test-{}-{}", std::process::id(), tag));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_compile_source_pipeline() {
        let chunk = compile_source("var x = 1; x;", "<test>").unwrap();
        assert!(chunk.unpatched_operands().is_empty());
        assert_eq!(chunk.globals, vec!["x".to_string()]);
    }

    #[test]
    fn test_imports_are_spliced_in_place() {
        let dir = temp_dir("splice");
        let lib = dir.join("lib.tarn");
        let mut f = fs::File::create(&lib).unwrap();
        writeln!(f, "fun double(x) {{ return x * 2; }}").unwrap();

        let source = "import \"lib.tarn\"; var y = double(21);";
        let program = parse_source(source, "<test>").unwrap();
        let mut imported = HashSet::new();
        let statements = resolve_imports(&program.statements, &dir, &mut imported).unwrap();

        assert_eq!(statements.len(), 2);
        assert!(matches!(statements[0], Stmt::Function { .. }));
        assert!(matches!(statements[1], Stmt::Var { .. }));
    }

    #[test]
    fn test_import_cycles_break() {
        let dir = temp_dir("cycle");
        fs::write(dir.join("a.tarn"), "import \"b.tarn\"; var a = 1;").unwrap();
        fs::write(dir.join("b.tarn"), "import \"a.tarn\"; var b = 2;").unwrap();

        let source = "import \"a.tarn\";";
        let program = parse_source(source, "<test>").unwrap();
        let mut imported = HashSet::new();
        let statements = resolve_imports(&program.statements, &dir, &mut imported).unwrap();

        // a imports b, b's import of a is skipped
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_missing_import_is_error() {
        let dir = temp_dir("missing");
        let program = parse_source("import \"nope.tarn\";", "<test>").unwrap();
        let mut imported = HashSet::new();
        let err = resolve_imports(&program.statements, &dir, &mut imported).unwrap_err();
        assert!(err.message.contains("Cannot import"));
    }

    #[test]
    fn test_run_file_end_to_end() {
        let dir = temp_dir("run");
        fs::write(dir.join("util.tarn"), "fun inc(x) { return x + 1; }").unwrap();
        fs::write(dir.join("main.tarn"), "import \"util.tarn\"; inc(41);").unwrap();

        let value = run_file(dir.join("main.tarn")).unwrap();
        assert_eq!(value, Value::Number(42.0));
    }
}
