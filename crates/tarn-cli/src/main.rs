// Tarn CLI
// Usage: tarn [FILE] [OPTIONS]

use clap::Parser;
use colored::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tarn_core::ast::Program;
use tarn_core::binary;
use tarn_core::compiler::{Chunk, Compiler};
use tarn_core::lexer::Scanner;
use tarn_core::vm::{Value, VM};

/// Tarn - a small imperative scripting language on a bytecode VM
#[derive(Parser)]
#[command(name = "tarn")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A small imperative scripting language on a bytecode VM", long_about = None)]
struct Cli {
    /// Source file to run (.tarn or .tarnc)
    file: Option<PathBuf>,

    /// Debug options: tokens, ast, asm (comma-separated)
    #[arg(short = 'd', long = "debug", value_delimiter = ',')]
    debug: Option<Vec<String>>,

    /// Execute inline code
    #[arg(short = 'e', long = "exec")]
    exec: Option<String>,

    /// Compile to .tarnc instead of running
    #[arg(short = 'c', long = "compile")]
    compile: bool,

    /// Check for errors without running
    #[arg(long = "check")]
    check: bool,

    /// Output path for compiled image (requires -c)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let debug = DebugFlags::from_options(&cli.debug);

    let result = if let Some(code) = cli.exec {
        handle_exec(&code, debug)
    } else if let Some(path) = cli.file {
        if cli.check {
            handle_check(&path)
        } else if cli.compile {
            handle_compile(&path, debug, cli.output)
        } else {
            handle_run(&path, debug)
        }
    } else {
        repl()
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

#[derive(Default, Clone, Copy)]
struct DebugFlags {
    tokens: bool,
    ast: bool,
    asm: bool,
}

impl DebugFlags {
    fn from_options(opts: &Option<Vec<String>>) -> Self {
        let mut flags = Self::default();
        if let Some(opts) = opts {
            for opt in opts {
                match opt.as_str() {
                    "tokens" => flags.tokens = true,
                    "ast" => flags.ast = true,
                    "asm" => flags.asm = true,
                    _ => eprintln!("{} Unknown debug option: {}", "!".yellow(), opt),
                }
            }
        }
        flags
    }
}

fn read_source(path: &Path) -> Result<String, String> {
    fs::read_to_string(path)
        .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))
}

/// Parse a source string and splice its imports
fn parse_with_imports(source: &str, file: &str, base_dir: &Path) -> Result<Program, String> {
    let program = tarn_core::parse_source(source, file).map_err(|e| e.to_string())?;
    let mut imported = HashSet::new();
    let statements = tarn_core::resolve_imports(&program.statements, base_dir, &mut imported)
        .map_err(|e| e.to_string())?;
    Ok(Program::new(statements))
}

/// Check a file for errors without running it
fn handle_check(path: &Path) -> Result<(), String> {
    let source = read_source(path)?;
    let file_name = path.to_string_lossy().to_string();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let program = parse_with_imports(&source, &file_name, base_dir)?;
    Compiler::new(&file_name, &source)
        .compile(&program)
        .map_err(|e| e.to_string())?;

    println!("{} No errors found in {}", "ok".green(), path.display());
    Ok(())
}

fn handle_compile(path: &Path, debug: DebugFlags, output: Option<PathBuf>) -> Result<(), String> {
    let source = read_source(path)?;
    let file_name = path.to_string_lossy().to_string();
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let chunk = front_end(&source, &file_name, base_dir, debug)?;
    let Some(chunk) = chunk else {
        // A debug view already printed instead
        return Ok(());
    };

    let output_path = output.unwrap_or_else(|| path.with_extension("tarnc"));
    let bytes = binary::serialize(&chunk);
    fs::write(&output_path, bytes).map_err(|e| format!("Error writing file: {}", e))?;
    println!("{} Compiled to {}", "ok".green(), output_path.display());

    Ok(())
}

fn handle_run(path: &Path, debug: DebugFlags) -> Result<(), String> {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let file_name = path.to_string_lossy().to_string();

    let (chunk, source) = match ext {
        "tarnc" => {
            let data =
                fs::read(path).map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
            let chunk = binary::deserialize(&data)?;
            (chunk, String::new())
        }
        _ => {
            let source = read_source(path)?;
            let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
            match front_end(&source, &file_name, base_dir, debug)? {
                Some(chunk) => (chunk, source),
                None => return Ok(()),
            }
        }
    };

    if debug.asm {
        print!("{}", chunk.disassemble(&file_name));
    }

    let mut vm = VM::new();
    vm.run(&chunk, &file_name, &source)
        .map_err(|e| e.to_string())?;

    Ok(())
}

fn handle_exec(code: &str, debug: DebugFlags) -> Result<(), String> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let chunk = match front_end(code, "<exec>", &cwd, debug)? {
        Some(chunk) => chunk,
        None => return Ok(()),
    };

    if debug.asm {
        print!("{}", chunk.disassemble("<exec>"));
    }

    let mut vm = VM::new();
    vm.run(&chunk, "<exec>", code).map_err(|e| e.to_string())?;

    Ok(())
}

/// Source to chunk, honoring the tokens/ast debug views. Returns None when a
/// debug view replaced the normal pipeline.
fn front_end(
    source: &str,
    file_name: &str,
    base_dir: &Path,
    debug: DebugFlags,
) -> Result<Option<Chunk>, String> {
    if debug.tokens {
        let tokens = Scanner::new(source, file_name)
            .scan_tokens()
            .map_err(|e| e.to_string())?;
        println!("{}", "-- Tokens --".cyan());
        for token in &tokens {
            println!("  {:?} '{}'", token.kind, token.lexeme);
        }
        println!();
        return Ok(None);
    }

    let program = parse_with_imports(source, file_name, base_dir)?;

    if debug.ast {
        let mut tree = ptree::TreeBuilder::new("Program".to_string());
        for stmt in &program.statements {
            build_stmt_tree(&mut tree, stmt);
        }
        let tree = tree.build();
        ptree::print_tree(&tree).map_err(|e| e.to_string())?;
        return Ok(None);
    }

    let chunk = Compiler::new(file_name, source)
        .compile(&program)
        .map_err(|e| e.to_string())?;

    Ok(Some(chunk))
}

// ==================== REPL ====================

fn repl() -> Result<(), String> {
    use reedline::{
        FileBackedHistory, Prompt, PromptHistorySearch, PromptHistorySearchStatus, Reedline,
        Signal,
    };
    use std::borrow::Cow;

    /// Unbalanced delimiters mean the input continues on the next line
    fn is_incomplete(code: &str) -> bool {
        let mut brace = 0i32;
        let mut paren = 0i32;
        let mut bracket = 0i32;
        let mut in_string = false;

        for c in code.chars() {
            if c == '"' {
                in_string = !in_string;
                continue;
            }
            if in_string {
                continue;
            }
            match c {
                '{' => brace += 1,
                '}' => brace -= 1,
                '(' => paren += 1,
                ')' => paren -= 1,
                '[' => bracket += 1,
                ']' => bracket -= 1,
                _ => {}
            }
        }

        brace > 0 || paren > 0 || bracket > 0 || in_string
    }

    struct TarnPrompt {
        left: &'static str,
    }

    impl Prompt for TarnPrompt {
        fn render_prompt_left(&self) -> Cow<'_, str> {
            Cow::Borrowed(self.left)
        }
        fn render_prompt_right(&self) -> Cow<'_, str> {
            Cow::Borrowed("")
        }
        fn render_prompt_indicator(&self, _: reedline::PromptEditMode) -> Cow<'_, str> {
            Cow::Borrowed("")
        }
        fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
            Cow::Borrowed("... ")
        }
        fn render_prompt_history_search_indicator(
            &self,
            history_search: PromptHistorySearch,
        ) -> Cow<'_, str> {
            let prefix = match history_search.status {
                PromptHistorySearchStatus::Passing => "",
                PromptHistorySearchStatus::Failing => "failing ",
            };
            Cow::Owned(format!("({}reverse-search: {}) ", prefix, history_search.term))
        }
    }

    println!();
    println!(
        "  {}  {}",
        "Tarn".cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("  {}", "Type .help for commands, .exit to quit".bright_black());
    println!();

    let history_path = home_dir().join(".tarn_history");
    let history =
        Box::new(FileBackedHistory::with_file(1000, history_path).map_err(|e| e.to_string())?);

    let mut line_editor = Reedline::create().with_history(history);
    let main_prompt = TarnPrompt { left: ">>> " };
    let continue_prompt = TarnPrompt { left: "... " };

    // Persistent VM plus the growing chunk successive inputs append to
    let mut vm = VM::new();
    let mut chunk = Chunk::new();
    let mut accumulated = String::new();

    loop {
        let prompt: &dyn Prompt = if accumulated.is_empty() {
            &main_prompt
        } else {
            &continue_prompt
        };

        match line_editor.read_line(prompt) {
            Ok(Signal::Success(line)) => {
                let input = line.trim();

                if accumulated.is_empty() && input.is_empty() {
                    continue;
                }

                if accumulated.is_empty() && input.starts_with('.') {
                    match input {
                        ".exit" | ".quit" => break,
                        ".help" => {
                            print_repl_help();
                            continue;
                        }
                        ".reset" => {
                            vm = VM::new();
                            chunk = Chunk::new();
                            println!("{}", "  VM state reset".bright_black());
                            continue;
                        }
                        _ => {
                            println!("{} Unknown command: {}", "!".red(), input);
                            println!("  Type {} for available commands", ".help".cyan());
                            continue;
                        }
                    }
                }

                if !accumulated.is_empty() {
                    accumulated.push('\n');
                }
                accumulated.push_str(&line);

                if is_incomplete(&accumulated) {
                    continue;
                }

                let full_input = std::mem::take(&mut accumulated);

                match run_repl_input(&mut vm, &chunk, &full_input) {
                    Ok((next_chunk, value)) => {
                        chunk = next_chunk;
                        print_repl_result(&value);
                    }
                    Err(e) => {
                        eprintln!("{}", e);
                    }
                }
            }
            Ok(Signal::CtrlC) => {
                if !accumulated.is_empty() {
                    accumulated.clear();
                    println!("{}", "^C (input cleared)".bright_black());
                } else {
                    println!("{}", "^C".bright_black());
                }
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "^D".bright_black());
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    println!("\n{}", "Goodbye!".bright_black());
    Ok(())
}

/// Compile one REPL input against the accumulated chunk and run only the
/// appended code. The previous chunk is kept intact when the input fails to
/// compile, so the session survives errors.
fn run_repl_input(vm: &mut VM, chunk: &Chunk, source: &str) -> Result<(Chunk, Value), String> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let program = parse_with_imports(source, "<repl>", &cwd)?;

    let offset = chunk.code.len();
    let next = Compiler::with_state("<repl>", source, chunk.clone())
        .compile(&program)
        .map_err(|e| e.to_string())?;

    let value = vm
        .run_from(&next, offset, "<repl>", source)
        .map_err(|e| e.to_string())?;

    Ok((next, value))
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn print_repl_help() {
    println!();
    println!("  {}", "REPL Commands:".cyan().bold());
    println!("    {}    Exit the REPL", ".exit".yellow());
    println!("    {}   Reset VM state", ".reset".yellow());
    println!("    {}    Show this help", ".help".yellow());
    println!();
    println!("  {}", "Keyboard Shortcuts:".cyan().bold());
    println!("    {}      Previous command", "Up".yellow());
    println!("    {}    Search history", "Ctrl+R".yellow());
    println!("    {}    Exit", "Ctrl+D".yellow());
    println!();
}

fn print_repl_result(value: &Value) {
    if !value.is_null() {
        println!("{}", format_value(value));
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "null".bright_black().to_string(),
        Value::Boolean(b) => b.to_string().yellow().to_string(),
        Value::Number(_) => value.to_string().yellow().to_string(),
        Value::Str(s) => format!("'{}'", s).green().to_string(),
        Value::Function(_) | Value::Closure(_) => value.to_string().cyan().to_string(),
    }
}

// ==================== AST rendering ====================

fn build_stmt_tree(tree: &mut ptree::TreeBuilder, stmt: &tarn_core::ast::Stmt) {
    use tarn_core::ast::Stmt;

    match stmt {
        Stmt::Var {
            name, initializer, ..
        } => {
            tree.begin_child(format!("Var '{}'", name));
            if let Some(init) = initializer {
                build_expr_tree(tree, init);
            }
            tree.end_child();
        }
        Stmt::Assign {
            name,
            indices,
            value,
            ..
        } => {
            if indices.is_empty() {
                tree.begin_child(format!("Assign '{}'", name));
            } else {
                tree.begin_child(format!("Assign '{}' [{} indices]", name, indices.len()));
                for index in indices {
                    build_expr_tree(tree, index);
                }
            }
            build_expr_tree(tree, value);
            tree.end_child();
        }
        Stmt::Expression { expr, .. } => {
            tree.begin_child("Expr".to_string());
            build_expr_tree(tree, expr);
            tree.end_child();
        }
        Stmt::Block { statements, .. } => {
            tree.begin_child("Block".to_string());
            for s in statements {
                build_stmt_tree(tree, s);
            }
            tree.end_child();
        }
        Stmt::If {
            condition,
            then_branch,
            else_branch,
            ..
        } => {
            tree.begin_child("If".to_string());
            tree.begin_child("condition".to_string());
            build_expr_tree(tree, condition);
            tree.end_child();
            tree.begin_child("then".to_string());
            build_stmt_tree(tree, then_branch);
            tree.end_child();
            if let Some(else_b) = else_branch {
                tree.begin_child("else".to_string());
                build_stmt_tree(tree, else_b);
                tree.end_child();
            }
            tree.end_child();
        }
        Stmt::While {
            condition, body, ..
        } => {
            tree.begin_child("While".to_string());
            tree.begin_child("condition".to_string());
            build_expr_tree(tree, condition);
            tree.end_child();
            tree.begin_child("body".to_string());
            build_stmt_tree(tree, body);
            tree.end_child();
            tree.end_child();
        }
        Stmt::Function { def } => {
            let params: Vec<_> = def.params.iter().map(|p| p.name.as_str()).collect();
            tree.begin_child(format!("Function '{}' ({})", def.name, params.join(", ")));
            build_stmt_tree(tree, &def.body);
            tree.end_child();
        }
        Stmt::Return { value, .. } => {
            tree.begin_child("Return".to_string());
            if let Some(val) = value {
                build_expr_tree(tree, val);
            }
            tree.end_child();
        }
        Stmt::Break { .. } => {
            tree.add_empty_child("Break".to_string());
        }
        Stmt::Continue { .. } => {
            tree.add_empty_child("Continue".to_string());
        }
        Stmt::Print { args, .. } => {
            tree.begin_child("Print".to_string());
            for arg in args {
                build_expr_tree(tree, arg);
            }
            tree.end_child();
        }
        Stmt::Import { path, .. } => {
            tree.add_empty_child(format!("Import '{}'", path));
        }
    }
}

fn build_expr_tree(tree: &mut ptree::TreeBuilder, expr: &tarn_core::ast::Expr) {
    use tarn_core::ast::{Expr, Literal};

    match expr {
        Expr::Literal { value, .. } => {
            let val_str = match value {
                Literal::Number(n) => format!("{}", n),
                Literal::Str(s) => format!("\"{}\"", s),
                Literal::Boolean(b) => format!("{}", b),
            };
            tree.add_empty_child(val_str);
        }
        Expr::Identifier { name, .. } => {
            tree.add_empty_child(name.clone());
        }
        Expr::Vector { elements, .. } => {
            tree.begin_child("Vector".to_string());
            for elem in elements {
                build_expr_tree(tree, elem);
            }
            tree.end_child();
        }
        Expr::Binary {
            left, op, right, ..
        } => {
            tree.begin_child(format!("Binary({})", op.symbol()));
            build_expr_tree(tree, left);
            build_expr_tree(tree, right);
            tree.end_child();
        }
        Expr::Unary { op, operand, .. } => {
            tree.begin_child(format!("Unary({})", op.symbol()));
            build_expr_tree(tree, operand);
            tree.end_child();
        }
        Expr::Call { callee, args, .. } => {
            tree.begin_child("Call".to_string());
            tree.begin_child("callee".to_string());
            build_expr_tree(tree, callee);
            tree.end_child();
            if !args.is_empty() {
                tree.begin_child("args".to_string());
                for arg in args {
                    build_expr_tree(tree, arg);
                }
                tree.end_child();
            }
            tree.end_child();
        }
        Expr::Index { name, indices, .. } => {
            tree.begin_child(format!("Index '{}'", name));
            for index in indices {
                build_expr_tree(tree, index);
            }
            tree.end_child();
        }
        Expr::Builtin { builtin, arg, .. } => {
            tree.begin_child(format!("Builtin '{}'", builtin.name()));
            if let Some(arg) = arg {
                build_expr_tree(tree, arg);
            }
            tree.end_child();
        }
    }
}
