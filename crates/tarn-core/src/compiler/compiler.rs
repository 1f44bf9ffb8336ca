// Tarn bytecode compiler
// Single static pass over the AST: lexical address resolution, forward-jump
// back-patching, function bodies compiled inline behind a jump

use super::chunk::{Chunk, Constant, FunctionConstant, PatchSlot};
use super::opcode::OpCode;
use crate::ast::*;
use crate::error::{Span, TarnError, TarnResult};
use std::rc::Rc;

struct LoopContext {
    /// Address of the condition check
    start: usize,
    /// Scope-stack depth on loop entry; break/continue unwind back to it
    scope_depth: usize,
    break_jumps: Vec<PatchSlot>,
}

pub struct Compiler {
    file: String,
    source: String,
    chunk: Chunk,
    /// Compile-time scope stack; index 0 is the global symbol table
    scopes: Vec<Vec<String>>,
    loops: Vec<LoopContext>,
}

impl Compiler {
    pub fn new(file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            source: source.into(),
            chunk: Chunk::new(),
            scopes: vec![Vec::new()],
            loops: Vec::new(),
        }
    }

    /// Resume compilation into an existing chunk, growing its code, constant
    /// pool and global table. This is how successive REPL inputs compile
    /// against one growing global environment.
    pub fn with_state(
        file: impl Into<String>,
        source: impl Into<String>,
        chunk: Chunk,
    ) -> Self {
        let globals = chunk.globals.clone();
        Self {
            file: file.into(),
            source: source.into(),
            chunk,
            scopes: vec![globals],
            loops: Vec::new(),
        }
    }

    /// Compile one program. Every statement compiles to stack-neutral code;
    /// if the last statement is an expression statement its value is kept as
    /// the program result, otherwise Null is pushed.
    pub fn compile(mut self, program: &Program) -> TarnResult<Chunk> {
        let stmts = &program.statements;

        for (i, stmt) in stmts.iter().enumerate() {
            let is_last = i + 1 == stmts.len();
            if is_last {
                if let Stmt::Expression { expr, .. } = stmt {
                    self.compile_expr(expr)?;
                } else {
                    self.compile_stmt(stmt)?;
                    self.emit(OpCode::Null, stmt.span());
                }
            } else {
                self.compile_stmt(stmt)?;
            }
        }

        if stmts.is_empty() {
            self.emit(OpCode::Null, Span::default());
        }

        self.chunk.globals = std::mem::take(&mut self.scopes[0]);

        debug_assert!(self.chunk.unpatched_operands().is_empty());
        debug_assert!(self.chunk.unresolved_function_entries().is_empty());

        Ok(self.chunk)
    }

    // ==================== Statements ====================

    fn compile_stmt(&mut self, stmt: &Stmt) -> TarnResult<()> {
        match stmt {
            Stmt::Expression { expr, .. } => {
                self.compile_expr(expr)?;
                self.emit(OpCode::Pop, expr.span());
            }
            Stmt::Var {
                name,
                name_span,
                initializer,
                span,
            } => {
                self.compile_var(name, *name_span, initializer.as_ref(), *span)?;
            }
            Stmt::Assign {
                name,
                indices,
                value,
                span,
            } => {
                self.compile_assign(name, indices, value, *span)?;
            }
            Stmt::Block { statements, span } => {
                self.compile_block(statements, *span)?;
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                span,
            } => {
                self.compile_if(condition, then_branch, else_branch.as_deref(), *span)?;
            }
            Stmt::While {
                condition,
                body,
                span,
            } => {
                self.compile_while(condition, body, *span)?;
            }
            Stmt::Function { def } => {
                self.compile_function(def)?;
            }
            Stmt::Return { value, span } => {
                self.compile_return(value.as_ref(), *span)?;
            }
            Stmt::Break { span } => {
                self.compile_break(*span)?;
            }
            Stmt::Continue { span } => {
                self.compile_continue(*span)?;
            }
            Stmt::Print { args, span } => {
                self.compile_print(args, *span)?;
            }
            Stmt::Import { span, .. } => {
                return Err(self
                    .error("'import' has no compilation rule", *span)
                    .with_help("imports are resolved by source concatenation before compilation"));
            }
        }
        Ok(())
    }

    fn compile_var(
        &mut self,
        name: &str,
        name_span: Span,
        initializer: Option<&Expr>,
        span: Span,
    ) -> TarnResult<()> {
        // The initializer is compiled before the name is declared, so
        // `var x = x;` resolves the right-hand x in an outer scope.
        if let Some(init) = initializer {
            self.compile_expr(init)?;
        } else {
            self.emit(OpCode::Null, span);
        }

        let index = self.define_var(name, name_span)?;

        self.emit(OpCode::SetVar, span);
        self.emit_operand(0, span);
        self.emit_operand(index as i32, span);
        self.emit(OpCode::Pop, span);

        Ok(())
    }

    fn compile_assign(
        &mut self,
        name: &str,
        indices: &[Expr],
        value: &Expr,
        span: Span,
    ) -> TarnResult<()> {
        if !indices.is_empty() {
            return Err(self.error("Indexed assignment has no compilation rule", span));
        }

        self.compile_expr(value)?;

        let (depth, index) = self.resolve_var(name).ok_or_else(|| {
            self.error(&format!("Undefined variable '{}'", name), span)
        })?;

        self.emit(OpCode::SetVar, span);
        self.emit_operand(depth as i32, span);
        self.emit_operand(index as i32, span);
        self.emit(OpCode::Pop, span);

        Ok(())
    }

    fn compile_block(&mut self, statements: &[Stmt], span: Span) -> TarnResult<()> {
        self.begin_scope();
        self.emit(OpCode::EnterScope, span);
        let size_slot = self.chunk.write_placeholder(span);

        for stmt in statements {
            self.compile_stmt(stmt)?;
        }

        // Patched to the final declared-name count of this scope
        let count = self.scopes.last().map(Vec::len).unwrap_or(0);
        self.chunk.patch(size_slot, count as i32);

        self.end_scope();
        self.emit(OpCode::LeaveScope, span);

        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
        span: Span,
    ) -> TarnResult<()> {
        self.compile_expr(condition)?;

        let else_jump = self.emit_jump(OpCode::JumpFalse, span);

        self.compile_stmt(then_branch)?;

        let end_jump = self.emit_jump(OpCode::Jump, span);

        self.chunk.patch_to_here(else_jump);

        if let Some(else_stmt) = else_branch {
            self.compile_stmt(else_stmt)?;
        }

        self.chunk.patch_to_here(end_jump);

        Ok(())
    }

    fn compile_while(&mut self, condition: &Expr, body: &Stmt, span: Span) -> TarnResult<()> {
        let start = self.chunk.current_offset();

        self.loops.push(LoopContext {
            start,
            scope_depth: self.scopes.len(),
            break_jumps: Vec::new(),
        });

        self.compile_expr(condition)?;
        let exit_jump = self.emit_jump(OpCode::JumpFalse, span);

        self.compile_stmt(body)?;

        self.emit(OpCode::Jump, span);
        self.emit_operand(start as i32, span);

        self.chunk.patch_to_here(exit_jump);

        let ctx = self.loops.pop().unwrap();
        for jump in ctx.break_jumps {
            self.chunk.patch_to_here(jump);
        }

        Ok(())
    }

    fn compile_function(&mut self, def: &FunctionDef) -> TarnResult<()> {
        let span = def.span;

        // The function name is an ordinary variable in the enclosing scope,
        // declared before the body so recursive calls resolve.
        let slot = self.define_var(&def.name, span)?;

        let constant = Rc::new(FunctionConstant::new(&def.name, def.params.len()));
        let const_idx = self
            .chunk
            .add_constant(Constant::Function(constant.clone()));

        self.emit(OpCode::Constant, span);
        self.emit_operand(const_idx as i32, span);
        self.emit(OpCode::Closure, span);
        self.emit(OpCode::SetVar, span);
        self.emit_operand(0, span);
        self.emit_operand(slot as i32, span);
        self.emit(OpCode::Pop, span);

        // Normal control flow jumps over the body
        let skip_jump = self.emit_jump(OpCode::Jump, span);

        constant.entry.set(self.chunk.current_offset());

        // Parameters live in the argument frame the Call instruction builds;
        // the body block adds its own frame on top.
        self.begin_scope();
        for param in &def.params {
            self.define_var(&param.name, param.span)?;
        }

        self.compile_stmt(&def.body)?;

        self.emit(OpCode::Null, span);
        self.emit(OpCode::Return, span);

        self.end_scope();
        self.chunk.patch_to_here(skip_jump);

        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>, span: Span) -> TarnResult<()> {
        if let Some(expr) = value {
            self.compile_expr(expr)?;
        } else {
            self.emit(OpCode::Null, span);
        }

        // No LeaveScope unwinding here: Return restores the caller's pc and
        // scope chain atomically from the call record.
        self.emit(OpCode::Return, span);
        Ok(())
    }

    fn compile_break(&mut self, span: Span) -> TarnResult<()> {
        let scope_depth = match self.loops.last() {
            Some(ctx) => ctx.scope_depth,
            None => return Err(self.error("'break' outside of loop", span)),
        };

        for _ in scope_depth..self.scopes.len() {
            self.emit(OpCode::LeaveScope, span);
        }

        let jump = self.emit_jump(OpCode::Jump, span);
        self.loops.last_mut().unwrap().break_jumps.push(jump);

        Ok(())
    }

    fn compile_continue(&mut self, span: Span) -> TarnResult<()> {
        let (start, scope_depth) = match self.loops.last() {
            Some(ctx) => (ctx.start, ctx.scope_depth),
            None => return Err(self.error("'continue' outside of loop", span)),
        };

        for _ in scope_depth..self.scopes.len() {
            self.emit(OpCode::LeaveScope, span);
        }

        self.emit(OpCode::Jump, span);
        self.emit_operand(start as i32, span);

        Ok(())
    }

    fn compile_print(&mut self, args: &[Expr], span: Span) -> TarnResult<()> {
        for arg in args {
            self.compile_expr(arg)?;
            self.emit(OpCode::PrintItem, arg.span());
        }
        self.emit(OpCode::PrintNewline, span);
        Ok(())
    }

    // ==================== Expressions ====================

    fn compile_expr(&mut self, expr: &Expr) -> TarnResult<()> {
        match expr {
            Expr::Literal { value, span } => self.compile_literal(value, *span),
            Expr::Identifier { name, span } => {
                let (depth, index) = self.resolve_var(name).ok_or_else(|| {
                    self.error(&format!("Undefined variable '{}'", name), *span)
                })?;
                self.emit(OpCode::GetVar, *span);
                self.emit_operand(depth as i32, *span);
                self.emit_operand(index as i32, *span);
                Ok(())
            }
            Expr::Binary {
                left,
                op,
                right,
                span,
            } => self.compile_binary(left, *op, right, *span),
            Expr::Unary { op, operand, span } => self.compile_unary(*op, operand, *span),
            Expr::Call { callee, args, span } => {
                self.compile_expr(callee)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(OpCode::Call, *span);
                self.emit_operand(args.len() as i32, *span);
                Ok(())
            }
            Expr::Vector { span, .. } => {
                Err(self.error("Vector literals have no compilation rule", *span))
            }
            Expr::Index { span, .. } => {
                Err(self.error("Indexed access has no compilation rule", *span))
            }
            Expr::Builtin { builtin, span, .. } => Err(self.error(
                &format!("Builtin '{}' has no compilation rule", builtin.name()),
                *span,
            )),
        }
    }

    fn compile_literal(&mut self, literal: &Literal, span: Span) -> TarnResult<()> {
        match literal {
            Literal::Number(n) => {
                let idx = self.chunk.add_constant(Constant::Number(*n));
                self.emit(OpCode::Constant, span);
                self.emit_operand(idx as i32, span);
            }
            Literal::Str(s) => {
                let idx = self.chunk.add_constant(Constant::Str(Rc::from(s.as_str())));
                self.emit(OpCode::Constant, span);
                self.emit_operand(idx as i32, span);
            }
            Literal::Boolean(true) => self.emit(OpCode::True, span),
            Literal::Boolean(false) => self.emit(OpCode::False, span),
        }
        Ok(())
    }

    fn compile_binary(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        span: Span,
    ) -> TarnResult<()> {
        let opcode = match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Less => OpCode::Less,
            BinaryOp::LessEqual => OpCode::LessEqual,
            BinaryOp::Greater => OpCode::Greater,
            BinaryOp::GreaterEqual => OpCode::GreaterEqual,
            BinaryOp::Equal => OpCode::Equal,
            BinaryOp::NotEqual => OpCode::NotEqual,
            BinaryOp::Pow | BinaryOp::And | BinaryOp::Or => {
                return Err(self.error(
                    &format!("Binary operator '{}' has no compilation rule", op.symbol()),
                    span,
                ));
            }
        };

        self.compile_expr(left)?;
        self.compile_expr(right)?;
        self.emit(opcode, span);
        Ok(())
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> TarnResult<()> {
        let opcode = match op {
            UnaryOp::Negate => OpCode::Negate,
            UnaryOp::Not => OpCode::Not,
            UnaryOp::Factorial => {
                return Err(
                    self.error("Operator '!' (factorial) has no compilation rule", span)
                );
            }
        };

        self.compile_expr(operand)?;
        self.emit(opcode, span);
        Ok(())
    }

    // ==================== Scopes ====================

    fn begin_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Declare a name in the innermost scope. Redeclaring within the current
    /// scope is an error; shadowing an outer scope is allowed.
    fn define_var(&mut self, name: &str, span: Span) -> TarnResult<usize> {
        let scope = self.scopes.last_mut().unwrap();

        if scope.iter().any(|n| n == name) {
            return Err(TarnError::compile_error(
                format!("Variable '{}' already declared in this scope", name),
                span,
                &self.file,
            )
            .with_source(&self.source));
        }

        scope.push(name.to_string());
        Ok(scope.len() - 1)
    }

    /// Resolve a name to its lexical address, walking innermost to outermost.
    /// Depth 0 is the innermost scope.
    fn resolve_var(&self, name: &str) -> Option<(usize, usize)> {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(index) = scope.iter().position(|n| n == name) {
                return Some((depth, index));
            }
        }
        None
    }

    // ==================== Emission ====================

    fn emit(&mut self, op: OpCode, span: Span) {
        self.chunk.write_op(op, span);
    }

    fn emit_operand(&mut self, value: i32, span: Span) {
        self.chunk.write_operand(value, span);
    }

    fn emit_jump(&mut self, op: OpCode, span: Span) -> PatchSlot {
        self.emit(op, span);
        self.chunk.write_placeholder(span)
    }

    fn error(&self, message: &str, span: Span) -> TarnError {
        TarnError::compile_error(message, span, &self.file).with_source(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lexer::Scanner;
    use crate::parser::Parser;

    fn compile(source: &str) -> TarnResult<Chunk> {
        let tokens = Scanner::new(source, "<test>").scan_tokens()?;
        let program = Parser::new(tokens, "<test>", source).parse()?;
        Compiler::new("<test>", source).compile(&program)
    }

    /// Decode the instruction stream into (opcode, operands) pairs
    fn decode(chunk: &Chunk) -> Vec<(OpCode, Vec<i32>)> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < chunk.code.len() {
            let op = OpCode::from_i32(chunk.code[offset]).expect("valid opcode");
            let operands = chunk.code[offset + 1..offset + 1 + op.operand_count()].to_vec();
            out.push((op, operands));
            offset += 1 + op.operand_count();
        }
        out
    }

    fn ops(chunk: &Chunk) -> Vec<OpCode> {
        decode(chunk).into_iter().map(|(op, _)| op).collect()
    }

    #[test]
    fn test_var_declaration_sequence() {
        let chunk = compile("var x = 2;").unwrap();
        assert_eq!(
            ops(&chunk),
            vec![OpCode::Constant, OpCode::SetVar, OpCode::Pop, OpCode::Null]
        );
        assert_eq!(chunk.globals, vec!["x".to_string()]);
    }

    #[test]
    fn test_last_expression_statement_keeps_value() {
        let chunk = compile("1 + 2;").unwrap();
        assert_eq!(
            ops(&chunk),
            vec![OpCode::Constant, OpCode::Constant, OpCode::Add]
        );
    }

    #[test]
    fn test_non_last_expression_statement_is_popped() {
        let chunk = compile("1 + 2; 3;").unwrap();
        let decoded = ops(&chunk);
        assert_eq!(decoded[3], OpCode::Pop);
        assert_eq!(*decoded.last().unwrap(), OpCode::Constant);
    }

    #[test]
    fn test_no_unpatched_placeholders_after_compile() {
        let source = "\
            fun fact(n) { \
                if (n < 2) { return 1; } \
                return n * fact(n - 1); \
            } \
            var i = 0; \
            while (i < 5) { \
                { if (i == 3) { break; } } \
                i = i + 1; \
            } \
            print(fact(5));";
        let chunk = compile(source).unwrap();
        assert!(chunk.unpatched_operands().is_empty());
        assert!(chunk.unresolved_function_entries().is_empty());
    }

    #[test]
    fn test_function_entry_points_into_code() {
        let chunk = compile("fun f() { return 1; } f();").unwrap();
        let entry = chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Constant::Function(f) => Some(f.entry.get()),
                _ => None,
            })
            .expect("function constant");
        assert!(entry < chunk.code.len());
    }

    #[test]
    fn test_block_enter_scope_size_patched() {
        let chunk = compile("{ var a = 1; var b = 2; }").unwrap();
        let decoded = decode(&chunk);
        let enter = decoded
            .iter()
            .find(|(op, _)| *op == OpCode::EnterScope)
            .expect("enter_scope");
        assert_eq!(enter.1, vec![2]);
    }

    #[test]
    fn test_shadowed_name_resolves_to_innermost() {
        let chunk = compile("var x = 1; { var x = 2; x = 3; }").unwrap();
        let decoded = decode(&chunk);
        // The assignment inside the block addresses the block frame (depth 0),
        // not the global x.
        let sets: Vec<&Vec<i32>> = decoded
            .iter()
            .filter(|(op, _)| *op == OpCode::SetVar)
            .map(|(_, operands)| operands)
            .collect();
        assert_eq!(sets.len(), 3);
        assert_eq!(*sets[2], vec![0, 0]);
    }

    #[test]
    fn test_outer_variable_resolves_through_depth() {
        let chunk = compile("var x = 1; { x = 2; }").unwrap();
        let decoded = decode(&chunk);
        let sets: Vec<&Vec<i32>> = decoded
            .iter()
            .filter(|(op, _)| *op == OpCode::SetVar)
            .map(|(_, operands)| operands)
            .collect();
        // Inside one block the global lives one frame out
        assert_eq!(*sets[1], vec![1, 0]);
    }

    #[test]
    fn test_redeclaration_in_same_scope_rejected() {
        let err = compile("var x = 1; var x = 2;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CompileError);
        assert!(err.message.contains("already declared"));
    }

    #[test]
    fn test_shadowing_in_nested_scope_accepted() {
        assert!(compile("var x = 1; { var x = 2; }").is_ok());
    }

    #[test]
    fn test_unresolved_identifier_rejected() {
        let err = compile("y = 1;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CompileError);
        assert!(err.message.contains("Undefined variable 'y'"));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let err = compile("break;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::CompileError);
        assert!(err.message.contains("'break' outside of loop"));
    }

    #[test]
    fn test_continue_outside_loop_rejected() {
        let err = compile("continue;").unwrap_err();
        assert!(err.message.contains("'continue' outside of loop"));
    }

    #[test]
    fn test_break_unwinds_scopes_entered_since_loop_start() {
        let chunk = compile("while (true) { { break; } } ").unwrap();
        let decoded = ops(&chunk);
        // Two block scopes were opened since loop entry, so break emits two
        // LeaveScope instructions before its jump.
        let break_pos = decoded
            .windows(3)
            .position(|w| w == [OpCode::LeaveScope, OpCode::LeaveScope, OpCode::Jump]);
        assert!(break_pos.is_some(), "decoded: {:?}", decoded);
    }

    #[test]
    fn test_return_emits_no_scope_unwinding() {
        let chunk = compile("fun f() { { { return 1; } } } f();").unwrap();
        let decoded = ops(&chunk);
        // The return is Constant directly followed by Return, no LeaveScope
        // in between.
        let ret_pos = decoded
            .windows(2)
            .position(|w| w == [OpCode::Constant, OpCode::Return]);
        assert!(ret_pos.is_some(), "decoded: {:?}", decoded);
    }

    #[test]
    fn test_tree_walker_only_nodes_are_compile_errors() {
        for source in [
            "var v = [1, 2, 3];",
            "var x = m[0];",
            "var n = len(x);",
            "var p = 2 ^ 3;",
            "var f = 5!;",
            "m[0] = 1;",
            "import \"lib.tarn\";",
        ] {
            let err = compile(source).unwrap_err();
            assert_eq!(err.kind, ErrorKind::CompileError, "source: {}", source);
            assert!(
                err.message.contains("no compilation rule"),
                "source: {} message: {}",
                source,
                err.message
            );
        }
    }

    #[test]
    fn test_incremental_compilation_grows_global_table() {
        let first = compile("var x = 1;").unwrap();
        assert_eq!(first.globals, vec!["x".to_string()]);
        let offset = first.code.len();

        let source = "var y = x + 1; y;";
        let tokens = Scanner::new(source, "<repl>").scan_tokens().unwrap();
        let program = Parser::new(tokens, "<repl>", source).parse().unwrap();
        let second = Compiler::with_state("<repl>", source, first)
            .compile(&program)
            .unwrap();

        assert_eq!(second.globals, vec!["x".to_string(), "y".to_string()]);
        assert!(second.code.len() > offset);
        assert!(second.unpatched_operands().is_empty());
    }

    #[test]
    fn test_constants_dedup_across_statements() {
        let chunk = compile("var a = 7; var b = 7; var c = \"s\"; var d = \"s\";").unwrap();
        assert_eq!(chunk.constants.len(), 2);
    }
}
