// Tarn parser
// Recursive descent parser that converts tokens into an AST

use crate::ast::*;
use crate::error::{Span, TarnError, TarnResult};
use crate::lexer::{Token, TokenKind};

/// Recursive descent parser for Tarn
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    file: String,
    source: String,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            tokens,
            current: 0,
            file: file.into(),
            source: source.into(),
        }
    }

    /// Parse the entire program
    pub fn parse(&mut self) -> TarnResult<Program> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            statements.push(self.statement()?);
        }

        Ok(Program::new(statements))
    }

    // ==================== Statements ====================

    fn statement(&mut self) -> TarnResult<Stmt> {
        match self.peek().kind {
            TokenKind::Import => self.import_statement(),
            TokenKind::Fun => self.function_declaration(),
            TokenKind::LeftBrace => self.block_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => self.break_statement(),
            TokenKind::Continue => self.continue_statement(),
            TokenKind::Print => self.print_statement(),
            TokenKind::Var => self.var_declaration(),
            TokenKind::Identifier(_) => {
                // A bare identifier can start either an assignment
                // (`id[...]... = expr;`) or a plain expression statement.
                // Scan forward to the statement's `;` looking for `=` so no
                // backtracking is needed.
                if self.assignment_ahead() {
                    self.assignment_statement()
                } else {
                    self.expression_statement()
                }
            }
            _ => self.expression_statement(),
        }
    }

    /// True when a `=` token appears before the next `;` or end of input
    fn assignment_ahead(&self) -> bool {
        let mut pos = self.current + 1;
        while pos < self.tokens.len() {
            match self.tokens[pos].kind {
                TokenKind::Semicolon | TokenKind::Eof => return false,
                TokenKind::Equal => return true,
                _ => pos += 1,
            }
        }
        false
    }

    fn import_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        let path = match &self.peek().kind {
            TokenKind::Str(s) => s.clone(),
            _ => return Err(self.error("Expected string path after 'import'")),
        };
        self.advance();

        self.consume(&TokenKind::Semicolon, "Expected ';' after import path")?;
        let end_span = self.previous().span;

        Ok(Stmt::Import {
            path,
            span: Span::merge(start_span, end_span),
        })
    }

    fn function_declaration(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        let name_token = self.consume_identifier("Expected function name after 'fun'")?;
        let name = name_token.lexeme.clone();

        self.consume(&TokenKind::LeftParen, "Expected '(' after function name")?;
        let params = self.parse_parameters()?;
        self.consume(&TokenKind::RightParen, "Expected ')' after parameters")?;

        if !self.check(&TokenKind::LeftBrace) {
            return Err(self.error("Expected '{' before function body"));
        }
        let body = self.block_statement()?;
        let end_span = self.previous().span;

        Ok(Stmt::Function {
            def: FunctionDef {
                name,
                params,
                body: Box::new(body),
                span: Span::merge(start_span, end_span),
            },
        })
    }

    fn parse_parameters(&mut self) -> TarnResult<Vec<FunctionParam>> {
        let mut params = Vec::new();

        if !self.check(&TokenKind::RightParen) {
            loop {
                let tok = self.consume_identifier("Expected parameter name")?;
                params.push(FunctionParam {
                    name: tok.lexeme.clone(),
                    span: tok.span,
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        Ok(params)
    }

    fn block_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            statements.push(self.statement()?);
        }

        let end = self.consume(&TokenKind::RightBrace, "Expected '}' after block")?;
        let end_span = end.span;

        Ok(Stmt::Block {
            statements,
            span: Span::merge(start_span, end_span),
        })
    }

    fn while_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        self.consume(&TokenKind::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "Expected ')' after loop condition")?;

        let body = self.statement()?;
        let end_span = self.previous().span;

        Ok(Stmt::While {
            condition,
            body: Box::new(body),
            span: Span::merge(start_span, end_span),
        })
    }

    fn if_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        self.consume(&TokenKind::LeftParen, "Expected '(' after 'if'")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "Expected ')' after condition")?;

        let then_branch = self.statement()?;

        // `else` binds to the nearest unmatched `if`
        let else_branch = if self.match_token(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        let end_span = self.previous().span;

        Ok(Stmt::If {
            condition,
            then_branch: Box::new(then_branch),
            else_branch,
            span: Span::merge(start_span, end_span),
        })
    }

    fn return_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };

        self.consume(&TokenKind::Semicolon, "Expected ';' after return value")?;
        let end_span = self.previous().span;

        Ok(Stmt::Return {
            value,
            span: Span::merge(start_span, end_span),
        })
    }

    fn break_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;
        self.consume(&TokenKind::Semicolon, "Expected ';' after 'break'")?;
        Ok(Stmt::Break {
            span: Span::merge(start_span, self.previous().span),
        })
    }

    fn continue_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;
        self.consume(&TokenKind::Semicolon, "Expected ';' after 'continue'")?;
        Ok(Stmt::Continue {
            span: Span::merge(start_span, self.previous().span),
        })
    }

    fn print_statement(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        self.consume(&TokenKind::LeftParen, "Expected '(' after 'print'")?;
        let args = self.parse_arguments()?;
        self.consume(&TokenKind::RightParen, "Expected ')' after print arguments")?;
        self.consume(&TokenKind::Semicolon, "Expected ';' after print statement")?;
        let end_span = self.previous().span;

        Ok(Stmt::Print {
            args,
            span: Span::merge(start_span, end_span),
        })
    }

    fn var_declaration(&mut self) -> TarnResult<Stmt> {
        let start_span = self.advance().span;

        let name_token = self.consume_identifier("Expected variable name after 'var'")?;
        let name = name_token.lexeme.clone();
        let name_span = name_token.span;

        let initializer = if self.match_token(&TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };

        self.consume(&TokenKind::Semicolon, "Expected ';' after variable declaration")?;
        let end_span = self.previous().span;

        Ok(Stmt::Var {
            name,
            name_span,
            initializer,
            span: Span::merge(start_span, end_span),
        })
    }

    fn assignment_statement(&mut self) -> TarnResult<Stmt> {
        let name_token = self.consume_identifier("Expected assignment target")?;
        let name = name_token.lexeme.clone();
        let start_span = name_token.span;

        let mut indices = Vec::new();
        while self.match_token(&TokenKind::LeftBracket) {
            indices.push(self.expression()?);
            self.consume(&TokenKind::RightBracket, "Expected ']' after index")?;
        }

        self.consume(&TokenKind::Equal, "Expected '=' in assignment")?;
        let value = self.expression()?;
        self.consume(&TokenKind::Semicolon, "Expected ';' after assignment")?;
        let end_span = self.previous().span;

        Ok(Stmt::Assign {
            name,
            indices,
            value,
            span: Span::merge(start_span, end_span),
        })
    }

    fn expression_statement(&mut self) -> TarnResult<Stmt> {
        let expr = self.expression()?;
        self.consume(&TokenKind::Semicolon, "Expected ';' after expression")?;
        let span = Span::merge(expr.span(), self.previous().span);
        Ok(Stmt::Expression { expr, span })
    }

    // ==================== Expressions ====================

    fn expression(&mut self) -> TarnResult<Expr> {
        self.logic_or()
    }

    fn logic_or(&mut self) -> TarnResult<Expr> {
        let mut expr = self.logic_and()?;

        while self.check(&TokenKind::Or) {
            self.advance();
            let right = self.logic_and()?;
            let span = Span::merge(expr.span(), right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::Or,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn logic_and(&mut self) -> TarnResult<Expr> {
        let mut expr = self.equality()?;

        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.equality()?;
            let span = Span::merge(expr.span(), right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::And,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn equality(&mut self) -> TarnResult<Expr> {
        let mut expr = self.comparison()?;

        loop {
            let op = if self.match_token(&TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else if self.match_token(&TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else {
                break;
            };

            let right = self.comparison()?;
            let span = Span::merge(expr.span(), right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn comparison(&mut self) -> TarnResult<Expr> {
        let mut expr = self.term()?;

        loop {
            let op = if self.match_token(&TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_token(&TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else if self.match_token(&TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_token(&TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else {
                break;
            };

            let right = self.term()?;
            let span = Span::merge(expr.span(), right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn term(&mut self) -> TarnResult<Expr> {
        let mut expr = self.factor()?;

        loop {
            let op = if self.match_token(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };

            let right = self.factor()?;
            let span = Span::merge(expr.span(), right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn factor(&mut self) -> TarnResult<Expr> {
        let mut expr = self.unary()?;

        loop {
            let op = if self.match_token(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_token(&TokenKind::Slash) {
                BinaryOp::Div
            } else {
                break;
            };

            let right = self.unary()?;
            let span = Span::merge(expr.span(), right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> TarnResult<Expr> {
        if self.check(&TokenKind::Minus) || self.check(&TokenKind::Bang) {
            let op_token = self.peek().clone();
            let op = if op_token.kind == TokenKind::Minus {
                UnaryOp::Negate
            } else {
                UnaryOp::Not
            };
            self.advance();
            let operand = self.unary()?;
            let span = Span::merge(op_token.span, operand.span());
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                span,
            });
        }

        self.power()
    }

    /// Postfix factorial and right-associative `^`, tighter than prefix unary
    fn power(&mut self) -> TarnResult<Expr> {
        let mut expr = self.primary()?;

        if self.match_token(&TokenKind::Bang) {
            let span = Span::merge(expr.span(), self.previous().span);
            expr = Expr::Unary {
                op: UnaryOp::Factorial,
                operand: Box::new(expr),
                span,
            };
        }

        if self.match_token(&TokenKind::Caret) {
            let right = self.power()?;
            let span = Span::merge(expr.span(), right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::Pow,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn primary(&mut self) -> TarnResult<Expr> {
        let token = self.peek().clone();

        match &token.kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Number(*n),
                    span: token.span,
                })
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Str(s.clone()),
                    span: token.span,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Boolean(true),
                    span: token.span,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Boolean(false),
                    span: token.span,
                })
            }
            TokenKind::LeftBracket => self.vector_literal(),
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(&TokenKind::RightParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::Identifier(_) => {
                if self.check_ahead(1, &TokenKind::LeftParen) {
                    self.call()
                } else {
                    self.variable()
                }
            }
            _ => Err(self.error("Expected expression")),
        }
    }

    fn vector_literal(&mut self) -> TarnResult<Expr> {
        let start_span = self.advance().span;

        let mut elements = Vec::new();
        if !self.check(&TokenKind::RightBracket) {
            loop {
                elements.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        let end = self.consume(&TokenKind::RightBracket, "Expected ']' after vector elements")?;
        let end_span = end.span;

        Ok(Expr::Vector {
            elements,
            span: Span::merge(start_span, end_span),
        })
    }

    /// Identifier or indexed access `id[e][e]...`
    fn variable(&mut self) -> TarnResult<Expr> {
        let name_token = self.consume_identifier("Expected variable name")?;
        let name = name_token.lexeme.clone();
        let start_span = name_token.span;

        if !self.check(&TokenKind::LeftBracket) {
            return Ok(Expr::Identifier {
                name,
                span: start_span,
            });
        }

        let mut indices = Vec::new();
        while self.match_token(&TokenKind::LeftBracket) {
            indices.push(self.expression()?);
            self.consume(&TokenKind::RightBracket, "Expected ']' after index")?;
        }
        let end_span = self.previous().span;

        Ok(Expr::Index {
            name,
            indices,
            span: Span::merge(start_span, end_span),
        })
    }

    /// Call to a user function, or a dedicated node when the callee is one of
    /// the recognized builtin names
    fn call(&mut self) -> TarnResult<Expr> {
        let name_token = self.consume_identifier("Expected function name")?;
        let name = name_token.lexeme.clone();
        let name_span = name_token.span;

        self.consume(&TokenKind::LeftParen, "Expected '(' after function name")?;

        if let Some(builtin) = Builtin::from_name(&name) {
            let arg = if builtin.takes_argument() {
                Some(Box::new(self.expression()?))
            } else {
                None
            };
            let end = self.consume(&TokenKind::RightParen, "Expected ')' after builtin argument")?;
            let end_span = end.span;
            return Ok(Expr::Builtin {
                builtin,
                arg,
                span: Span::merge(name_span, end_span),
            });
        }

        let args = self.parse_arguments()?;
        let end = self.consume(&TokenKind::RightParen, "Expected ')' after arguments")?;
        let end_span = end.span;

        Ok(Expr::Call {
            callee: Box::new(Expr::Identifier {
                name,
                span: name_span,
            }),
            args,
            span: Span::merge(name_span, end_span),
        })
    }

    fn parse_arguments(&mut self) -> TarnResult<Vec<Expr>> {
        let mut args = Vec::new();

        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        Ok(args)
    }

    // ==================== Helpers ====================

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current - 1]
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        if self.is_at_end() {
            return false;
        }
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    /// Check the token at offset n ahead (0 = current)
    fn check_ahead(&self, n: usize, kind: &TokenKind) -> bool {
        let idx = self.current + n;
        if idx >= self.tokens.len() {
            return false;
        }
        std::mem::discriminant(&self.tokens[idx].kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> TarnResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn consume_identifier(&mut self, message: &str) -> TarnResult<&Token> {
        if matches!(self.peek().kind, TokenKind::Identifier(_)) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    /// A ParseError naming what was expected and the token actually found
    fn error(&self, message: &str) -> TarnError {
        let token = self.peek();
        let found = if token.is_eof() {
            "end of input".to_string()
        } else {
            format!("'{}'", token)
        };
        TarnError::parse_error(
            format!("{}, found {}", message, found),
            token.span,
            &self.file,
        )
        .with_source(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::lexer::Scanner;

    fn parse(source: &str) -> TarnResult<Program> {
        let tokens = Scanner::new(source, "<test>").scan_tokens()?;
        Parser::new(tokens, "<test>", source).parse()
    }

    fn parse_expr(source: &str) -> Expr {
        let program = parse(&format!("{};", source)).unwrap();
        match program.statements.into_iter().next().unwrap() {
            Stmt::Expression { expr, .. } => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_multiplication_binds_tighter_than_addition() {
        let expr = parse_expr("1 + 2 * 3");
        match expr {
            Expr::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOp::Add);
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_power_is_right_associative() {
        let expr = parse_expr("2 ^ 3 ^ 4");
        match expr {
            Expr::Binary { op, right, .. } => {
                assert_eq!(op, BinaryOp::Pow);
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_power_binds_tighter_than_prefix_minus() {
        let expr = parse_expr("-2 ^ 2");
        match expr {
            Expr::Unary { op, operand, .. } => {
                assert_eq!(op, UnaryOp::Negate);
                assert!(matches!(*operand, Expr::Binary { op: BinaryOp::Pow, .. }));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn test_postfix_factorial_on_atom() {
        let expr = parse_expr("5!");
        assert!(matches!(
            expr,
            Expr::Unary {
                op: UnaryOp::Factorial,
                ..
            }
        ));
    }

    #[test]
    fn test_assignment_vs_expression_statement() {
        let program = parse("x = 1; x == 1;").unwrap();
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(program.statements[0], Stmt::Assign { .. }));
        assert!(matches!(program.statements[1], Stmt::Expression { .. }));
    }

    #[test]
    fn test_indexed_assignment_target() {
        let program = parse("m[0][1] = 5;").unwrap();
        match &program.statements[0] {
            Stmt::Assign { name, indices, .. } => {
                assert_eq!(name, "m");
                assert_eq!(indices.len(), 2);
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_block_statement_counts_match_braces() {
        let program = parse("{ var a = 1; a = 2; print(a); } { var b = 1; }").unwrap();
        let counts: Vec<usize> = program
            .statements
            .iter()
            .map(|s| match s {
                Stmt::Block { statements, .. } => statements.len(),
                _ => panic!("expected block"),
            })
            .collect();
        assert_eq!(counts, vec![3, 1]);
    }

    #[test]
    fn test_nested_block_counts() {
        let program = parse("{ { var x = 1; } var y = 2; }").unwrap();
        match &program.statements[0] {
            Stmt::Block { statements, .. } => {
                assert_eq!(statements.len(), 2);
                match &statements[0] {
                    Stmt::Block { statements, .. } => assert_eq!(statements.len(), 1),
                    other => panic!("expected inner block, got {:?}", other),
                }
            }
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn test_else_binds_to_nearest_if() {
        let program = parse("if (a) if (b) print(1); else print(2);").unwrap();
        match &program.statements[0] {
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                assert!(else_branch.is_none());
                assert!(matches!(
                    **then_branch,
                    Stmt::If {
                        else_branch: Some(_),
                        ..
                    }
                ));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_function_declaration() {
        let program = parse("fun add(x, y) { return x + y; }").unwrap();
        match &program.statements[0] {
            Stmt::Function { def } => {
                assert_eq!(def.name, "add");
                assert_eq!(def.params.len(), 2);
                assert!(matches!(*def.body, Stmt::Block { .. }));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn test_vector_literal_and_index() {
        let expr = parse_expr("[1, 2, 3]");
        assert!(matches!(expr, Expr::Vector { ref elements, .. } if elements.len() == 3));

        let expr = parse_expr("m[1][2]");
        assert!(matches!(expr, Expr::Index { ref indices, .. } if indices.len() == 2));
    }

    #[test]
    fn test_builtin_calls_parse_into_dedicated_nodes() {
        let expr = parse_expr("len(x)");
        match expr {
            Expr::Builtin { builtin, arg, .. } => {
                assert_eq!(builtin, Builtin::Len);
                assert!(arg.is_some());
            }
            other => panic!("unexpected expression: {:?}", other),
        }

        let expr = parse_expr("input()");
        match expr {
            Expr::Builtin { builtin, arg, .. } => {
                assert_eq!(builtin, Builtin::Input);
                assert!(arg.is_none());
            }
            other => panic!("unexpected expression: {:?}", other),
        }

        // Unrecognized names stay generic calls
        let expr = parse_expr("f(1, 2)");
        assert!(matches!(expr, Expr::Call { ref args, .. } if args.len() == 2));
    }

    #[test]
    fn test_import_statement() {
        let program = parse("import \"lib.tarn\";").unwrap();
        assert!(
            matches!(&program.statements[0], Stmt::Import { path, .. } if path == "lib.tarn")
        );
    }

    #[test]
    fn test_parse_error_names_expected_and_found() {
        let err = parse("var = 1;").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert!(err.message.contains("Expected variable name"));
        assert!(err.message.contains("found '='"));
    }

    #[test]
    fn test_missing_semicolon_is_parse_error() {
        let err = parse("print(1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert!(err.message.contains("Expected ';'"));
        assert!(err.message.contains("end of input"));
    }

    #[test]
    fn test_while_takes_single_statement_body() {
        let program = parse("while (x < 3) x = x + 1;").unwrap();
        match &program.statements[0] {
            Stmt::While { body, .. } => assert!(matches!(**body, Stmt::Assign { .. })),
            other => panic!("unexpected statement: {:?}", other),
        }
    }
}
