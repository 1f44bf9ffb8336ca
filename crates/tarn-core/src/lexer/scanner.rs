// Tarn scanner
// Converts source text into tokens

use crate::error::{Span, TarnError, TarnResult};
use crate::lexer::token::{Token, TokenKind};

/// Scanner that tokenizes Tarn source code
pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    file: String,
}

impl Scanner {
    pub fn new(source: &str, file: impl Into<String>) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            file: file.into(),
        }
    }

    /// Scan all tokens from the source. The final token is always Eof.
    pub fn scan_tokens(&mut self) -> TarnResult<Vec<Token>> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token()?;
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            "",
            Span::single(self.line, self.column, self.current),
        ));

        Ok(std::mem::take(&mut self.tokens))
    }

    fn scan_token(&mut self) -> TarnResult<()> {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenKind::LeftParen),
            ')' => self.add_token(TokenKind::RightParen),
            '{' => self.add_token(TokenKind::LeftBrace),
            '}' => self.add_token(TokenKind::RightBrace),
            '[' => self.add_token(TokenKind::LeftBracket),
            ']' => self.add_token(TokenKind::RightBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),

            '+' => self.add_token(TokenKind::Plus),
            '-' => self.add_token(TokenKind::Minus),
            '*' => self.add_token(TokenKind::Star),
            '/' => self.add_token(TokenKind::Slash),
            '^' => self.add_token(TokenKind::Caret),

            '=' => {
                let kind = if self.match_char('=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '!' => {
                let kind = if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.match_char('=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }

            // Whitespace
            ' ' | '\r' | '\t' => {}
            '\n' => {
                self.line += 1;
                self.column = 1;
            }

            '"' => self.string()?,

            c if c.is_ascii_digit() => self.number(),
            c if is_identifier_start(c) => self.identifier(),

            _ => {
                return Err(self
                    .error(&format!("Unexpected character '{}'", c))
                    .with_help("Remove this character or check for typos"));
            }
        }

        Ok(())
    }

    /// Double-quoted string literal, no escape processing
    fn string(&mut self) -> TarnResult<()> {
        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\n' {
                self.line += 1;
                self.column = 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return Err(TarnError::lex_error(
                "Unterminated string",
                Span::from_positions(self.start_line, self.start_column, self.line, self.column),
                &self.file,
            )
            .with_help("Add a closing double quote to terminate the string"));
        }

        // Closing quote
        self.advance();

        let value: String = self.source[self.start + 1..self.current - 1]
            .iter()
            .collect();
        self.add_token(TokenKind::Str(value));
        Ok(())
    }

    /// Numeric literal. A literal containing a decimal point is floating
    /// point; both forms are carried as f64.
    fn number(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == '.' {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let value: f64 = text.parse().unwrap_or(0.0);
        self.add_token(TokenKind::Number(value));
    }

    fn identifier(&mut self) {
        while is_identifier_continue(self.peek()) {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();

        // The fixed keyword set takes priority over generic identifiers
        let kind = match text.as_str() {
            "var" => TokenKind::Var,
            "fun" => TokenKind::Fun,
            "print" => TokenKind::Print,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "import" => TokenKind::Import,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Identifier(text.clone()),
        };

        self.add_token(kind);
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let span = Span::from_positions(
            self.start_line,
            self.start_column,
            self.line,
            self.column.saturating_sub(1).max(1),
        );
        self.tokens.push(Token::new(kind, lexeme, span));
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        if c != '\n' {
            self.column += 1;
        }
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.current += 1;
        self.column += 1;
        true
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.source[self.current]
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn error(&self, message: &str) -> TarnError {
        TarnError::lex_error(
            message,
            Span::from_positions(self.start_line, self.start_column, self.line, self.column),
            &self.file,
        )
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_identifier_continue(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source, "<test>")
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_keywords_take_priority_over_identifiers() {
        assert_eq!(
            kinds("var x while whilst"),
            vec![
                TokenKind::Var,
                TokenKind::Identifier("x".into()),
                TokenKind::While,
                TokenKind::Identifier("whilst".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_break_and_continue_are_keywords() {
        assert_eq!(
            kinds("break; continue;"),
            vec![
                TokenKind::Break,
                TokenKind::Semicolon,
                TokenKind::Continue,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_integer_and_float() {
        assert_eq!(
            kinds("42 3.5"),
            vec![TokenKind::Number(42.0), TokenKind::Number(3.5), TokenKind::Eof]
        );
    }

    #[test]
    fn test_two_char_operators() {
        assert_eq!(
            kinds("= == ! != < <= > >="),
            vec![
                TokenKind::Equal,
                TokenKind::EqualEqual,
                TokenKind::Bang,
                TokenKind::BangEqual,
                TokenKind::Less,
                TokenKind::LessEqual,
                TokenKind::Greater,
                TokenKind::GreaterEqual,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_literal_no_escape_processing() {
        assert_eq!(
            kinds(r#""hello \n world""#),
            vec![TokenKind::Str("hello \\n world".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_is_lex_error() {
        let err = Scanner::new("\"abc", "<test>").scan_tokens().unwrap_err();
        assert_eq!(err.kind, ErrorKind::LexError);
        assert!(err.message.contains("Unterminated string"));
    }

    #[test]
    fn test_unknown_character_is_lex_error() {
        let err = Scanner::new("var x = 1 @ 2;", "<test>").scan_tokens().unwrap_err();
        assert_eq!(err.kind, ErrorKind::LexError);
        assert!(err.message.contains('@'));
    }

    #[test]
    fn test_ends_with_eof_and_tracks_lines() {
        let tokens = Scanner::new("var\nx", "<test>").scan_tokens().unwrap();
        assert!(tokens.last().unwrap().is_eof());
        assert_eq!(tokens[1].span.start.line, 2);
    }

    #[test]
    fn test_whitespace_is_skipped() {
        assert_eq!(kinds(" \t\r\n  "), vec![TokenKind::Eof]);
    }
}
