//! Lexer for ByteScript
//!
//! Converts source code into a stream of tokens.

use crate::error::{ErrorKind, Result, ScriptError};
use crate::token::{lookup_keyword, Span, Token, TokenKind};

/// Largest digit sequence accepted for an int literal; only valid after `-`.
pub const MAX_INT_MAGNITUDE: i64 = i32::MAX as i64 + 1;

/// The lexer state
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer from source code
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Number lines from `line` instead of 1, for text cut out of a larger
    /// file.
    pub fn starting_at_line(mut self, line: usize) -> Self {
        self.line = line.max(1);
        self
    }

    /// Tokenize the entire source
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.current_pos, self.current_pos, self.line, self.column),
        ));

        Ok(tokens)
    }

    /// Get the next token
    fn next_token(&mut self) -> Result<Option<Token>> {
        self.skip_whitespace_and_comments();

        let Some(&(start_pos, ch)) = self.chars.peek() else {
            return Ok(None);
        };

        let start_line = self.line;
        let start_column = self.column;

        let kind = match ch {
            '(' => { self.advance(); TokenKind::LeftParen }
            ')' => { self.advance(); TokenKind::RightParen }
            '{' => { self.advance(); TokenKind::LeftBrace }
            '}' => { self.advance(); TokenKind::RightBrace }
            ',' => { self.advance(); TokenKind::Comma }
            ';' => { self.advance(); TokenKind::Semicolon }
            '@' => { self.advance(); TokenKind::At }
            '+' => { self.advance(); TokenKind::Plus }
            '-' => { self.advance(); TokenKind::Minus }
            '*' => { self.advance(); TokenKind::Star }
            '/' => { self.advance(); TokenKind::Slash }
            '%' => { self.advance(); TokenKind::Percent }
            '^' => { self.advance(); TokenKind::Caret }

            '=' => {
                self.advance();
                if self.match_char('=') { TokenKind::EqualEqual } else { TokenKind::Equal }
            }
            '!' => {
                self.advance();
                if self.match_char('=') { TokenKind::BangEqual } else { TokenKind::Bang }
            }
            '<' => {
                self.advance();
                if self.match_char('=') { TokenKind::LessEqual } else { TokenKind::Less }
            }
            '>' => {
                self.advance();
                if self.match_char('=') { TokenKind::GreaterEqual } else { TokenKind::Greater }
            }
            '&' | '|' => {
                self.advance();
                if !self.match_char(ch) {
                    return Err(ScriptError::new(
                        ErrorKind::UnexpectedCharacter(ch),
                        Some(self.span_from(start_pos, start_line, start_column)),
                    ));
                }
                if ch == '&' { TokenKind::AndAnd } else { TokenKind::OrOr }
            }

            '"' => self.scan_string()?,

            c if c.is_ascii_digit() => self.scan_number()?,

            c if c.is_alphabetic() || c == '_' => self.scan_identifier(),

            _ => {
                self.advance();
                return Err(ScriptError::new(
                    ErrorKind::UnexpectedCharacter(ch),
                    Some(self.span_from(start_pos, start_line, start_column)),
                ));
            }
        };

        Ok(Some(Token::new(kind, self.span_from(start_pos, start_line, start_column))))
    }

    fn span_from(&self, start_pos: usize, line: usize, column: usize) -> Span {
        Span::new(start_pos, self.current_pos, line, column)
    }

    /// Advance and return the current character
    fn advance(&mut self) -> Option<char> {
        let (pos, ch) = self.chars.next()?;
        self.current_pos = pos + ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, ch)| ch)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skip whitespace (newlines included) and `//` comments
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }

                '/' if self.source[self.current_pos..].starts_with("//") => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }

                _ => break,
            }
        }
    }

    /// Scan a string literal
    fn scan_string(&mut self) -> Result<TokenKind> {
        let start_line = self.line;
        let start_column = self.column;
        let start_pos = self.current_pos;

        // Opening quote
        self.advance();

        let mut value = String::new();

        loop {
            match self.advance() {
                Some('"') => return Ok(TokenKind::String(value)),
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some(c) => value.push(c),
                    None => break,
                },
                Some(c) => value.push(c),
                None => break,
            }
        }

        Err(ScriptError::new(
            ErrorKind::UnterminatedString,
            Some(Span::new(start_pos, self.current_pos, start_line, start_column)),
        ))
    }

    /// Scan an int or float literal; floats need a digit after the dot
    fn scan_number(&mut self) -> Result<TokenKind> {
        let start = self.current_pos;
        let start_column = self.column;

        self.consume_digits();

        let mut is_float = false;
        if self.peek_char() == Some('.') {
            let remaining = &self.source[self.current_pos..];
            if remaining.chars().nth(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance();
                self.consume_digits();
            }
        }

        let text = &self.source[start..self.current_pos];
        let invalid = || {
            ScriptError::new(
                ErrorKind::InvalidNumber(text.to_string()),
                Some(Span::new(start, self.current_pos, self.line, start_column)),
            )
        };

        if is_float {
            text.parse::<f32>().map(TokenKind::Float).map_err(|_| invalid())
        } else {
            text.parse::<i64>()
                .ok()
                .filter(|n| *n <= MAX_INT_MAGNITUDE)
                .map(TokenKind::Int)
                .ok_or_else(invalid)
        }
    }

    fn consume_digits(&mut self) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
    }

    /// Scan an identifier or keyword
    fn scan_identifier(&mut self) -> TokenKind {
        let start = self.current_pos;

        while self.peek_char().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }

        let text = &self.source[start..self.current_pos];
        lookup_keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        lexer
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .filter(|k| !matches!(k, TokenKind::Eof))
            .collect()
    }

    #[test]
    fn test_keywords() {
        let tokens = tokenize("int float if elseif else while return print");
        assert_eq!(tokens, vec![
            TokenKind::IntType,
            TokenKind::FloatType,
            TokenKind::If,
            TokenKind::Elseif,
            TokenKind::Else,
            TokenKind::While,
            TokenKind::Return,
            TokenKind::Print,
        ]);
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize("+ - * / % ^ = == != < <= > >= && || !");
        assert_eq!(tokens, vec![
            TokenKind::Plus,
            TokenKind::Minus,
            TokenKind::Star,
            TokenKind::Slash,
            TokenKind::Percent,
            TokenKind::Caret,
            TokenKind::Equal,
            TokenKind::EqualEqual,
            TokenKind::BangEqual,
            TokenKind::Less,
            TokenKind::LessEqual,
            TokenKind::Greater,
            TokenKind::GreaterEqual,
            TokenKind::AndAnd,
            TokenKind::OrOr,
            TokenKind::Bang,
        ]);
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 3.5 0 100.0 7.");
        assert_eq!(tokens, vec![
            TokenKind::Int(42),
            TokenKind::Float(3.5),
            TokenKind::Int(0),
            TokenKind::Float(100.0),
            TokenKind::Int(7),
        ]);
    }

    #[test]
    fn test_int_overflow_is_rejected() {
        let err = Lexer::new("int x = 99999999999;").tokenize().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidNumber(ref s) if s == "99999999999"));
    }

    #[test]
    fn test_int_min_magnitude_is_lexed() {
        let tokens = tokenize("2147483648");
        assert_eq!(tokens, vec![TokenKind::Int(2_147_483_648)]);
        let err = Lexer::new("2147483649").tokenize().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidNumber(_)));
    }

    #[test]
    fn test_strings_and_escapes() {
        let tokens = tokenize(r#""hello" "a\"b\n""#);
        assert_eq!(tokens, vec![
            TokenKind::String("hello".to_string()),
            TokenKind::String("a\"b\n".to_string()),
        ]);
    }

    #[test]
    fn test_single_ampersand_is_an_error() {
        let err = Lexer::new("a & b").tokenize().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnexpectedCharacter('&')));
    }

    #[test]
    fn test_lines_and_comments() {
        let mut lexer = Lexer::new("// header\nint a;\n  a = 1;");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::IntType);
        assert_eq!(tokens[0].span.line, 2);
        assert_eq!(tokens[3].kind, TokenKind::Ident("a".to_string()));
        assert_eq!(tokens[3].span.line, 3);
        assert_eq!(tokens[3].span.column, 3);
    }

    #[test]
    fn test_starting_line() {
        let tokens = Lexer::new("int a;\nb").starting_at_line(10).tokenize().unwrap();
        assert_eq!(tokens[0].span.line, 10);
        assert_eq!(tokens[3].span.line, 11);
    }
}
