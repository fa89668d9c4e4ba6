//! GraphQL Lexer
//!
//! Turns query text into positioned tokens. Commas are insignificant and
//! skipped like whitespace; comments are kept as tokens so the parser can
//! bind them to the field that follows.

use thiserror::Error;

/// Failure to tokenize or parse query text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    pub(crate) fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Token types for GraphQL lexing
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Punctuation
    BraceOpen,    // {
    BraceClose,   // }
    ParenOpen,    // (
    ParenClose,   // )
    BracketOpen,  // [
    BracketClose, // ]
    Colon,        // :
    Equals,       // =
    Bang,         // !
    At,           // @
    Pipe,         // |
    Amp,          // &
    Spread,       // ...

    // Literals and identifiers
    Name(String),
    /// `$name`, stored without the sigil
    Variable(String),
    Int(String),
    Float(String),
    /// Decoded string contents
    Str(String),

    /// Comment text after `#`, up to the end of the line
    Comment(String),

    Eof,
}

/// A token with position information
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Tokenizes `input`, always ending with an `Eof` token.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        Self {
            input,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input[self.position..].chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current_char()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_ignored(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() || ch == ',' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::at(message, self.line, self.column)
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_ignored();
        let (line, column) = (self.line, self.column);
        let token = |kind| Token { kind, line, column };

        let Some(ch) = self.current_char() else {
            return Ok(token(TokenKind::Eof));
        };

        let single = match ch {
            '{' => Some(TokenKind::BraceOpen),
            '}' => Some(TokenKind::BraceClose),
            '(' => Some(TokenKind::ParenOpen),
            ')' => Some(TokenKind::ParenClose),
            '[' => Some(TokenKind::BracketOpen),
            ']' => Some(TokenKind::BracketClose),
            ':' => Some(TokenKind::Colon),
            '=' => Some(TokenKind::Equals),
            '!' => Some(TokenKind::Bang),
            '@' => Some(TokenKind::At),
            '|' => Some(TokenKind::Pipe),
            '&' => Some(TokenKind::Amp),
            _ => None,
        };
        if let Some(kind) = single {
            self.advance();
            return Ok(token(kind));
        }

        match ch {
            '#' => {
                self.advance();
                let start = self.position;
                while let Some(c) = self.current_char() {
                    if c == '\n' || c == '\r' {
                        break;
                    }
                    self.advance();
                }
                let text = self.input[start..self.position].trim_end().to_string();
                Ok(token(TokenKind::Comment(text)))
            }
            '.' => {
                if self.input[self.position..].starts_with("...") {
                    for _ in 0..3 {
                        self.advance();
                    }
                    Ok(token(TokenKind::Spread))
                } else {
                    Err(self.error("expected '...'"))
                }
            }
            '$' => {
                self.advance();
                let name = self.read_name();
                if name.is_empty() {
                    return Err(self.error("expected variable name after '$'"));
                }
                Ok(token(TokenKind::Variable(name)))
            }
            '"' => {
                let value = if self.input[self.position..].starts_with("\"\"\"") {
                    self.read_block_string()?
                } else {
                    self.read_string()?
                };
                Ok(token(TokenKind::Str(value)))
            }
            c if c == '-' || c.is_ascii_digit() => self.read_number().map(token),
            c if c == '_' || c.is_ascii_alphabetic() => Ok(token(TokenKind::Name(self.read_name()))),
            other => Err(self.error(format!("unexpected character '{}'", other))),
        }
    }

    fn read_name(&mut self) -> String {
        let start = self.position;
        while let Some(c) = self.current_char() {
            if c == '_' || c.is_ascii_alphanumeric() {
                self.advance();
            } else {
                break;
            }
        }
        self.input[start..self.position].to_string()
    }

    fn read_digits(&mut self) -> usize {
        let mut count = 0;
        while matches!(self.current_char(), Some(c) if c.is_ascii_digit()) {
            self.advance();
            count += 1;
        }
        count
    }

    fn read_number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.position;
        let mut is_float = false;

        if self.current_char() == Some('-') {
            self.advance();
        }
        if self.read_digits() == 0 {
            return Err(self.error("expected digit"));
        }
        if self.current_char() == Some('.') && matches!(self.peek_char(1), Some(c) if c.is_ascii_digit())
        {
            is_float = true;
            self.advance();
            self.read_digits();
        }
        if matches!(self.current_char(), Some('e' | 'E')) {
            is_float = true;
            self.advance();
            if matches!(self.current_char(), Some('+' | '-')) {
                self.advance();
            }
            if self.read_digits() == 0 {
                return Err(self.error("expected exponent digits"));
            }
        }

        let text = self.input[start..self.position].to_string();
        Ok(if is_float {
            TokenKind::Float(text)
        } else {
            TokenKind::Int(text)
        })
    }

    fn read_string(&mut self) -> Result<String, ParseError> {
        self.advance();
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err(self.error("unterminated string")),
                Some('"') => return Ok(value),
                Some('\\') => {
                    let escaped = match self.advance() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{0008}',
                        Some('f') => '\u{000c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => self.read_unicode_escape()?,
                        _ => return Err(self.error("invalid escape sequence")),
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn read_unicode_escape(&mut self) -> Result<char, ParseError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .advance()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode escape"))
    }

    fn read_block_string(&mut self) -> Result<String, ParseError> {
        for _ in 0..3 {
            self.advance();
        }
        let start = self.position;
        loop {
            let rest = &self.input[self.position..];
            if rest.is_empty() {
                return Err(self.error("unterminated block string"));
            }
            if rest.starts_with("\\\"\"\"") {
                for _ in 0..4 {
                    self.advance();
                }
                continue;
            }
            if rest.starts_with("\"\"\"") {
                let raw = self.input[start..self.position].replace("\\\"\"\"", "\"\"\"");
                for _ in 0..3 {
                    self.advance();
                }
                return Ok(raw.trim().to_string());
            }
            self.advance();
        }
    }
}
