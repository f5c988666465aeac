//! Tokenizer for rule expressions.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    /// `$name`, kept with its sigil because state keys include it.
    State(String),
    /// `#name`, an event data field.
    Field(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Question,
    Colon,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the source text.
    pub offset: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    Lexer {
        source,
        chars: source.char_indices().peekable(),
    }
    .run()
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Vec<Token>, ExprError> {
        let mut tokens: Vec<Token> = Vec::new();
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
                continue;
            }
            let kind = match c {
                '0'..='9' => {
                    // After `.` digits are a path segment: `$grid.0.1`.
                    let after_dot = tokens
                        .last()
                        .is_some_and(|token| token.kind == TokenKind::Dot);
                    self.number(offset, !after_dot)?
                }
                '"' | '\'' => self.string(offset, c)?,
                '$' => TokenKind::State(format!("${}", self.sigil_name(offset, '$')?)),
                '#' => TokenKind::Field(self.sigil_name(offset, '#')?),
                c if is_ident_start(c) => TokenKind::Ident(self.word()),
                _ => self.punct(offset, c)?,
            };
            tokens.push(Token { kind, offset });
        }
        tokens.push(Token {
            kind: TokenKind::Eof,
            offset: self.source.len(),
        });
        Ok(tokens)
    }

    fn number(&mut self, start: usize, allow_fraction: bool) -> Result<TokenKind, ExprError> {
        let mut end = start;
        let mut seen_dot = false;
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                end = offset + 1;
                self.chars.next();
            } else if c == '.' && allow_fraction && !seen_dot && self.digit_follows(offset) {
                seen_dot = true;
                end = offset + 1;
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.source[start..end];
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(start, format!("invalid number `{text}`")))
    }

    /// A `.` is part of a number only when a digit follows it, so `1.x`
    /// still lexes as member access.
    fn digit_follows(&self, dot_offset: usize) -> bool {
        self.source[dot_offset + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn string(&mut self, start: usize, quote: char) -> Result<TokenKind, ExprError> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, c)) if c == quote => return Ok(TokenKind::Str(value)),
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, escaped)) => value.push(escaped),
                    None => break,
                },
                Some((_, c)) => value.push(c),
                None => break,
            }
        }
        Err(self.error(start, "unterminated string".to_string()))
    }

    fn sigil_name(&mut self, start: usize, sigil: char) -> Result<String, ExprError> {
        self.chars.next();
        let name = self.word();
        if name.is_empty() {
            return Err(self.error(start, format!("expected a name after `{sigil}`")));
        }
        Ok(name)
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }

    fn punct(&mut self, offset: usize, c: char) -> Result<TokenKind, ExprError> {
        self.chars.next();
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' if self.eat('=') => {
                self.eat('=');
                TokenKind::EqEq
            }
            '!' if self.eat('=') => {
                self.eat('=');
                TokenKind::NotEq
            }
            '!' => TokenKind::Bang,
            '<' if self.eat('=') => TokenKind::LtEq,
            '<' => TokenKind::Lt,
            '>' if self.eat('=') => TokenKind::GtEq,
            '>' => TokenKind::Gt,
            '&' if self.eat('&') => TokenKind::AndAnd,
            '|' if self.eat('|') => TokenKind::OrOr,
            '=' => {
                return Err(self.error(offset, "assignment is not an expression; use `==`".into()));
            }
            other => return Err(self.error(offset, format!("unexpected character `{other}`"))),
        };
        Ok(kind)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().is_some_and(|&(_, c)| c == expected) {
            self.chars.next();
            return true;
        }
        false
    }

    fn error(&self, offset: usize, message: String) -> ExprError {
        ExprError::Parse {
            source_text: self.source.to_string(),
            offset,
            message,
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}
