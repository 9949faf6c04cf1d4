// Modular parser for the Pyrite surface syntax
// Organized into statement, item, expression, and pattern components

use crate::ParseError;
use pyrite_ast::*;
use pyrite_lexer::{Lexer, Token, TokenSpan};

mod expr;
mod items;
mod patterns;
mod stmt;

pub struct Parser<'a> {
    pub(crate) tokens: Vec<TokenSpan>,
    pub(crate) current: usize,
    pub(crate) source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(source)
            .tokenize()
            .map_err(|e| ParseError::LexerError(e.to_string()))?;

        let mut line_starts = vec![0usize];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }

        Ok(Self {
            tokens,
            current: 0,
            source,
            line_starts,
        })
    }

    pub fn parse_module(&mut self, path: &str) -> Result<Module, ParseError> {
        let mut body = Vec::new();
        self.skip_newlines();
        while !self.is_at_end() {
            body.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Module {
            path: path.to_string(),
            body,
        })
    }

    // ==================== Helper Methods ====================

    pub(crate) fn is_at_end(&self) -> bool {
        self.current >= self.tokens.len()
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current).map(|ts| &ts.token)
    }

    pub(crate) fn peek_ahead(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.current + offset).map(|ts| &ts.token)
    }

    pub(crate) fn check(&self, kind: &Token) -> bool {
        self.peek() == Some(kind)
    }

    pub(crate) fn advance(&mut self) -> Option<&TokenSpan> {
        let ts = self.tokens.get(self.current);
        if ts.is_some() {
            self.current += 1;
        }
        ts
    }

    pub(crate) fn match_token(&mut self, kind: &Token) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn consume(&mut self, kind: &Token, message: &str) -> Result<(), ParseError> {
        if self.match_token(kind) {
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    /// Consume an identifier token and return its text.
    pub(crate) fn consume_ident(&mut self, message: &str) -> Result<String, ParseError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(message)),
        }
    }

    pub(crate) fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.advance();
        }
    }

    /// Span of the current token (or end of input).
    pub(crate) fn current_span(&self) -> Span {
        let range = self
            .tokens
            .get(self.current)
            .or_else(|| self.tokens.last())
            .map(|ts| ts.span.clone())
            .unwrap_or(0..0);
        self.span_for(range)
    }

    /// Span of the most recently consumed token.
    pub(crate) fn previous_span(&self) -> Span {
        let range = self
            .tokens
            .get(self.current.saturating_sub(1))
            .map(|ts| ts.span.clone())
            .unwrap_or(0..0);
        self.span_for(range)
    }

    pub(crate) fn span_for(&self, range: std::ops::Range<usize>) -> Span {
        let line_idx = match self.line_starts.binary_search(&range.start) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_idx).copied().unwrap_or(0);
        Span::new(
            line_idx + 1,
            range.start - line_start + 1,
            range.end.saturating_sub(range.start).max(1),
        )
    }

    pub(crate) fn error(&self, message: &str) -> ParseError {
        match self.tokens.get(self.current) {
            Some(ts) => {
                let span = self.span_for(ts.span.clone());
                ParseError::UnexpectedToken {
                    message: format!("{} (found {:?})", message, ts.token),
                    line: span.line,
                    column: span.column,
                }
            }
            None => ParseError::UnexpectedEof(message.to_string()),
        }
    }

    /// Parse an indented suite after a `:` header, or a simple statement on
    /// the same line.
    pub(crate) fn parse_suite(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.consume(&Token::Colon, "Expected ':'")?;
        if self.match_token(&Token::Newline) {
            self.consume(&Token::Indent, "Expected an indented block")?;
            let mut body = Vec::new();
            self.skip_newlines();
            while !self.check(&Token::Dedent) && !self.is_at_end() {
                body.push(self.parse_statement()?);
                self.skip_newlines();
            }
            self.consume(&Token::Dedent, "Expected dedent to close block")?;
            Ok(body)
        } else {
            // Single statement on the header line
            let stmt = self.parse_simple_statement()?;
            if self.check(&Token::Newline) {
                self.advance();
            }
            Ok(vec![stmt])
        }
    }
}
