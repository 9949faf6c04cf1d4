// Recursive descent parser for the Pyrite surface syntax

use thiserror::Error;

mod parser;

pub use parser::Parser;

#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("lexer error: {0}")]
    LexerError(String),
    #[error("{message} at line {line}, column {column}")]
    UnexpectedToken {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("unexpected end of input: {0}")]
    UnexpectedEof(String),
}

/// Parse a complete source file into a module.
pub fn parse_module(path: &str, source: &str) -> Result<pyrite_ast::Module, ParseError> {
    let mut parser = Parser::new(source)?;
    parser.parse_module(path)
}
