use logos::Logos;
use std::ops::Range;
use thiserror::Error;

/// Helper function to unescape string literals
fn unescape_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('0') => result.push('\0'),
                Some('\'') => result.push('\''),
                Some('"') => result.push('"'),
                Some('\\') => result.push('\\'),
                Some('x') => {
                    // Hex escape: \xNN
                    let hex: String = chars.by_ref().take(2).collect();
                    if let Ok(code) = u32::from_str_radix(&hex, 16) {
                        if let Some(c) = char::from_u32(code) {
                            result.push(c);
                        }
                    }
                }
                Some(c) => {
                    result.push('\\');
                    result.push(c);
                }
                None => result.push('\\'),
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Token types for the Pyrite surface syntax
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")]
#[logos(skip r"#[^\n]*")]
#[logos(skip r"\\\r?\n")]
pub enum Token {
    // Keywords
    #[token("def")]
    Def,
    #[token("class")]
    Class,
    #[token("return")]
    Return,
    #[token("yield")]
    Yield,
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("match")]
    Match,
    #[token("case")]
    Case,
    #[token("with")]
    With,
    #[token("as")]
    As,
    #[token("pass")]
    Pass,
    #[token("import")]
    Import,
    #[token("from")]
    From,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("True")]
    True,
    #[token("False")]
    False,
    #[token("None")]
    NoneKw,

    // Literals
    #[regex(r"[0-9][0-9_]*", |lex| parse_int(lex.slice(), 10))]
    #[regex(r"0[xX][0-9a-fA-F][0-9a-fA-F_]*", |lex| parse_int(&lex.slice()[2..], 16))]
    #[regex(r"0[bB][01][01_]*", |lex| parse_int(&lex.slice()[2..], 2))]
    Int(i128),

    #[regex(r"[0-9][0-9_]*\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().replace('_', "").parse::<f64>().ok())]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", |lex| lex.slice().replace('_', "").parse::<f64>().ok())]
    Float(f64),

    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| { let s = lex.slice(); unescape_string(&s[1..s.len()-1]) })]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| { let s = lex.slice(); unescape_string(&s[1..s.len()-1]) })]
    Str(String),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Operators
    #[token("**")]
    DoubleStar,
    #[token("//")]
    DoubleSlash,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("->")]
    Arrow,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Eq,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("@")]
    At,

    #[token("\n")]
    #[token("\r\n")]
    RawNewline,

    // Layout tokens synthesized by the indentation pass. The control
    // characters never occur in source text; the patterns exist only so
    // the derive accepts the variants.
    #[token("\u{1}")]
    Newline,
    #[token("\u{2}")]
    Indent,
    #[token("\u{3}")]
    Dedent,
}

fn parse_int(digits: &str, radix: u32) -> Option<i128> {
    i128::from_str_radix(&digits.replace('_', ""), radix).ok()
}

/// A token with its byte range in the source
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSpan {
    pub token: Token,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LexError {
    #[error("unrecognized token at byte {0}")]
    InvalidToken(usize),
    #[error("tab character in indentation at byte {0}")]
    TabInIndent(usize),
    #[error("unindent does not match any outer indentation level at byte {0}")]
    InconsistentDedent(usize),
}

/// Tokenizer for Pyrite source: runs logos over the text, then converts raw
/// newlines into NEWLINE / INDENT / DEDENT layout tokens.
///
/// Layout rules (Python-style):
/// - A raw newline at bracket depth zero ends a logical line.
/// - Blank lines and comment-only lines do not produce layout tokens.
/// - Indentation must be spaces; tabs in leading whitespace are an error.
/// - At end of input, one DEDENT is emitted per open indentation level.
pub struct Lexer<'a> {
    source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source }
    }

    pub fn tokenize(&self) -> Result<Vec<TokenSpan>, LexError> {
        let mut raw = Vec::new();
        let mut lexer = Token::lexer(self.source);
        while let Some(result) = lexer.next() {
            let span = lexer.span();
            let token = result.map_err(|_| LexError::InvalidToken(span.start))?;
            raw.push(TokenSpan { token, span });
        }

        self.apply_layout(raw)
    }

    /// Indentation column of the token that starts a logical line, in
    /// spaces. Errors on tabs in the leading whitespace.
    fn indent_of(&self, offset: usize) -> Result<usize, LexError> {
        let line_start = self.source[..offset].rfind('\n').map_or(0, |p| p + 1);
        let leading = &self.source[line_start..offset];
        if leading.contains('\t') {
            return Err(LexError::TabInIndent(line_start));
        }
        Ok(offset - line_start)
    }

    fn apply_layout(&self, raw: Vec<TokenSpan>) -> Result<Vec<TokenSpan>, LexError> {
        let mut out: Vec<TokenSpan> = Vec::with_capacity(raw.len());
        let mut indent_stack: Vec<usize> = vec![0];
        let mut bracket_depth: usize = 0;
        let mut at_line_start = true;
        let mut pending_newline: Option<Range<usize>> = None;

        for ts in raw {
            match &ts.token {
                Token::RawNewline => {
                    if bracket_depth == 0 && !at_line_start {
                        // End of a logical line; emit once even for
                        // consecutive blank lines.
                        pending_newline = Some(ts.span.clone());
                        at_line_start = true;
                    }
                    continue;
                }
                _ => {}
            }

            if at_line_start && bracket_depth == 0 {
                if let Some(nl_span) = pending_newline.take() {
                    out.push(TokenSpan {
                        token: Token::Newline,
                        span: nl_span,
                    });
                }
                let indent = self.indent_of(ts.span.start)?;
                let current = *indent_stack.last().unwrap_or(&0);
                if indent > current {
                    indent_stack.push(indent);
                    out.push(TokenSpan {
                        token: Token::Indent,
                        span: ts.span.start..ts.span.start,
                    });
                } else if indent < current {
                    while indent < *indent_stack.last().unwrap_or(&0) {
                        indent_stack.pop();
                        out.push(TokenSpan {
                            token: Token::Dedent,
                            span: ts.span.start..ts.span.start,
                        });
                    }
                    if indent != *indent_stack.last().unwrap_or(&0) {
                        return Err(LexError::InconsistentDedent(ts.span.start));
                    }
                }
                at_line_start = false;
            }

            match &ts.token {
                Token::LParen | Token::LBracket | Token::LBrace => bracket_depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    bracket_depth = bracket_depth.saturating_sub(1)
                }
                _ => {}
            }

            out.push(ts);
        }

        let end = self.source.len();
        if let Some(nl_span) = pending_newline.take() {
            // Final logical line ended in a raw newline still pending.
            out.push(TokenSpan {
                token: Token::Newline,
                span: nl_span,
            });
        } else if !at_line_start {
            out.push(TokenSpan {
                token: Token::Newline,
                span: end..end,
            });
        }
        while indent_stack.len() > 1 {
            indent_stack.pop();
            out.push(TokenSpan {
                token: Token::Dedent,
                span: end..end,
            });
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        Lexer::new(source)
            .tokenize()
            .expect("tokenize failed")
            .into_iter()
            .map(|ts| ts.token)
            .collect()
    }

    #[test]
    fn basic_tokens() {
        let toks = kinds("x: i32 = 41 + 1\n");
        assert_eq!(
            toks,
            vec![
                Token::Ident("x".into()),
                Token::Colon,
                Token::Ident("i32".into()),
                Token::Eq,
                Token::Int(41),
                Token::Plus,
                Token::Int(1),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn indent_dedent_pairing() {
        let src = "def f():\n    x = 1\n    return x\n";
        let toks = kinds(src);
        let indents = toks.iter().filter(|t| **t == Token::Indent).count();
        let dedents = toks.iter().filter(|t| **t == Token::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
    }

    #[test]
    fn blank_lines_and_comments_are_transparent() {
        let src = "def f():\n\n    # comment only\n    return 1\n";
        let toks = kinds(src);
        let newlines = toks.iter().filter(|t| **t == Token::Newline).count();
        // one after the def header, one after the return
        assert_eq!(newlines, 2);
        assert_eq!(toks.iter().filter(|t| **t == Token::Indent).count(), 1);
    }

    #[test]
    fn brackets_join_lines() {
        let src = "f(1,\n  2,\n  3)\n";
        let toks = kinds(src);
        assert_eq!(toks.iter().filter(|t| **t == Token::Newline).count(), 1);
        assert_eq!(toks.iter().filter(|t| **t == Token::Indent).count(), 0);
    }

    #[test]
    fn nested_dedents_at_eof() {
        let src = "def f():\n    if x:\n        return 1";
        let toks = kinds(src);
        assert_eq!(toks.iter().filter(|t| **t == Token::Dedent).count(), 2);
    }

    #[test]
    fn tab_in_indent_rejected() {
        let err = Lexer::new("def f():\n\treturn 1\n").tokenize().unwrap_err();
        assert!(matches!(err, LexError::TabInIndent(_)));
    }

    #[test]
    fn inconsistent_dedent_rejected() {
        let err = Lexer::new("def f():\n    x = 1\n  y = 2\n")
            .tokenize()
            .unwrap_err();
        assert!(matches!(err, LexError::InconsistentDedent(_)));
    }

    #[test]
    fn numeric_literals() {
        let toks = kinds("0xFF 0b1010 1_000 3.5 1e3\n");
        assert_eq!(
            toks,
            vec![
                Token::Int(255),
                Token::Int(10),
                Token::Int(1000),
                Token::Float(3.5),
                Token::Float(1000.0),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let toks = kinds("\"a\\n\" 'b'\n");
        assert_eq!(
            toks,
            vec![
                Token::Str("a\n".into()),
                Token::Str("b".into()),
                Token::Newline,
            ]
        );
    }

    #[test]
    fn decorated_def() {
        let src = "@compile\ndef f() -> i32:\n    return 0\n";
        let toks = kinds(src);
        assert_eq!(toks[0], Token::At);
        assert_eq!(toks[1], Token::Ident("compile".into()));
        assert!(toks.contains(&Token::Arrow));
    }
}
