// Pattern parsing for match/case clauses

use super::Parser;
use crate::ParseError;
use pyrite_ast::*;
use pyrite_lexer::Token;

impl<'a> Parser<'a> {
    /// Top-level pattern of a case clause: OR alternatives.
    pub(crate) fn parse_pattern(&mut self) -> Result<Pattern, ParseError> {
        let first = self.parse_closed_pattern()?;
        if !self.check(&Token::Pipe) {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.match_token(&Token::Pipe) {
            alternatives.push(self.parse_closed_pattern()?);
        }
        Ok(Pattern::Or(alternatives))
    }

    fn parse_closed_pattern(&mut self) -> Result<Pattern, ParseError> {
        let span = self.current_span();
        match self.peek().cloned() {
            Some(Token::Int(v)) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Int(v), span)))
            }
            Some(Token::Minus) => {
                self.advance();
                match self.peek().cloned() {
                    Some(Token::Int(v)) => {
                        self.advance();
                        Ok(Pattern::Literal(Expr::new(ExprKind::Int(-v), span)))
                    }
                    Some(Token::Float(v)) => {
                        self.advance();
                        Ok(Pattern::Literal(Expr::new(ExprKind::Float(-v), span)))
                    }
                    _ => Err(self.error("Expected numeric literal after '-' in pattern")),
                }
            }
            Some(Token::Float(v)) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Float(v), span)))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Str(s), span)))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Bool(true), span)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Pattern::Literal(Expr::new(ExprKind::Bool(false), span)))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                if name == "_" {
                    return Ok(Pattern::Wildcard);
                }
                if self.check(&Token::Dot) {
                    // Dotted value: Enum.Variant, optionally constructor form
                    let mut expr = Expr::new(ExprKind::Name(name), span);
                    while self.match_token(&Token::Dot) {
                        let attr = self.consume_ident("Expected name after '.' in pattern")?;
                        let prev = expr.span;
                        expr = Expr::new(
                            ExprKind::Attribute {
                                value: Box::new(expr),
                                attr,
                            },
                            prev,
                        );
                    }
                    if self.check(&Token::LParen) {
                        let args = self.parse_constructor_args()?;
                        return Ok(Pattern::Constructor { path: expr, args });
                    }
                    return Ok(Pattern::Value(expr));
                }
                if self.check(&Token::LParen) {
                    // Constructor by bare name (e.g. variant imported directly)
                    let path = Expr::new(ExprKind::Name(name), span);
                    let args = self.parse_constructor_args()?;
                    return Ok(Pattern::Constructor { path, args });
                }
                Ok(Pattern::Capture(name))
            }
            Some(Token::LParen) => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RParen) {
                    items.push(self.parse_pattern()?);
                    if !self.match_token(&Token::Comma) {
                        break;
                    }
                }
                self.consume(&Token::RParen, "Expected ')' after tuple pattern")?;
                if items.len() == 1 {
                    // Parenthesized single pattern, not a tuple
                    Ok(items.remove(0))
                } else {
                    Ok(Pattern::Tuple(items))
                }
            }
            Some(Token::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_pattern()?);
                    if !self.match_token(&Token::Comma) {
                        break;
                    }
                }
                self.consume(&Token::RBracket, "Expected ']' after array pattern")?;
                Ok(Pattern::List(items))
            }
            _ => Err(self.error("Expected a pattern")),
        }
    }

    fn parse_constructor_args(&mut self) -> Result<Vec<Pattern>, ParseError> {
        self.consume(&Token::LParen, "Expected '(' in constructor pattern")?;
        let mut args = Vec::new();
        while !self.check(&Token::RParen) {
            args.push(self.parse_pattern()?);
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        self.consume(&Token::RParen, "Expected ')' in constructor pattern")?;
        Ok(args)
    }
}
