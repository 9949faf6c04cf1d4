// Expression parsing with Python operator precedence

use super::Parser;
use crate::ParseError;
use pyrite_ast::*;
use pyrite_lexer::Token;

impl<'a> Parser<'a> {
    pub(crate) fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::Yield) {
            let span = self.current_span();
            self.advance();
            let value = if self.check(&Token::Newline)
                || self.check(&Token::RParen)
                || self.is_at_end()
            {
                None
            } else {
                Some(Box::new(self.parse_expression()?))
            };
            return Ok(Expr::new(ExprKind::Yield(value), span));
        }
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_and()?;
        if !self.check(&Token::Or) {
            return Ok(first);
        }
        let span = first.span;
        let mut values = vec![first];
        while self.match_token(&Token::Or) {
            values.push(self.parse_and()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOpKind::Or,
                values,
            },
            span,
        ))
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_not()?;
        if !self.check(&Token::And) {
            return Ok(first);
        }
        let span = first.span;
        let mut values = vec![first];
        while self.match_token(&Token::And) {
            values.push(self.parse_not()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOpKind::And,
                values,
            },
            span,
        ))
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::Not) {
            let span = self.current_span();
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOpKind::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_comparison()
    }

    /// Comparisons support chaining: `a < b < c` keeps all operands so the
    /// lowering can evaluate the middle operand exactly once.
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_bitor()?;

        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => CmpOpKind::Eq,
                Some(Token::NotEq) => CmpOpKind::NotEq,
                Some(Token::Lt) => CmpOpKind::Lt,
                Some(Token::Le) => CmpOpKind::LtE,
                Some(Token::Gt) => CmpOpKind::Gt,
                Some(Token::Ge) => CmpOpKind::GtE,
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_bitor()?);
        }

        if ops.is_empty() {
            return Ok(left);
        }
        let span = left.span;
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
            span,
        ))
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitxor()?;
        while self.check(&Token::Pipe) {
            self.advance();
            let right = self.parse_bitxor()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op: BinOpKind::BitOr,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitand()?;
        while self.check(&Token::Caret) {
            self.advance();
            let right = self.parse_bitand()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op: BinOpKind::BitXor,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_shift()?;
        while self.check(&Token::Amp) {
            self.advance();
            let right = self.parse_shift()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op: BinOpKind::BitAnd,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Shl) => BinOpKind::Shl,
                Some(Token::Shr) => BinOpKind::Shr,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOpKind::Add,
                Some(Token::Minus) => BinOpKind::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOpKind::Mul,
                Some(Token::Slash) => BinOpKind::Div,
                Some(Token::DoubleSlash) => BinOpKind::FloorDiv,
                Some(Token::Percent) => BinOpKind::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = left.span;
            left = Expr::new(
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Minus) => Some(UnaryOpKind::Neg),
            Some(Token::Plus) => Some(UnaryOpKind::Pos),
            Some(Token::Tilde) => Some(UnaryOpKind::BitNot),
            _ => None,
        };
        if let Some(op) = op {
            let span = self.current_span();
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary_chain()?;
        if self.match_token(&Token::DoubleStar) {
            // Right-associative; exponent may itself be unary (2 ** -1)
            let exponent = self.parse_unary()?;
            let span = base.span;
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(base),
                    op: BinOpKind::Pow,
                    right: Box::new(exponent),
                },
                span,
            ));
        }
        Ok(base)
    }

    /// An atom followed by any chain of calls, attribute accesses, and
    /// subscripts. Also used for assignment and for-loop targets.
    pub(crate) fn parse_primary_chain(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Some(Token::LParen) => {
                    let span = expr.span;
                    let (args, keywords) = self.parse_call_arguments()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        span,
                    );
                }
                Some(Token::Dot) => {
                    self.advance();
                    let attr = self.consume_ident("Expected attribute name after '.'")?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        span,
                    );
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_subscript_index()?;
                    self.consume(&Token::RBracket, "Expected ']' after subscript")?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Arguments of a call: positional, starred, and keyword forms.
    pub(crate) fn parse_call_arguments(
        &mut self,
    ) -> Result<(Vec<Expr>, Vec<Keyword>), ParseError> {
        self.consume(&Token::LParen, "Expected '('")?;
        let mut args = Vec::new();
        let mut keywords = Vec::new();

        while !self.check(&Token::RParen) {
            if self.check(&Token::Star) {
                let span = self.current_span();
                self.advance();
                let value = self.parse_expression()?;
                args.push(Expr::new(ExprKind::Starred(Box::new(value)), span));
            } else if matches!(self.peek(), Some(Token::Ident(_)))
                && self.peek_ahead(1) == Some(&Token::Eq)
            {
                let name = self.consume_ident("Expected keyword name")?;
                self.consume(&Token::Eq, "Expected '=' in keyword argument")?;
                let value = self.parse_expression()?;
                keywords.push(Keyword { name, value });
            } else {
                args.push(self.parse_expression()?);
            }
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        self.consume(&Token::RParen, "Expected ')' after arguments")?;
        Ok((args, keywords))
    }

    /// Subscript contents: comma-separated items, each either an
    /// expression or a `lower: upper` slice (annotation field syntax).
    fn parse_subscript_index(&mut self) -> Result<Expr, ParseError> {
        let span = self.current_span();
        let mut items = vec![self.parse_subscript_item()?];
        while self.match_token(&Token::Comma) {
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_subscript_item()?);
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(Expr::new(ExprKind::Tuple(items), span))
        }
    }

    fn parse_subscript_item(&mut self) -> Result<Expr, ParseError> {
        let span = self.current_span();
        let lower = self.parse_expression()?;
        if self.match_token(&Token::Colon) {
            let upper = self.parse_expression()?;
            Ok(Expr::new(
                ExprKind::Slice {
                    lower: Some(Box::new(lower)),
                    upper: Some(Box::new(upper)),
                },
                span,
            ))
        } else {
            Ok(lower)
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, ParseError> {
        let span = self.current_span();
        match self.peek().cloned() {
            Some(Token::Int(v)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Int(v), span))
            }
            Some(Token::Float(v)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Float(v), span))
            }
            Some(Token::Str(s)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(s), span))
            }
            Some(Token::True) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(true), span))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Expr::new(ExprKind::Bool(false), span))
            }
            Some(Token::NoneKw) => {
                self.advance();
                Ok(Expr::new(ExprKind::NoneLit, span))
            }
            Some(Token::Ident(name)) => {
                self.advance();
                Ok(Expr::new(ExprKind::Name(name), span))
            }
            Some(Token::LParen) => {
                self.advance();
                if self.match_token(&Token::RParen) {
                    return Ok(Expr::new(ExprKind::Tuple(vec![]), span));
                }
                let first = self.parse_expression()?;
                if self.match_token(&Token::Comma) {
                    let mut items = vec![first];
                    while !self.check(&Token::RParen) {
                        items.push(self.parse_expression()?);
                        if !self.match_token(&Token::Comma) {
                            break;
                        }
                    }
                    self.consume(&Token::RParen, "Expected ')' after tuple")?;
                    Ok(Expr::new(ExprKind::Tuple(items), span))
                } else {
                    self.consume(&Token::RParen, "Expected ')' after expression")?;
                    Ok(first)
                }
            }
            Some(Token::LBracket) => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.match_token(&Token::Comma) {
                        break;
                    }
                }
                self.consume(&Token::RBracket, "Expected ']' after list")?;
                Ok(Expr::new(ExprKind::List(items), span))
            }
            _ => Err(self.error("Expected an expression")),
        }
    }
}
