// Statement parsing: simple and compound statements

use super::Parser;
use crate::ParseError;
use pyrite_ast::*;
use pyrite_lexer::Token;

impl<'a> Parser<'a> {
    pub(crate) fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Some(Token::At) | Some(Token::Def) | Some(Token::Class) => self.parse_definition(),
            Some(Token::If) => self.parse_if(),
            Some(Token::While) => self.parse_while(),
            Some(Token::For) => self.parse_for(),
            Some(Token::Match) => self.parse_match(),
            Some(Token::With) => self.parse_with(),
            _ => {
                let stmt = self.parse_simple_statement()?;
                if self.check(&Token::Newline) {
                    self.advance();
                }
                Ok(stmt)
            }
        }
    }

    pub(crate) fn parse_simple_statement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();

        match self.peek() {
            Some(Token::Return) => {
                self.advance();
                let value = if self.check(&Token::Newline) || self.is_at_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(Stmt {
                    kind: StmtKind::Return(value),
                    span,
                })
            }
            Some(Token::Break) => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Break,
                    span,
                })
            }
            Some(Token::Continue) => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Continue,
                    span,
                })
            }
            Some(Token::Pass) => {
                self.advance();
                Ok(Stmt {
                    kind: StmtKind::Pass,
                    span,
                })
            }
            Some(Token::From) => self.parse_import_from(),
            Some(Token::Import) => self.parse_import(),
            _ => self.parse_expression_statement(),
        }
    }

    /// Expression statement, assignment, annotated declaration, or
    /// augmented assignment, all starting with an expression.
    fn parse_expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        let target = self.parse_expression()?;

        if self.match_token(&Token::Colon) {
            // x: T  or  x: T = value
            let annotation = self.parse_expression()?;
            let value = if self.match_token(&Token::Eq) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            return Ok(Stmt {
                kind: StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                },
                span,
            });
        }

        if self.match_token(&Token::Eq) {
            let value = self.parse_expression()?;
            return Ok(Stmt {
                kind: StmtKind::Assign { target, value },
                span,
            });
        }

        let aug_op = match self.peek() {
            Some(Token::PlusEq) => Some(BinOpKind::Add),
            Some(Token::MinusEq) => Some(BinOpKind::Sub),
            Some(Token::StarEq) => Some(BinOpKind::Mul),
            Some(Token::SlashEq) => Some(BinOpKind::Div),
            Some(Token::PercentEq) => Some(BinOpKind::Mod),
            Some(Token::AmpEq) => Some(BinOpKind::BitAnd),
            Some(Token::PipeEq) => Some(BinOpKind::BitOr),
            Some(Token::CaretEq) => Some(BinOpKind::BitXor),
            _ => None,
        };
        if let Some(op) = aug_op {
            self.advance();
            let value = self.parse_expression()?;
            return Ok(Stmt {
                kind: StmtKind::AugAssign { target, op, value },
                span,
            });
        }

        Ok(Stmt {
            kind: StmtKind::Expr(target),
            span,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::If, "Expected 'if'")?;
        let test = self.parse_expression()?;
        let body = self.parse_suite()?;
        let orelse = self.parse_trailing_else()?;

        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            span,
        })
    }

    /// `elif` chains become nested if statements in the `orelse` arm.
    fn parse_trailing_else(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.check(&Token::Elif) {
            let span = self.current_span();
            self.advance();
            let test = self.parse_expression()?;
            let body = self.parse_suite()?;
            let orelse = self.parse_trailing_else()?;
            Ok(vec![Stmt {
                kind: StmtKind::If { test, body, orelse },
                span,
            }])
        } else if self.check(&Token::Else) {
            self.advance();
            self.parse_suite()
        } else {
            Ok(vec![])
        }
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::While, "Expected 'while'")?;
        let test = self.parse_expression()?;
        let body = self.parse_suite()?;
        self.skip_newlines();
        let orelse = if self.check(&Token::Else) {
            self.advance();
            self.parse_suite()?
        } else {
            vec![]
        };
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            span,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::For, "Expected 'for'")?;
        let target = self.parse_primary_chain()?;
        self.consume(&Token::In, "Expected 'in' in for statement")?;
        let iter = self.parse_expression()?;
        let body = self.parse_suite()?;
        self.skip_newlines();
        let orelse = if self.check(&Token::Else) {
            self.advance();
            self.parse_suite()?
        } else {
            vec![]
        };
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            span,
        })
    }

    fn parse_match(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::Match, "Expected 'match'")?;
        let subject = self.parse_expression()?;
        self.consume(&Token::Colon, "Expected ':' after match subject")?;
        self.consume(&Token::Newline, "Expected newline after match header")?;
        self.consume(&Token::Indent, "Expected indented case block")?;

        let mut cases = Vec::new();
        self.skip_newlines();
        while self.check(&Token::Case) {
            let case_span = self.current_span();
            self.advance();
            let pattern = self.parse_pattern()?;
            let guard = if self.match_token(&Token::If) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            let body = self.parse_suite()?;
            self.skip_newlines();
            cases.push(MatchCase {
                pattern,
                guard,
                body,
                span: case_span,
            });
        }
        self.consume(&Token::Dedent, "Expected dedent to close match block")?;

        if cases.is_empty() {
            return Err(self.error("Expected at least one 'case' clause in match"));
        }

        Ok(Stmt {
            kind: StmtKind::Match { subject, cases },
            span,
        })
    }

    fn parse_with(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::With, "Expected 'with'")?;
        let mut items = Vec::new();
        loop {
            let context = self.parse_expression()?;
            let alias = if self.match_token(&Token::As) {
                Some(self.consume_ident("Expected alias name after 'as'")?)
            } else {
                None
            };
            items.push(WithItem { context, alias });
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        let body = self.parse_suite()?;
        Ok(Stmt {
            kind: StmtKind::With { items, body },
            span,
        })
    }

    fn parse_import_from(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::From, "Expected 'from'")?;
        let mut module = self.consume_ident("Expected module name after 'from'")?;
        while self.match_token(&Token::Dot) {
            let part = self.consume_ident("Expected name after '.'")?;
            module.push('.');
            module.push_str(&part);
        }
        self.consume(&Token::Import, "Expected 'import' in from-import")?;
        let mut names = Vec::new();
        loop {
            let name = self.consume_ident("Expected imported name")?;
            let alias = if self.match_token(&Token::As) {
                Some(self.consume_ident("Expected alias after 'as'")?)
            } else {
                None
            };
            names.push((name, alias));
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        Ok(Stmt {
            kind: StmtKind::ImportFrom { module, names },
            span,
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::Import, "Expected 'import'")?;
        let mut module = self.consume_ident("Expected module name")?;
        while self.match_token(&Token::Dot) {
            let part = self.consume_ident("Expected name after '.'")?;
            module.push('.');
            module.push_str(&part);
        }
        let alias = if self.match_token(&Token::As) {
            Some(self.consume_ident("Expected alias after 'as'")?)
        } else {
            None
        };
        Ok(Stmt {
            kind: StmtKind::Import { module, alias },
            span,
        })
    }
}
