// Definition parsing: decorators, functions, aggregate classes

use super::Parser;
use crate::ParseError;
use pyrite_ast::*;
use pyrite_lexer::Token;

impl<'a> Parser<'a> {
    /// A possibly-decorated `def` or `class`.
    pub(crate) fn parse_definition(&mut self) -> Result<Stmt, ParseError> {
        let mut decorators = Vec::new();
        while self.check(&Token::At) {
            decorators.push(self.parse_decorator()?);
            self.skip_newlines();
        }

        match self.peek() {
            Some(Token::Def) => self.parse_func_def(decorators),
            Some(Token::Class) => self.parse_class_def(decorators),
            _ => Err(self.error("Expected 'def' or 'class' after decorators")),
        }
    }

    fn parse_decorator(&mut self) -> Result<Decorator, ParseError> {
        let span = self.current_span();
        self.consume(&Token::At, "Expected '@'")?;
        let name = self.consume_ident("Expected decorator name after '@'")?;

        let (args, keywords) = if self.check(&Token::LParen) {
            self.parse_call_arguments()?
        } else {
            (vec![], vec![])
        };

        if self.check(&Token::Newline) {
            self.advance();
        }

        Ok(Decorator {
            name,
            args,
            keywords,
            span,
        })
    }

    fn parse_func_def(&mut self, decorators: Vec<Decorator>) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::Def, "Expected 'def'")?;
        let name = self.consume_ident("Expected function name")?;
        self.consume(&Token::LParen, "Expected '(' after function name")?;

        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let param_span = self.current_span();
            let param_name = self.consume_ident("Expected parameter name")?;
            let annotation = if self.match_token(&Token::Colon) {
                Some(self.parse_expression()?)
            } else {
                None
            };
            params.push(Param {
                name: param_name,
                annotation,
                span: param_span,
            });
            if !self.match_token(&Token::Comma) {
                break;
            }
        }
        self.consume(&Token::RParen, "Expected ')' after parameters")?;

        let returns = if self.match_token(&Token::Arrow) {
            Some(self.parse_expression()?)
        } else {
            None
        };

        let body = self.parse_suite()?;

        Ok(Stmt {
            kind: StmtKind::FuncDef(FuncDef {
                name,
                params,
                returns,
                body,
                decorators,
                span,
            }),
            span,
        })
    }

    fn parse_class_def(&mut self, decorators: Vec<Decorator>) -> Result<Stmt, ParseError> {
        let span = self.current_span();
        self.consume(&Token::Class, "Expected 'class'")?;
        let name = self.consume_ident("Expected class name")?;
        // No base classes in the compiled dialect
        if self.match_token(&Token::LParen) {
            self.consume(&Token::RParen, "Expected ')' in class header")?;
        }
        self.consume(&Token::Colon, "Expected ':' after class header")?;
        self.consume(&Token::Newline, "Expected newline after class header")?;
        self.consume(&Token::Indent, "Expected indented class body")?;

        let mut fields = Vec::new();
        self.skip_newlines();
        while !self.check(&Token::Dedent) && !self.is_at_end() {
            if self.match_token(&Token::Pass) {
                self.skip_newlines();
                continue;
            }
            let field_span = self.current_span();
            let field_name = self.consume_ident("Expected field name in class body")?;
            self.consume(&Token::Colon, "Expected ':' after field name")?;
            let annotation = self.parse_expression()?;
            if self.check(&Token::Newline) {
                self.advance();
            }
            fields.push(FieldDecl {
                name: field_name,
                annotation,
                span: field_span,
            });
            self.skip_newlines();
        }
        self.consume(&Token::Dedent, "Expected dedent to close class body")?;

        Ok(Stmt {
            kind: StmtKind::ClassDef(ClassDef {
                name,
                fields,
                decorators,
                span,
            }),
            span,
        })
    }
}
