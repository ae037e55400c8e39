//! Recursive-descent parser with precedence climbing.
//!
//! Three parse styles gate which statements are legal: `Library` (top level
//! of a module), `Function` (bodies and REPL-style fragments), and class
//! bodies, which are handled inline by the class parser. `for-in` loops are
//! lowered here into an equivalent `while` block over a synthetic counter.

use std::rc::Rc;

use thiserror::Error;

use crate::ast::{
    BinaryOp, ClassDecl, Expr, FuncDecl, FuncKind, Literal, LiteralPool, NamedArg, NodeIdGen,
    Stmt, TypeExpr, UnaryOp, VarDecl,
};
use crate::lexicon::{
    CONSTRUCTOR_NAME, GETTER_PREFIX, ITERATION_VAR_PREFIX, SETTER_PREFIX, TYPE_FUNCTION,
};
use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Expected {expected}, got {found} at line {line}, column {column}")]
    ExpectedToken {
        expected: String,
        found: String,
        line: usize,
        column: usize,
    },
    #[error("Unexpected {found} at line {line}, column {column}")]
    UnexpectedToken {
        found: String,
        line: usize,
        column: usize,
    },
    #[error("Invalid assignment target at line {line}, column {column}")]
    InvalidAssignmentTarget { line: usize, column: usize },
    #[error("Getter '{name}' cannot declare parameters at line {line}, column {column}")]
    GetterWithParameters {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("Setter '{name}' must take exactly one parameter at line {line}, column {column}")]
    SetterArity {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("{statement} is not allowed here at line {line}, column {column}")]
    StatementNotAllowed {
        statement: String,
        line: usize,
        column: usize,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Which statement set is legal at the top level of the parsed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseStyle {
    #[default]
    Library,
    Function,
}

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    current: Token,
    pool: &'a mut LiteralPool,
    ids: &'a mut NodeIdGen,
    iteration_count: usize,
}

impl<'a> Parser<'a> {
    pub fn new(mut tokens: Vec<Token>, pool: &'a mut LiteralPool, ids: &'a mut NodeIdGen) -> Self {
        if tokens.is_empty() {
            tokens.push(Token::new(TokenKind::Eof, Span::default()));
        }
        let current = tokens[0].clone();
        Self {
            tokens,
            pos: 0,
            current,
            pool,
            ids,
            iteration_count: 0,
        }
    }

    pub fn parse_module(mut self, style: ParseStyle) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !matches!(self.current.kind, TokenKind::Eof) {
            statements.push(self.parse_statement(style)?);
        }
        Ok(statements)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self, style: ParseStyle) -> ParseResult<Stmt> {
        match (&self.current.kind, style) {
            (TokenKind::Import, _) => self.parse_import(),
            (TokenKind::Var | TokenKind::Let | TokenKind::Def, _) => {
                let decl = self.parse_var_decl(false)?;
                Ok(Stmt::Var(Rc::new(decl)))
            }
            (TokenKind::External, _) => self.parse_external_decl(style),
            (TokenKind::Class, ParseStyle::Library) => self.parse_class_decl(false),
            (TokenKind::Class, ParseStyle::Function) => Err(ParseError::StatementNotAllowed {
                statement: "A class declaration".to_string(),
                line: self.current.span.line,
                column: self.current.span.column,
            }),
            (TokenKind::Fun, _) => self.parse_func_decl(FuncKind::Function, false, false, None),
            (TokenKind::Proc, _) => self.parse_func_decl(FuncKind::Procedure, false, false, None),
            (TokenKind::If, ParseStyle::Function) => self.parse_if(),
            (TokenKind::While, ParseStyle::Function) => self.parse_while(),
            (TokenKind::For, ParseStyle::Function) => self.parse_for_in(),
            (TokenKind::Return, ParseStyle::Function) => self.parse_return(),
            (TokenKind::Break, ParseStyle::Function) => {
                let span = self.current.span;
                self.advance();
                self.consume_semicolon();
                Ok(Stmt::Break { span })
            }
            (TokenKind::Continue, ParseStyle::Function) => {
                let span = self.current.span;
                self.advance();
                self.consume_semicolon();
                Ok(Stmt::Continue { span })
            }
            (TokenKind::LBrace, ParseStyle::Function) => self.parse_block(),
            (_, ParseStyle::Function) => {
                let expr = self.parse_expression()?;
                self.consume_semicolon();
                Ok(Stmt::Expr(expr))
            }
            (_, ParseStyle::Library) => Err(ParseError::StatementNotAllowed {
                statement: "An expression statement".to_string(),
                line: self.current.span.line,
                column: self.current.span.column,
            }),
        }
    }

    fn parse_import(&mut self) -> ParseResult<Stmt> {
        let span = self.expect(TokenKind::Import)?;
        let path = self.expect_string()?;
        let alias = if self.consume_if(TokenKind::As) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.consume_semicolon();
        Ok(Stmt::Import { path, alias, span })
    }

    fn parse_external_decl(&mut self, style: ParseStyle) -> ParseResult<Stmt> {
        self.expect(TokenKind::External)?;
        match self.current.kind {
            TokenKind::Class if style == ParseStyle::Library => self.parse_class_decl(true),
            TokenKind::Fun => self.parse_func_decl(FuncKind::Function, false, true, None),
            TokenKind::Proc => self.parse_func_decl(FuncKind::Procedure, false, true, None),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_var_decl(&mut self, is_static: bool) -> ParseResult<VarDecl> {
        let keyword = self.current.kind.clone();
        let span = self.current.span;
        self.advance();

        let name = self.expect_identifier()?;
        let declared_type = if self.consume_if(TokenKind::Colon) {
            self.parse_type()?
        } else {
            TypeExpr::any()
        };
        let initializer = if self.consume_if(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.consume_semicolon();

        let (is_mutable, type_inferred) = match keyword {
            TokenKind::Var => (true, false),
            TokenKind::Def => (true, true),
            TokenKind::Let => (false, true),
            _ => unreachable!("caller checked declaration keyword"),
        };
        Ok(VarDecl {
            name,
            declared_type,
            initializer,
            is_static,
            is_mutable,
            type_inferred,
            is_optional: false,
            is_named: false,
            span,
        })
    }

    fn parse_func_decl(
        &mut self,
        kind: FuncKind,
        is_static: bool,
        is_extern: bool,
        class_name: Option<&str>,
    ) -> ParseResult<Stmt> {
        let span = self.current.span;
        self.advance(); // fun | proc
        let name = self.expect_identifier()?;

        let (params, arity) = if matches!(self.current.kind, TokenKind::LParen) {
            self.parse_params()?
        } else {
            (Vec::new(), 0)
        };

        let return_type = if kind == FuncKind::Function && self.consume_if(TokenKind::Colon) {
            self.parse_type()?
        } else {
            TypeExpr::void()
        };

        let body = if is_extern {
            self.consume_semicolon();
            None
        } else {
            Some(self.parse_body_statements()?)
        };

        let kind = match (kind, class_name) {
            (FuncKind::Function, Some(_)) => FuncKind::Method,
            (other, _) => other,
        };
        Ok(Stmt::Func(Rc::new(FuncDecl {
            kind,
            name,
            return_type,
            params,
            type_params: Vec::new(),
            arity,
            body,
            is_static,
            is_extern,
            class_name: class_name.map(str::to_string),
            span,
        })))
    }

    /// Parameter list: positional, then `[optional]`, then `{named}`, with a
    /// trailing `...` marking variadic arity.
    fn parse_params(&mut self) -> ParseResult<(Vec<Rc<VarDecl>>, i32)> {
        self.expect(TokenKind::LParen)?;
        let mut params: Vec<Rc<VarDecl>> = Vec::new();
        let mut variadic = false;

        while !matches!(self.current.kind, TokenKind::RParen) {
            match self.current.kind {
                TokenKind::Ellipsis => {
                    self.advance();
                    variadic = true;
                    break;
                }
                TokenKind::LBracket => {
                    self.advance();
                    while !matches!(self.current.kind, TokenKind::RBracket) {
                        let param = self.parse_param(true, false)?;
                        params.push(Rc::new(param));
                        if !self.consume_if(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RBracket)?;
                }
                TokenKind::LBrace => {
                    self.advance();
                    while !matches!(self.current.kind, TokenKind::RBrace) {
                        let param = self.parse_param(false, true)?;
                        params.push(Rc::new(param));
                        if !self.consume_if(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RBrace)?;
                }
                _ => {
                    let param = self.parse_param(false, false)?;
                    params.push(Rc::new(param));
                }
            }
            if !self.consume_if(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        let arity = if variadic {
            -1
        } else {
            params
                .iter()
                .filter(|p| !p.is_optional && !p.is_named && p.initializer.is_none())
                .count() as i32
        };
        Ok((params, arity))
    }

    fn parse_param(&mut self, is_optional: bool, is_named: bool) -> ParseResult<VarDecl> {
        let span = self.current.span;
        let name = self.expect_identifier()?;
        let declared_type = if self.consume_if(TokenKind::Colon) {
            self.parse_type()?
        } else {
            TypeExpr::any()
        };
        let initializer = if self.consume_if(TokenKind::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(VarDecl {
            name,
            declared_type,
            initializer,
            is_static: false,
            is_mutable: true,
            type_inferred: false,
            is_optional,
            is_named,
            span,
        })
    }

    fn parse_class_decl(&mut self, is_extern: bool) -> ParseResult<Stmt> {
        let span = self.expect(TokenKind::Class)?;
        let name = self.expect_identifier()?;

        let mut type_params = Vec::new();
        if self.consume_if(TokenKind::Less) {
            while !matches!(self.current.kind, TokenKind::Greater) {
                type_params.push(self.expect_identifier()?);
                if !self.consume_if(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Greater)?;
        }

        let superclass = if self.consume_if(TokenKind::Extends) {
            Some(self.expect_identifier()?)
        } else {
            None
        };

        self.expect(TokenKind::LBrace)?;
        let mut variables = Vec::new();
        let mut methods = Vec::new();
        while !matches!(self.current.kind, TokenKind::RBrace | TokenKind::Eof) {
            self.parse_class_member(&name, is_extern, &mut variables, &mut methods)?;
        }
        self.expect(TokenKind::RBrace)?;

        Ok(Stmt::Class(Rc::new(ClassDecl {
            name,
            superclass,
            type_params,
            is_extern,
            variables,
            methods,
            span,
        })))
    }

    fn parse_class_member(
        &mut self,
        class_name: &str,
        class_is_extern: bool,
        variables: &mut Vec<Rc<VarDecl>>,
        methods: &mut Vec<Rc<FuncDecl>>,
    ) -> ParseResult<()> {
        let mut is_extern = class_is_extern;
        let mut is_static = false;
        loop {
            match self.current.kind {
                TokenKind::External => {
                    self.advance();
                    is_extern = true;
                }
                TokenKind::Static => {
                    self.advance();
                    is_static = true;
                }
                _ => break,
            }
        }

        match self.current.kind {
            TokenKind::Var | TokenKind::Let | TokenKind::Def => {
                let decl = self.parse_var_decl(is_static)?;
                variables.push(Rc::new(decl));
            }
            TokenKind::Fun => {
                let stmt =
                    self.parse_func_decl(FuncKind::Function, is_static, is_extern, Some(class_name))?;
                methods.push(expect_func_stmt(stmt));
            }
            TokenKind::Proc => {
                let stmt =
                    self.parse_func_decl(FuncKind::Procedure, is_static, is_extern, Some(class_name))?;
                methods.push(expect_func_stmt(stmt));
            }
            TokenKind::Construct => {
                let span = self.current.span;
                self.advance();
                let (params, arity) = if matches!(self.current.kind, TokenKind::LParen) {
                    self.parse_params()?
                } else {
                    (Vec::new(), 0)
                };
                let body = if is_extern {
                    self.consume_semicolon();
                    None
                } else {
                    Some(self.parse_body_statements()?)
                };
                methods.push(Rc::new(FuncDecl {
                    kind: FuncKind::Constructor,
                    name: CONSTRUCTOR_NAME.to_string(),
                    return_type: TypeExpr::void(),
                    params,
                    type_params: Vec::new(),
                    arity,
                    body,
                    is_static: false,
                    is_extern,
                    class_name: Some(class_name.to_string()),
                    span,
                }));
            }
            TokenKind::Get => {
                let span = self.current.span;
                self.advance();
                let name = self.expect_identifier()?;
                if matches!(self.current.kind, TokenKind::LParen) {
                    let (params, _) = self.parse_params()?;
                    if !params.is_empty() {
                        return Err(ParseError::GetterWithParameters {
                            name,
                            line: span.line,
                            column: span.column,
                        });
                    }
                }
                let return_type = if self.consume_if(TokenKind::Colon) {
                    self.parse_type()?
                } else {
                    TypeExpr::any()
                };
                let body = if is_extern {
                    self.consume_semicolon();
                    None
                } else {
                    Some(self.parse_body_statements()?)
                };
                methods.push(Rc::new(FuncDecl {
                    kind: FuncKind::Getter,
                    name: format!("{GETTER_PREFIX}{name}"),
                    return_type,
                    params: Vec::new(),
                    type_params: Vec::new(),
                    arity: 0,
                    body,
                    is_static,
                    is_extern,
                    class_name: Some(class_name.to_string()),
                    span,
                }));
            }
            TokenKind::Set => {
                let span = self.current.span;
                self.advance();
                let name = self.expect_identifier()?;
                let (params, _) = if matches!(self.current.kind, TokenKind::LParen) {
                    self.parse_params()?
                } else {
                    (Vec::new(), 0)
                };
                if params.len() != 1 {
                    return Err(ParseError::SetterArity {
                        name,
                        line: span.line,
                        column: span.column,
                    });
                }
                let body = if is_extern {
                    self.consume_semicolon();
                    None
                } else {
                    Some(self.parse_body_statements()?)
                };
                methods.push(Rc::new(FuncDecl {
                    kind: FuncKind::Setter,
                    name: format!("{SETTER_PREFIX}{name}"),
                    return_type: TypeExpr::void(),
                    params,
                    type_params: Vec::new(),
                    arity: 1,
                    body,
                    is_static,
                    is_extern,
                    class_name: Some(class_name.to_string()),
                    span,
                }));
            }
            _ => return Err(self.unexpected()),
        }
        Ok(())
    }

    fn parse_body_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !matches!(self.current.kind, TokenKind::RBrace | TokenKind::Eof) {
            statements.push(self.parse_statement(ParseStyle::Function)?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(statements)
    }

    fn parse_block(&mut self) -> ParseResult<Stmt> {
        let span = self.current.span;
        let statements = self.parse_body_statements()?;
        Ok(Stmt::Block { statements, span })
    }

    fn parse_if(&mut self) -> ParseResult<Stmt> {
        let span = self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = Box::new(self.parse_statement(ParseStyle::Function)?);
        let else_branch = if self.consume_if(TokenKind::Else) {
            Some(Box::new(self.parse_statement(ParseStyle::Function)?))
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span,
        })
    }

    fn parse_while(&mut self) -> ParseResult<Stmt> {
        let span = self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let body = Box::new(self.parse_statement(ParseStyle::Function)?);
        Ok(Stmt::While {
            condition,
            body,
            span,
        })
    }

    /// Lowers `for (var x in xs) body` into
    /// `{ var __iN = 0  var x  while (__iN < xs.length) { x = xs[__iN]  __iN = __iN + 1  body } }`.
    /// The iteration target is cloned with fresh node ids between the length
    /// site and the subscript site so the two resolve independently.
    fn parse_for_in(&mut self) -> ParseResult<Stmt> {
        let span = self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;
        if !matches!(
            self.current.kind,
            TokenKind::Var | TokenKind::Let | TokenKind::Def
        ) {
            return Err(self.unexpected());
        }
        let mut loop_var = self.parse_loop_var()?;
        // The loop variable is rebound on every iteration.
        loop_var.is_mutable = true;
        let loop_name = loop_var.name.clone();
        self.expect(TokenKind::In)?;
        let target = self.parse_expression()?;
        self.expect(TokenKind::RParen)?;
        let body = self.parse_statement(ParseStyle::Function)?;

        let index_name = format!("{ITERATION_VAR_PREFIX}{}", self.iteration_count);
        self.iteration_count += 1;

        let zero = self.pool.intern(Literal::Number(0.0));
        let one = self.pool.intern(Literal::Number(1.0));
        let target_for_subscript = target.clone_with_fresh_ids(self.ids);

        let index_decl = VarDecl {
            name: index_name.clone(),
            declared_type: TypeExpr::any(),
            initializer: Some(Expr::Const { index: zero, span }),
            is_static: false,
            is_mutable: true,
            type_inferred: true,
            is_optional: false,
            is_named: false,
            span,
        };
        let condition = Expr::Binary {
            left: Box::new(Expr::Symbol {
                id: self.ids.issue(),
                name: index_name.clone(),
                span,
            }),
            op: BinaryOp::Less,
            right: Box::new(Expr::MemberGet {
                collection: Box::new(target),
                key: "length".to_string(),
                span,
            }),
            span,
        };
        let rebind_loop_var = Expr::Assign {
            id: self.ids.issue(),
            name: loop_name,
            value: Box::new(Expr::SubGet {
                collection: Box::new(target_for_subscript),
                key: Box::new(Expr::Symbol {
                    id: self.ids.issue(),
                    name: index_name.clone(),
                    span,
                }),
                span,
            }),
            span,
        };
        let advance_index = Expr::Assign {
            id: self.ids.issue(),
            name: index_name.clone(),
            value: Box::new(Expr::Binary {
                left: Box::new(Expr::Symbol {
                    id: self.ids.issue(),
                    name: index_name,
                    span,
                }),
                op: BinaryOp::Add,
                right: Box::new(Expr::Const { index: one, span }),
                span,
            }),
            span,
        };

        Ok(Stmt::Block {
            statements: vec![
                Stmt::Var(Rc::new(index_decl)),
                Stmt::Var(Rc::new(loop_var)),
                Stmt::While {
                    condition,
                    body: Box::new(Stmt::Block {
                        statements: vec![
                            Stmt::Expr(rebind_loop_var),
                            Stmt::Expr(advance_index),
                            body,
                        ],
                        span,
                    }),
                    span,
                },
            ],
            span,
        })
    }

    fn parse_loop_var(&mut self) -> ParseResult<VarDecl> {
        let keyword = self.current.kind.clone();
        let span = self.current.span;
        self.advance();
        let name = self.expect_identifier()?;
        let declared_type = if self.consume_if(TokenKind::Colon) {
            self.parse_type()?
        } else {
            TypeExpr::any()
        };
        let (is_mutable, type_inferred) = match keyword {
            TokenKind::Var => (true, false),
            TokenKind::Def => (true, true),
            TokenKind::Let => (false, true),
            _ => unreachable!("caller checked declaration keyword"),
        };
        Ok(VarDecl {
            name,
            declared_type,
            initializer: None,
            is_static: false,
            is_mutable,
            type_inferred,
            is_optional: false,
            is_named: false,
            span,
        })
    }

    fn parse_return(&mut self) -> ParseResult<Stmt> {
        let span = self.expect(TokenKind::Return)?;
        let expr = if matches!(
            self.current.kind,
            TokenKind::RBrace | TokenKind::Semicolon | TokenKind::Eof
        ) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_semicolon();
        Ok(Stmt::Return { expr, span })
    }

    // ------------------------------------------------------------------
    // Expressions, tightest to loosest binding
    // ------------------------------------------------------------------

    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.parse_assignment()
    }

    /// Assignment is right-associative; the left side must be a symbol,
    /// member access, or subscript, and the latter two are rewritten into
    /// their set forms.
    fn parse_assignment(&mut self) -> ParseResult<Expr> {
        let target = self.parse_logical_or()?;
        if !matches!(self.current.kind, TokenKind::Assign) {
            return Ok(target);
        }
        let span = self.current.span;
        self.advance();
        let value = Box::new(self.parse_assignment()?);
        match target {
            Expr::Symbol { id, name, span } => Ok(Expr::Assign {
                id,
                name,
                value,
                span,
            }),
            Expr::MemberGet {
                collection,
                key,
                span,
            } => Ok(Expr::MemberSet {
                collection,
                key,
                value,
                span,
            }),
            Expr::SubGet {
                collection,
                key,
                span,
            } => Ok(Expr::SubSet {
                collection,
                key,
                value,
                span,
            }),
            _ => Err(ParseError::InvalidAssignmentTarget {
                line: span.line,
                column: span.column,
            }),
        }
    }

    fn parse_logical_or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_logical_and()?;
        while matches!(self.current.kind, TokenKind::OrOr) {
            let span = self.current.span;
            self.advance();
            let right = self.parse_logical_and()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::Or,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_logical_and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_equality()?;
        while matches!(self.current.kind, TokenKind::AndAnd) {
            let span = self.current.span;
            self.advance();
            let right = self.parse_equality()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op: BinaryOp::And,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_relational()?;
        loop {
            let op = match self.current.kind {
                TokenKind::EqualEqual => BinaryOp::Equal,
                TokenKind::NotEqual => BinaryOp::NotEqual,
                _ => break,
            };
            let span = self.current.span;
            self.advance();
            let right = self.parse_relational()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_relational(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                TokenKind::Is => BinaryOp::Is,
                _ => break,
            };
            let span = self.current.span;
            self.advance();
            let right = self.parse_additive()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                _ => break,
            };
            let span = self.current.span;
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Percent => BinaryOp::Modulo,
                _ => break,
            };
            let span = self.current.span;
            self.advance();
            let right = self.parse_unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.current.kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.parse_postfix(),
        };
        let span = self.current.span;
        self.advance();
        let operand = Box::new(self.parse_unary()?);
        Ok(Expr::Unary { op, operand, span })
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current.kind {
                TokenKind::Dot => {
                    let span = self.current.span;
                    self.advance();
                    let key = self.expect_identifier()?;
                    expr = Expr::MemberGet {
                        collection: Box::new(expr),
                        key,
                        span,
                    };
                }
                TokenKind::LBracket => {
                    let span = self.current.span;
                    self.advance();
                    let key = Box::new(self.parse_expression()?);
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::SubGet {
                        collection: Box::new(expr),
                        key,
                        span,
                    };
                }
                TokenKind::LParen => {
                    let span = self.current.span;
                    self.advance();
                    let (positional, named) = self.parse_call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        positional,
                        named,
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Arguments of the form `name: expr` are named; everything else is
    /// positional.
    fn parse_call_args(&mut self) -> ParseResult<(Vec<Expr>, Vec<NamedArg>)> {
        let mut positional = Vec::new();
        let mut named = Vec::new();
        while !matches!(self.current.kind, TokenKind::RParen) {
            if matches!(self.current.kind, TokenKind::Identifier(_))
                && matches!(self.peek_kind(), TokenKind::Colon)
            {
                let span = self.current.span;
                let name = self.expect_identifier()?;
                self.expect(TokenKind::Colon)?;
                let value = self.parse_expression()?;
                named.push(NamedArg { name, value, span });
            } else {
                positional.push(self.parse_expression()?);
            }
            if !self.consume_if(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok((positional, named))
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let span = self.current.span;
        match self.current.kind.clone() {
            TokenKind::Number(value) => {
                self.advance();
                let index = self.pool.intern(Literal::Number(value));
                Ok(Expr::Const { index, span })
            }
            TokenKind::Boolean(value) => {
                self.advance();
                let index = self.pool.intern(Literal::Boolean(value));
                Ok(Expr::Const { index, span })
            }
            TokenKind::Str(value) => {
                self.advance();
                let index = self.pool.intern(Literal::String(value));
                Ok(Expr::Const { index, span })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null { span })
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This {
                    id: self.ids.issue(),
                    span,
                })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Symbol {
                    id: self.ids.issue(),
                    name,
                    span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Group(Box::new(inner)))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !matches!(self.current.kind, TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.consume_if(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Expr::Vector { items, span })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !matches!(self.current.kind, TokenKind::RBrace) {
                    let key = self.parse_expression()?;
                    self.expect(TokenKind::Colon)?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if !self.consume_if(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Expr::Dict { entries, span })
            }
            _ => Err(self.unexpected()),
        }
    }

    /// `Name<T1, T2, ...>`; the keyword `fun` doubles as the function type.
    fn parse_type(&mut self) -> ParseResult<TypeExpr> {
        let name = match self.current.kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                name
            }
            TokenKind::Fun => {
                self.advance();
                TYPE_FUNCTION.to_string()
            }
            _ => return Err(self.expected("type name")),
        };
        let mut args = Vec::new();
        if self.consume_if(TokenKind::Less) {
            while !matches!(self.current.kind, TokenKind::Greater) {
                args.push(self.parse_type()?);
                if !self.consume_if(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::Greater)?;
        }
        Ok(TypeExpr { name, args })
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn advance(&mut self) -> Token {
        let next = self
            .tokens
            .get(self.pos + 1)
            .cloned()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, Span::default()));
        self.pos = self.pos.saturating_add(1);
        std::mem::replace(&mut self.current, next)
    }

    fn peek_kind(&self) -> TokenKind {
        self.tokens
            .get(self.pos + 1)
            .map(|token| token.kind.clone())
            .unwrap_or(TokenKind::Eof)
    }

    fn consume_if(&mut self, kind: TokenKind) -> bool {
        if self.current.kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_semicolon(&mut self) {
        while matches!(self.current.kind, TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind) -> ParseResult<Span> {
        if self.current.kind == kind {
            let span = self.current.span;
            self.advance();
            Ok(span)
        } else {
            Err(self.expected(&kind.describe()))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.expected("identifier"))
        }
    }

    fn expect_string(&mut self) -> ParseResult<String> {
        if let TokenKind::Str(value) = &self.current.kind {
            let value = value.clone();
            self.advance();
            Ok(value)
        } else {
            Err(self.expected("string literal"))
        }
    }

    fn expected(&self, expected: &str) -> ParseError {
        ParseError::ExpectedToken {
            expected: expected.to_string(),
            found: self.current.kind.describe(),
            line: self.current.span.line,
            column: self.current.span.column,
        }
    }

    fn unexpected(&self) -> ParseError {
        ParseError::UnexpectedToken {
            found: self.current.kind.describe(),
            line: self.current.span.line,
            column: self.current.span.column,
        }
    }
}

fn expect_func_stmt(stmt: Stmt) -> Rc<FuncDecl> {
    match stmt {
        Stmt::Func(decl) => decl,
        _ => unreachable!("parse_func_decl returns Stmt::Func"),
    }
}

pub fn parse_tokens(
    tokens: Vec<Token>,
    pool: &mut LiteralPool,
    ids: &mut NodeIdGen,
    style: ParseStyle,
) -> ParseResult<Vec<Stmt>> {
    Parser::new(tokens, pool, ids).parse_module(style)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use indoc::indoc;

    fn parse(source: &str, style: ParseStyle) -> ParseResult<(Vec<Stmt>, LiteralPool)> {
        let tokens = lexer::tokenize(source).expect("tokenize should succeed");
        let mut pool = LiteralPool::new();
        let mut ids = NodeIdGen::new();
        let statements = parse_tokens(tokens, &mut pool, &mut ids, style)?;
        Ok((statements, pool))
    }

    fn parse_function(source: &str) -> Vec<Stmt> {
        parse(source, ParseStyle::Function).expect("parse failed").0
    }

    #[test]
    fn parses_var_declaration_kinds() {
        let statements = parse_function("var a: num = 1  def b = 2  let c = 3");
        let decls: Vec<_> = statements
            .iter()
            .map(|stmt| match stmt {
                Stmt::Var(decl) => decl,
                other => panic!("expected var declaration, got {other:?}"),
            })
            .collect();
        assert_eq!(decls[0].declared_type.name, "num");
        assert!(decls[0].is_mutable && !decls[0].type_inferred);
        assert!(decls[1].is_mutable && decls[1].type_inferred);
        assert!(!decls[2].is_mutable && decls[2].type_inferred);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let statements = parse_function("1 + 2 * 3");
        let Stmt::Expr(Expr::Binary { op, right, .. }) = &statements[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.as_ref(),
            Expr::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn logical_or_is_loosest_before_assignment() {
        let statements = parse_function("a && b || c == d");
        let Stmt::Expr(Expr::Binary { op, .. }) = &statements[0] else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Or);
    }

    #[test]
    fn rewrites_member_and_subscript_assignments() {
        let statements = parse_function("a.b = 1  a[0] = 2");
        assert!(matches!(
            &statements[0],
            Stmt::Expr(Expr::MemberSet { key, .. }) if key == "b"
        ));
        assert!(matches!(&statements[1], Stmt::Expr(Expr::SubSet { .. })));
    }

    #[test]
    fn assignment_is_right_associative() {
        let statements = parse_function("a = b = 1");
        let Stmt::Expr(Expr::Assign { name, value, .. }) = &statements[0] else {
            panic!("expected assignment");
        };
        assert_eq!(name, "a");
        assert!(matches!(value.as_ref(), Expr::Assign { name, .. } if name == "b"));
    }

    #[test]
    fn errors_on_invalid_assignment_target() {
        let err = parse("1 = 2", ParseStyle::Function).expect_err("expected parse failure");
        assert!(matches!(err, ParseError::InvalidAssignmentTarget { .. }));
    }

    #[test]
    fn separates_positional_and_named_arguments() {
        let statements = parse_function("f(1, 2, label: 'x')");
        let Stmt::Expr(Expr::Call {
            positional, named, ..
        }) = &statements[0]
        else {
            panic!("expected call");
        };
        assert_eq!(positional.len(), 2);
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name, "label");
    }

    #[test]
    fn parses_parameter_groups_and_arity() {
        let (statements, _) = parse(
            "fun f(a, b: num, [c = 1], {d: num = 2}) { }",
            ParseStyle::Library,
        )
        .expect("parse failed");
        let Stmt::Func(decl) = &statements[0] else {
            panic!("expected function declaration");
        };
        assert_eq!(decl.arity, 2);
        assert_eq!(decl.params.len(), 4);
        assert!(decl.params[2].is_optional);
        assert!(decl.params[3].is_named);
        assert!(decl.params[3].initializer.is_some());
    }

    #[test]
    fn trailing_ellipsis_marks_variadic_arity() {
        let (statements, _) =
            parse("external fun print(...)", ParseStyle::Library).expect("parse failed");
        let Stmt::Func(decl) = &statements[0] else {
            panic!("expected function declaration");
        };
        assert_eq!(decl.arity, -1);
        assert!(decl.is_extern);
        assert!(decl.body.is_none());
    }

    #[test]
    fn function_parens_are_optional_when_empty() {
        let (statements, _) = parse("fun twice: num { return 2 }  proc main { }", ParseStyle::Library)
            .expect("parse failed");
        let Stmt::Func(twice) = &statements[0] else {
            panic!("expected function declaration");
        };
        assert_eq!(twice.return_type.name, "num");
        assert!(twice.params.is_empty());
        let Stmt::Func(main) = &statements[1] else {
            panic!("expected procedure declaration");
        };
        assert_eq!(main.kind, FuncKind::Procedure);
    }

    #[test]
    fn lowers_for_in_to_while_over_length() {
        let statements = parse_function("for (var x in xs) { total = total + x }");
        let Stmt::Block { statements, .. } = &statements[0] else {
            panic!("expected lowering block");
        };
        let Stmt::Var(index_decl) = &statements[0] else {
            panic!("expected synthetic index declaration");
        };
        assert!(index_decl.name.starts_with("__i"));
        assert!(matches!(&statements[1], Stmt::Var(decl) if decl.name == "x"));
        let Stmt::While { condition, body, .. } = &statements[2] else {
            panic!("expected while loop");
        };
        let Expr::Binary { op, right, .. } = condition else {
            panic!("expected comparison condition");
        };
        assert_eq!(*op, BinaryOp::Less);
        let Expr::MemberGet { collection, key, .. } = right.as_ref() else {
            panic!("expected length access");
        };
        assert_eq!(key, "length");
        let Expr::Symbol { id: length_target_id, .. } = collection.as_ref() else {
            panic!("expected symbol target");
        };

        let Stmt::Block { statements: body, .. } = body.as_ref() else {
            panic!("expected while body block");
        };
        let Stmt::Expr(Expr::Assign { value, .. }) = &body[0] else {
            panic!("expected loop variable rebind");
        };
        let Expr::SubGet { collection, .. } = value.as_ref() else {
            panic!("expected subscript");
        };
        let Expr::Symbol { id: subscript_target_id, .. } = collection.as_ref() else {
            panic!("expected symbol target");
        };
        // The two copies of the target must resolve independently.
        assert_ne!(length_target_id, subscript_target_id);
    }

    #[test]
    fn parses_class_members_with_reserved_names() {
        let source = indoc! {"
            class C {
              static var count = 0
              var x
              construct(v: num) { this.x = v }
              get size: num { return 1 }
              set size(v) { }
              fun twice: num { return 2 }
            }
        "};
        let (statements, _) = parse(source, ParseStyle::Library).expect("parse failed");
        let Stmt::Class(decl) = &statements[0] else {
            panic!("expected class declaration");
        };
        assert_eq!(decl.variables.len(), 2);
        assert!(decl.variables[0].is_static);
        let names: Vec<_> = decl.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["__construct__", "__get__size", "__set__size", "twice"]);
        assert_eq!(decl.methods[3].kind, FuncKind::Method);
    }

    #[test]
    fn external_class_members_have_no_bodies() {
        let (statements, _) = parse(
            "external class Person { var name fun greeting }",
            ParseStyle::Library,
        )
        .expect("parse failed");
        let Stmt::Class(decl) = &statements[0] else {
            panic!("expected class declaration");
        };
        assert!(decl.is_extern);
        assert!(decl.methods[0].is_extern);
        assert!(decl.methods[0].body.is_none());
    }

    #[test]
    fn errors_on_setter_arity() {
        let err = parse("class C { set x(a, b) { } }", ParseStyle::Library)
            .expect_err("expected parse failure");
        assert!(matches!(err, ParseError::SetterArity { .. }));
    }

    #[test]
    fn parses_generic_type_annotations() {
        let statements = parse_function("var m: Map<String, List<num>> = {}");
        let Stmt::Var(decl) = &statements[0] else {
            panic!("expected var declaration");
        };
        assert_eq!(decl.declared_type.name, "Map");
        assert_eq!(decl.declared_type.args.len(), 2);
        assert_eq!(decl.declared_type.args[1].name, "List");
        assert_eq!(decl.declared_type.args[1].args[0].name, "num");
    }

    #[test]
    fn library_style_rejects_expression_statements() {
        let err = parse("1 + 2", ParseStyle::Library).expect_err("expected parse failure");
        assert!(matches!(err, ParseError::StatementNotAllowed { .. }));
    }

    #[test]
    fn function_style_rejects_class_declarations() {
        let err = parse("class C { }", ParseStyle::Function).expect_err("expected parse failure");
        assert!(matches!(err, ParseError::StatementNotAllowed { .. }));
    }

    #[test]
    fn identical_literals_share_one_pool_slot() {
        let (_, pool) = parse("var a = 42  var b = 42  var c = 'x'", ParseStyle::Library)
            .expect("parse failed");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn parses_import_with_alias() {
        let (statements, _) =
            parse("import 'util.ht' as util", ParseStyle::Library).expect("parse failed");
        assert!(matches!(
            &statements[0],
            Stmt::Import { path, alias: Some(alias), .. } if path == "util.ht" && alias == "util"
        ));
    }
}
