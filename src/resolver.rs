//! Lexical pre-pass between parsing and evaluation.
//!
//! Walks the statement tree with a stack of block scopes, recording for every
//! `Symbol`/`This`/`Assign` site how many namespaces separate the use from
//! the declaration. Names that resolve to no block are left to the
//! evaluator's lexical walk ending at globals. The block structure mirrors
//! the namespaces the evaluator creates at runtime: one block per `{}` block
//! and function body, a class block over static members and methods, an
//! instance block over instance variables, and one implicit block per
//! instance-method body where `this` is bound.

use std::collections::HashMap;

use thiserror::Error;

use crate::ast::{ClassDecl, Expr, FuncDecl, FuncKind, NodeId, Stmt, VarDecl};
use crate::lexicon::{GETTER_PREFIX, SETTER_PREFIX};
use crate::token::Span;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolveError {
    #[error("'{name}' is already declared in this scope at line {line}, column {column}")]
    AlreadyDeclared {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("Cannot read '{name}' in its own initializer at line {line}, column {column}")]
    ReadInOwnInitializer {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("Return outside of a function at line {line}, column {column}")]
    ReturnOutsideFunction { line: usize, column: usize },
    #[error("Constructors cannot return a value at line {line}, column {column}")]
    ReturnValueInConstructor { line: usize, column: usize },
    #[error("Procedures cannot return a value at line {line}, column {column}")]
    ReturnValueInProcedure { line: usize, column: usize },
    #[error("'this' outside of a class at line {line}, column {column}")]
    ThisOutsideClass { line: usize, column: usize },
    #[error("Class '{name}' cannot extend itself at line {line}, column {column}")]
    ClassExtendsItself {
        name: String,
        line: usize,
        column: usize,
    },
}

pub type ResolveResult<T> = Result<T, ResolveError>;

pub struct Resolver<'a> {
    blocks: Vec<HashMap<String, bool>>,
    distances: &'a mut HashMap<NodeId, usize>,
    func_kinds: Vec<FuncKind>,
    class_depth: usize,
}

/// Declarations whose bodies are resolved after the enclosing statement
/// sequence, so siblings may reference each other regardless of order.
enum Deferred<'s> {
    Func(&'s FuncDecl),
    Class(&'s ClassDecl),
}

impl<'a> Resolver<'a> {
    pub fn new(distances: &'a mut HashMap<NodeId, usize>) -> Self {
        Self {
            blocks: Vec::new(),
            distances,
            func_kinds: Vec::new(),
            class_depth: 0,
        }
    }

    pub fn resolve(&mut self, statements: &[Stmt]) -> ResolveResult<()> {
        self.resolve_sequence(statements)
    }

    fn resolve_sequence(&mut self, statements: &[Stmt]) -> ResolveResult<()> {
        let mut deferred = Vec::new();

        // Declare function and class names up front; forward references
        // among siblings are legal.
        for statement in statements {
            match statement {
                Stmt::Func(decl) => self.declare_and_define(&decl.name, decl.span)?,
                Stmt::Class(decl) => self.declare_and_define(&decl.name, decl.span)?,
                _ => {}
            }
        }

        for statement in statements {
            match statement {
                Stmt::Func(decl) => deferred.push(Deferred::Func(decl)),
                Stmt::Class(decl) => deferred.push(Deferred::Class(decl)),
                other => self.resolve_statement(other)?,
            }
        }

        for item in deferred {
            match item {
                Deferred::Func(decl) => self.resolve_function(decl, false)?,
                Deferred::Class(decl) => self.resolve_class(decl)?,
            }
        }
        Ok(())
    }

    fn resolve_statement(&mut self, statement: &Stmt) -> ResolveResult<()> {
        match statement {
            Stmt::Import { .. } => Ok(()),
            Stmt::Var(decl) => self.resolve_var_decl(decl),
            Stmt::Expr(expr) => self.resolve_expr(expr),
            Stmt::Block { statements, .. } => {
                self.push_block();
                let result = self.resolve_sequence(statements);
                self.pop_block();
                result
            }
            Stmt::Return { expr, span } => {
                let Some(kind) = self.func_kinds.last() else {
                    return Err(ResolveError::ReturnOutsideFunction {
                        line: span.line,
                        column: span.column,
                    });
                };
                if let Some(expr) = expr {
                    match kind {
                        FuncKind::Constructor => {
                            return Err(ResolveError::ReturnValueInConstructor {
                                line: span.line,
                                column: span.column,
                            });
                        }
                        FuncKind::Procedure => {
                            return Err(ResolveError::ReturnValueInProcedure {
                                line: span.line,
                                column: span.column,
                            });
                        }
                        _ => {}
                    }
                    self.resolve_expr(expr)?;
                }
                Ok(())
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(condition)?;
                self.resolve_statement(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch)?;
                }
                Ok(())
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.resolve_expr(condition)?;
                self.resolve_statement(body)
            }
            Stmt::Break { .. } | Stmt::Continue { .. } => Ok(()),
            Stmt::Func(decl) => self.resolve_function(decl, false),
            Stmt::Class(decl) => self.resolve_class(decl),
        }
    }

    fn resolve_var_decl(&mut self, decl: &VarDecl) -> ResolveResult<()> {
        if let Some(initializer) = &decl.initializer {
            self.declare(&decl.name, decl.span)?;
            self.resolve_expr(initializer)?;
            self.define(&decl.name);
        } else {
            self.declare_and_define(&decl.name, decl.span)?;
        }
        Ok(())
    }

    fn resolve_function(&mut self, decl: &FuncDecl, bind_this: bool) -> ResolveResult<()> {
        let Some(body) = &decl.body else {
            return Ok(());
        };
        if bind_this {
            self.push_block();
            self.declare_and_define("this", decl.span)?;
        }
        self.func_kinds.push(decl.kind);
        self.push_block();
        for param in &decl.params {
            self.declare_and_define(&param.name, param.span)?;
            if let Some(default) = &param.initializer {
                self.resolve_expr(default)?;
            }
        }
        let result = self.resolve_sequence(body);
        self.pop_block();
        self.func_kinds.pop();
        if bind_this {
            self.pop_block();
        }
        result
    }

    fn resolve_class(&mut self, decl: &ClassDecl) -> ResolveResult<()> {
        if decl.superclass.as_deref() == Some(decl.name.as_str()) {
            return Err(ResolveError::ClassExtendsItself {
                name: decl.name.clone(),
                line: decl.span.line,
                column: decl.span.column,
            });
        }
        self.class_depth += 1;

        // Class block: `super`, static variables, and every method's internal
        // name. User-facing getter/setter names are declared alongside so an
        // unprefixed reference inside another body resolves here.
        self.push_block();
        if decl.superclass.is_some() {
            self.declare_and_define("super", decl.span)?;
        }
        for method in &decl.methods {
            self.declare_and_define(&method.name, method.span)?;
            if let Some(plain) = method
                .name
                .strip_prefix(GETTER_PREFIX)
                .or_else(|| method.name.strip_prefix(SETTER_PREFIX))
                && !self.block_has(plain)
            {
                self.declare_and_define(plain, method.span)?;
            }
        }
        for variable in decl.variables.iter().filter(|v| v.is_static) {
            self.resolve_var_decl(variable)?;
        }
        for method in decl.methods.iter().filter(|m| m.is_static) {
            self.resolve_function(method, false)?;
        }

        // Instance block: `this` (for field initializers), instance
        // variables, then the instance-method bodies with their own `this`
        // binding block.
        self.push_block();
        self.declare_and_define("this", decl.span)?;
        for variable in decl.variables.iter().filter(|v| !v.is_static) {
            self.resolve_var_decl(variable)?;
        }
        for method in decl.methods.iter().filter(|m| !m.is_static) {
            self.resolve_function(method, true)?;
        }
        self.pop_block();

        self.pop_block();
        self.class_depth -= 1;
        Ok(())
    }

    fn resolve_expr(&mut self, expr: &Expr) -> ResolveResult<()> {
        match expr {
            Expr::Null { .. } | Expr::Const { .. } => Ok(()),
            Expr::Group(inner) => self.resolve_expr(inner),
            Expr::Vector { items, .. } => {
                for item in items {
                    self.resolve_expr(item)?;
                }
                Ok(())
            }
            Expr::Dict { entries, .. } => {
                for (key, value) in entries {
                    self.resolve_expr(key)?;
                    self.resolve_expr(value)?;
                }
                Ok(())
            }
            Expr::Symbol { id, name, span } => {
                if self
                    .blocks
                    .last()
                    .and_then(|block| block.get(name))
                    .is_some_and(|defined| !defined)
                {
                    return Err(ResolveError::ReadInOwnInitializer {
                        name: name.clone(),
                        line: span.line,
                        column: span.column,
                    });
                }
                self.resolve_local(*id, name);
                Ok(())
            }
            Expr::Unary { operand, .. } => self.resolve_expr(operand),
            Expr::Binary { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)
            }
            Expr::SubGet {
                collection, key, ..
            } => {
                self.resolve_expr(collection)?;
                self.resolve_expr(key)
            }
            Expr::SubSet {
                collection,
                key,
                value,
                ..
            } => {
                self.resolve_expr(collection)?;
                self.resolve_expr(key)?;
                self.resolve_expr(value)
            }
            Expr::MemberGet { collection, .. } => self.resolve_expr(collection),
            Expr::MemberSet {
                collection, value, ..
            } => {
                self.resolve_expr(collection)?;
                self.resolve_expr(value)
            }
            Expr::Call {
                callee,
                positional,
                named,
                ..
            } => {
                self.resolve_expr(callee)?;
                for arg in positional {
                    self.resolve_expr(arg)?;
                }
                for arg in named {
                    self.resolve_expr(&arg.value)?;
                }
                Ok(())
            }
            Expr::This { id, span } => {
                if self.class_depth == 0 {
                    return Err(ResolveError::ThisOutsideClass {
                        line: span.line,
                        column: span.column,
                    });
                }
                self.resolve_local(*id, "this");
                Ok(())
            }
            Expr::Assign {
                id, name, value, ..
            } => {
                self.resolve_expr(value)?;
                self.resolve_local(*id, name);
                Ok(())
            }
        }
    }

    fn resolve_local(&mut self, id: NodeId, name: &str) {
        for (index, block) in self.blocks.iter().enumerate().rev() {
            if block.contains_key(name) {
                let distance = self.blocks.len() - 1 - index;
                self.distances.insert(id, distance);
                return;
            }
        }
        // Not found in any block: the evaluator walks the namespace chain.
    }

    fn push_block(&mut self) {
        self.blocks.push(HashMap::new());
    }

    fn pop_block(&mut self) {
        self.blocks.pop();
    }

    fn block_has(&self, name: &str) -> bool {
        self.blocks
            .last()
            .is_some_and(|block| block.contains_key(name))
    }

    fn declare(&mut self, name: &str, span: Span) -> ResolveResult<()> {
        if let Some(block) = self.blocks.last_mut() {
            if block.contains_key(name) {
                return Err(ResolveError::AlreadyDeclared {
                    name: name.to_string(),
                    line: span.line,
                    column: span.column,
                });
            }
            block.insert(name.to_string(), false);
        }
        Ok(())
    }

    fn define(&mut self, name: &str) {
        if let Some(block) = self.blocks.last_mut() {
            block.insert(name.to_string(), true);
        }
    }

    fn declare_and_define(&mut self, name: &str, span: Span) -> ResolveResult<()> {
        self.declare(name, span)?;
        self.define(name);
        Ok(())
    }
}

pub fn resolve(
    statements: &[Stmt],
    distances: &mut HashMap<NodeId, usize>,
) -> ResolveResult<()> {
    Resolver::new(distances).resolve(statements)
}
