//! Statement execution and expression evaluation.
//!
//! Execution pipeline per top-level call:
//! exec_sequence -> exec_statement -> eval_expr -> call_value
//! -> call_function (new activation) -> exec_sequence (function body).
//!
//! Control flow travels as a [`Flow`] sum over the `Result` success channel:
//! loops absorb `Break`/`Continue`, call frames absorb `Return`, and a marker
//! that escapes its innermost legal handler becomes a runtime error. The
//! error channel is reserved for real failures.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::ast::{
    BinaryOp, ClassDecl, Expr, FuncDecl, Literal, NodeId, Stmt, TypeExpr, UnaryOp, VarDecl,
};
use crate::lexer;
use crate::lexicon::{
    CONSTRUCTOR_NAME, EXTERNAL_PREFIX, GETTER_PREFIX, SETTER_PREFIX, TYPE_CLASS, TYPE_FUNCTION,
    TYPE_NUMBER, TYPE_OBJECT, VARIADIC_ARGS_NAME,
};
use crate::namespace::{self, Declaration, Namespace, NamespaceRef};
use crate::parser::{self, ParseStyle};
use crate::resolver;
use crate::token::Span;
use crate::value::{Class, Function, Instance, Value, ValueMap};

use super::Interpreter;
use super::error::RuntimeError;

/// Result of executing one statement.
pub(super) enum Flow {
    Normal(Value),
    Break(Span),
    Continue(Span),
    Return(Value),
}

type InstanceRef = Rc<std::cell::RefCell<Instance>>;
type ClassRef = Rc<std::cell::RefCell<Class>>;

impl Interpreter {
    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Runs statements in order in the current namespace; a non-normal flow
    /// stops the sequence. The value of the last statement is carried so
    /// `eval` can hand it back to the host.
    pub(super) fn exec_sequence(&mut self, statements: &[Stmt]) -> Result<Flow, RuntimeError> {
        let mut last = Value::Null;
        for statement in statements {
            match self.exec_statement(statement)? {
                Flow::Normal(value) => last = value,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn exec_statement(&mut self, statement: &Stmt) -> Result<Flow, RuntimeError> {
        match statement {
            Stmt::Import { path, alias, span } => {
                self.exec_import(path, alias.as_deref(), *span)?;
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::Var(decl) => {
                self.exec_var_decl(decl)?;
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::Expr(expr) => Ok(Flow::Normal(self.eval_expr(expr)?)),
            Stmt::Block { statements, .. } => {
                let saved = Rc::clone(&self.context);
                self.context = Namespace::child(&saved, "block");
                let result = self.exec_sequence(statements);
                self.context = saved;
                result
            }
            Stmt::Return { expr, .. } => {
                let value = match expr {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                span,
            } => {
                if self.eval_condition(condition, *span)? {
                    self.exec_statement(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_statement(else_branch)
                } else {
                    Ok(Flow::Normal(Value::Null))
                }
            }
            Stmt::While {
                condition,
                body,
                span,
            } => {
                while self.eval_condition(condition, *span)? {
                    match self.exec_statement(body)? {
                        Flow::Normal(_) | Flow::Continue(_) => {}
                        Flow::Break(_) => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::Break { span } => Ok(Flow::Break(*span)),
            Stmt::Continue { span } => Ok(Flow::Continue(*span)),
            Stmt::Func(decl) => {
                self.exec_func_decl(decl)?;
                Ok(Flow::Normal(Value::Null))
            }
            Stmt::Class(decl) => {
                self.exec_class_decl(decl)?;
                Ok(Flow::Normal(Value::Null))
            }
        }
    }

    fn eval_condition(&mut self, condition: &Expr, span: Span) -> Result<bool, RuntimeError> {
        match self.eval_expr(condition)? {
            Value::Boolean(value) => Ok(value),
            other => Err(RuntimeError::ConditionNotBoolean {
                type_name: other.type_name(),
                line: span.line,
                column: span.column,
            }),
        }
    }

    fn exec_var_decl(&mut self, decl: &Rc<VarDecl>) -> Result<(), RuntimeError> {
        let declaration = match &decl.initializer {
            Some(expr) => {
                let value = self.eval_expr(expr)?;
                let declared_type = if decl.type_inferred {
                    TypeExpr::named(value.type_name())
                } else {
                    decl.declared_type.clone()
                };
                Declaration::new(value, declared_type, decl.is_mutable)
            }
            None => Declaration::uninitialized(decl.declared_type.clone(), decl.is_mutable),
        };
        self.context
            .borrow_mut()
            .define(&decl.name, declaration, decl.span)
    }

    /// Evaluating a function declaration captures the namespace in effect,
    /// which is what gives closures their lexical scope. External
    /// declarations bind to their extern-table entry instead.
    fn exec_func_decl(&mut self, decl: &Rc<FuncDecl>) -> Result<(), RuntimeError> {
        let function = if decl.is_extern {
            let callback = self.extern_callback(decl.class_name.as_deref(), &decl.name, decl.span)?;
            Function::extern_decl(Rc::clone(decl), callback)
        } else {
            Function::from_decl(Rc::clone(decl), Rc::clone(&self.context))
        };
        self.context.borrow_mut().define(
            &decl.name,
            Declaration::new(
                Value::Function(Rc::new(function)),
                TypeExpr::named(TYPE_FUNCTION),
                false,
            ),
            decl.span,
        )
    }

    /// Looks up `__external__<qualified>` in globals and returns its native
    /// callback.
    fn extern_callback(
        &self,
        class_name: Option<&str>,
        name: &str,
        span: Span,
    ) -> Result<crate::externs::ExternalFunction, RuntimeError> {
        let qualified = match class_name {
            Some(class_name) => format!("{class_name}.{name}"),
            None => name.to_string(),
        };
        let entry = format!("{EXTERNAL_PREFIX}{qualified}");
        match self.globals.borrow().fetch_local(&entry) {
            Some(Value::Function(function)) if function.native.is_some() => {
                Ok(function.native.clone().expect("checked native"))
            }
            _ => Err(RuntimeError::MissingExternalBinding {
                name: qualified,
                line: span.line,
                column: span.column,
            }),
        }
    }

    /// Class declaration processing: declare the name, resolve the
    /// superclass, copy inherited instance-variable declarations, run static
    /// initializers, install methods. The class value is only mutated within
    /// this sequence.
    fn exec_class_decl(&mut self, decl: &Rc<ClassDecl>) -> Result<(), RuntimeError> {
        let superclass = self.resolve_superclass(decl)?;

        let class_ns = Namespace::child(&self.context, &decl.name);
        let external = if decl.is_extern {
            match self.external_namespaces.get(&decl.name) {
                Some(external) => Some(Rc::clone(external)),
                None => {
                    return Err(RuntimeError::MissingExternalBinding {
                        name: decl.name.clone(),
                        line: decl.span.line,
                        column: decl.span.column,
                    });
                }
            }
        } else {
            None
        };

        let class = Rc::new(std::cell::RefCell::new(Class {
            name: decl.name.clone(),
            superclass: superclass.clone(),
            namespace: Rc::clone(&class_ns),
            instance_variables: Vec::new(),
            external,
        }));
        let class_value = Value::Class(Rc::clone(&class));
        self.context.borrow_mut().define(
            &decl.name,
            Declaration::new(class_value, TypeExpr::named(TYPE_CLASS), false),
            decl.span,
        )?;

        if let Some(superclass) = &superclass {
            class_ns.borrow_mut().define(
                "super",
                Declaration::new(
                    Value::Class(Rc::clone(superclass)),
                    TypeExpr::named(TYPE_CLASS),
                    false,
                ),
                decl.span,
            )?;
        }

        // External classes carry signatures only; every member access routes
        // through the host namespace, so nothing is installed script-side.
        if decl.is_extern {
            return Ok(());
        }

        // Inherited instance-variable declarations come first, so superclass
        // fields initialize before the subclass's own.
        let mut instance_variables = superclass
            .as_ref()
            .map(|superclass| superclass.borrow().instance_variables.clone())
            .unwrap_or_default();
        instance_variables.extend(
            decl.variables
                .iter()
                .filter(|variable| !variable.is_static)
                .cloned(),
        );
        class.borrow_mut().instance_variables = instance_variables;

        // Static variable initializers run inside the class namespace.
        let saved = Rc::clone(&self.context);
        self.context = Rc::clone(&class_ns);
        let static_result = decl
            .variables
            .iter()
            .filter(|variable| variable.is_static)
            .try_for_each(|variable| self.exec_var_decl(variable));
        self.context = saved;
        static_result?;

        for method in decl
            .methods
            .iter()
            .filter(|method| method.is_static)
            .chain(decl.methods.iter().filter(|method| !method.is_static))
        {
            let function = if method.is_extern {
                let callback =
                    self.extern_callback(Some(&decl.name), &method.name, method.span)?;
                Function::extern_decl(Rc::clone(method), callback)
            } else {
                Function::from_decl(Rc::clone(method), Rc::clone(&class_ns))
            };
            class_ns.borrow_mut().define(
                &method.name,
                Declaration::new(
                    Value::Function(Rc::new(function)),
                    TypeExpr::named(TYPE_FUNCTION),
                    false,
                ),
                method.span,
            )?;
        }
        Ok(())
    }

    fn resolve_superclass(&mut self, decl: &ClassDecl) -> Result<Option<ClassRef>, RuntimeError> {
        if let Some(name) = &decl.superclass {
            match namespace::fetch(&self.context, name, decl.span)? {
                Value::Class(class) => return Ok(Some(class)),
                _ => {
                    return Err(RuntimeError::NotAClass {
                        name: name.clone(),
                        line: decl.span.line,
                        column: decl.span.column,
                    });
                }
            }
        }
        // Everything except the root object class extends it implicitly. The
        // lookup is allowed to fail while the core library itself loads.
        if decl.name != TYPE_OBJECT
            && let Some(Value::Class(object)) = self.globals.borrow().fetch_local(TYPE_OBJECT)
        {
            return Ok(Some(object));
        }
        Ok(None)
    }

    fn exec_import(
        &mut self,
        path: &str,
        alias: Option<&str>,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let full_path = self.config.working_directory.join(path);
        let key = full_path.to_string_lossy().to_string();

        if let Some(existing) = self.evaluated_files.get(&key).cloned() {
            if let Some(alias) = alias {
                self.context.borrow_mut().overwrite(
                    alias,
                    Declaration::new(Value::Namespace(existing), TypeExpr::any(), false),
                );
            }
            return Ok(());
        }

        let import_failed = |message: String| RuntimeError::ImportFailed {
            path: path.to_string(),
            message,
            line: span.line,
            column: span.column,
        };

        log::debug!("importing '{}'", full_path.display());
        let source =
            (self.config.file_reader)(&full_path).map_err(|error| import_failed(error.to_string()))?;
        let tokens = lexer::tokenize(&source).map_err(|error| import_failed(error.to_string()))?;
        let statements =
            parser::parse_tokens(tokens, &mut self.pool, &mut self.ids, ParseStyle::Library)
                .map_err(|error| import_failed(error.to_string()))?;
        resolver::resolve(&statements, &mut self.distances)
            .map_err(|error| import_failed(error.to_string()))?;

        let library_ns = match alias {
            Some(alias) => Namespace::child(&self.globals, alias),
            None => Rc::clone(&self.globals),
        };
        self.evaluated_files.insert(key, Rc::clone(&library_ns));

        let saved = Rc::clone(&self.context);
        self.context = Rc::clone(&library_ns);
        let result = self.exec_sequence(&statements);
        self.context = saved;
        match result? {
            Flow::Normal(_) => {}
            Flow::Return(_) | Flow::Break(_) | Flow::Continue(_) => {
                // The resolver rejects these at library level already.
            }
        }

        if let Some(alias) = alias {
            self.context.borrow_mut().overwrite(
                alias,
                Declaration::new(Value::Namespace(library_ns), TypeExpr::any(), false),
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(super) fn eval_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Null { .. } => Ok(Value::Null),
            Expr::Const { index, span } => match self.pool.get(*index) {
                Some(Literal::Number(value)) => Ok(Value::Number(*value)),
                Some(Literal::Boolean(value)) => Ok(Value::Boolean(*value)),
                Some(Literal::String(value)) => Ok(Value::String(value.clone())),
                None => Err(RuntimeError::UndefinedIdentifier {
                    name: format!("literal #{index}"),
                    line: span.line,
                    column: span.column,
                }),
            },
            Expr::Group(inner) => self.eval_expr(inner),
            Expr::Vector { items, .. } => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item)?);
                }
                Ok(Value::list(values))
            }
            Expr::Dict { entries, .. } => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    let key = self.eval_expr(key)?;
                    let value = self.eval_expr(value)?;
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            Expr::Symbol { id, name, span } => self.lookup_symbol(*id, name, *span),
            Expr::This { id, span } => self.lookup_this(*id, *span),
            Expr::Unary { op, operand, span } => {
                let value = self.eval_expr(operand)?;
                self.eval_unary(*op, value, *span)
            }
            Expr::Binary {
                left,
                op,
                right,
                span,
            } => self.eval_binary(left, *op, right, *span),
            Expr::SubGet {
                collection,
                key,
                span,
            } => {
                let collection = self.eval_expr(collection)?;
                let key = self.eval_expr(key)?;
                self.sub_get(collection, key, *span)
            }
            Expr::SubSet {
                collection,
                key,
                value,
                span,
            } => {
                let collection = self.eval_expr(collection)?;
                let key = self.eval_expr(key)?;
                let value = self.eval_expr(value)?;
                self.sub_set(collection, key, value.clone(), *span)?;
                Ok(value)
            }
            Expr::MemberGet {
                collection,
                key,
                span,
            } => {
                let receiver = self.eval_expr(collection)?;
                self.member_get(receiver, key, *span)
            }
            Expr::MemberSet {
                collection,
                key,
                value,
                span,
            } => {
                let receiver = self.eval_expr(collection)?;
                let value = self.eval_expr(value)?;
                self.member_set(receiver, key, value.clone(), *span)?;
                Ok(value)
            }
            Expr::Call {
                callee,
                positional,
                named,
                span,
            } => {
                let callee = self.eval_expr(callee)?;
                let mut positional_values = Vec::with_capacity(positional.len());
                for arg in positional {
                    positional_values.push(self.eval_expr(arg)?);
                }
                let mut named_values = HashMap::new();
                for arg in named {
                    let value = self.eval_expr(&arg.value)?;
                    named_values.insert(arg.name.clone(), value);
                }
                self.call_value(callee, positional_values, named_values, *span)
            }
            Expr::Assign {
                id,
                name,
                value,
                span,
            } => {
                let value = self.eval_expr(value)?;
                self.assign_symbol(*id, name, value.clone(), *span)?;
                Ok(value)
            }
        }
    }

    /// Distance-addressed read when the resolver recorded one, lexical walk
    /// to globals otherwise. A name that resolves to a getter function is
    /// invoked implicitly.
    fn lookup_symbol(&mut self, id: NodeId, name: &str, span: Span) -> Result<Value, RuntimeError> {
        let value = match self.distances.get(&id).copied() {
            Some(distance) => {
                let target = namespace::closure_at(&self.context, distance).ok_or(
                    RuntimeError::UndefinedIdentifier {
                        name: name.to_string(),
                        line: span.line,
                        column: span.column,
                    },
                )?;
                let found = {
                    let target = target.borrow();
                    target
                        .fetch_local(name)
                        .or_else(|| target.fetch_local(&format!("{GETTER_PREFIX}{name}")))
                };
                found.ok_or(RuntimeError::UndefinedIdentifier {
                    name: name.to_string(),
                    line: span.line,
                    column: span.column,
                })?
            }
            None => namespace::fetch(&self.context, name, span)?,
        };
        if let Value::Function(function) = &value
            && function.is_getter()
        {
            let function = Rc::clone(function);
            return self.call_function(function, Vec::new(), HashMap::new(), span);
        }
        Ok(value)
    }

    fn lookup_this(&mut self, id: NodeId, span: Span) -> Result<Value, RuntimeError> {
        match self.distances.get(&id).copied() {
            Some(distance) => namespace::closure_at(&self.context, distance)
                .and_then(|target| target.borrow().fetch_local("this"))
                .ok_or(RuntimeError::UndefinedIdentifier {
                    name: "this".to_string(),
                    line: span.line,
                    column: span.column,
                }),
            None => namespace::fetch(&self.context, "this", span),
        }
    }

    /// Distance-addressed store; a target that resolves to a setter function
    /// is invoked with the value instead.
    fn assign_symbol(
        &mut self,
        id: NodeId,
        name: &str,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        match self.distances.get(&id).copied() {
            Some(distance) => {
                let target = namespace::closure_at(&self.context, distance).ok_or(
                    RuntimeError::UndefinedIdentifier {
                        name: name.to_string(),
                        line: span.line,
                        column: span.column,
                    },
                )?;
                if target.borrow().contains(name) {
                    return target.borrow_mut().assign_local(name, value, span);
                }
                let setter = target
                    .borrow()
                    .fetch_local(&format!("{SETTER_PREFIX}{name}"));
                if let Some(Value::Function(setter)) = setter
                    && setter.is_setter()
                {
                    self.call_function(setter, vec![value], HashMap::new(), span)?;
                    return Ok(());
                }
                Err(RuntimeError::UndefinedIdentifier {
                    name: name.to_string(),
                    line: span.line,
                    column: span.column,
                })
            }
            None => namespace::assign(&self.context, name, value, span),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, value: Value, span: Span) -> Result<Value, RuntimeError> {
        match (op, value) {
            (UnaryOp::Negate, Value::Number(value)) => Ok(Value::Number(-value)),
            (UnaryOp::Not, Value::Boolean(value)) => Ok(Value::Boolean(!value)),
            (UnaryOp::Negate, other) => Err(RuntimeError::UndefinedOperator {
                op: "-".to_string(),
                operands: other.type_name(),
                line: span.line,
                column: span.column,
            }),
            (UnaryOp::Not, other) => Err(RuntimeError::UndefinedOperator {
                op: "!".to_string(),
                operands: other.type_name(),
                line: span.line,
                column: span.column,
            }),
        }
    }

    fn eval_binary(
        &mut self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        // Logical operators short-circuit on the left operand.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let left = self.eval_expr(left)?;
            let Value::Boolean(left) = left else {
                return Err(self.operator_error(op, &left.type_name(), "bool", span));
            };
            match (op, left) {
                (BinaryOp::And, false) => return Ok(Value::Boolean(false)),
                (BinaryOp::Or, true) => return Ok(Value::Boolean(true)),
                _ => {}
            }
            let right = self.eval_expr(right)?;
            let Value::Boolean(right) = right else {
                return Err(self.operator_error(op, "bool", &right.type_name(), span));
            };
            return Ok(Value::Boolean(right));
        }

        let left = self.eval_expr(left)?;
        let right = self.eval_expr(right)?;
        match op {
            BinaryOp::Add => match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
                _ => Err(self.operator_error(op, &left.type_name(), &right.type_name(), span)),
            },
            BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Modulo => {
                let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                    return Err(self.operator_error(
                        op,
                        &left.type_name(),
                        &right.type_name(),
                        span,
                    ));
                };
                Ok(Value::Number(match op {
                    BinaryOp::Subtract => a - b,
                    BinaryOp::Multiply => a * b,
                    BinaryOp::Divide => a / b,
                    BinaryOp::Modulo => a % b,
                    _ => unreachable!("arithmetic operator checked above"),
                }))
            }
            BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual => {
                let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                    return Err(self.operator_error(
                        op,
                        &left.type_name(),
                        &right.type_name(),
                        span,
                    ));
                };
                Ok(Value::Boolean(match op {
                    BinaryOp::Less => a < b,
                    BinaryOp::Greater => a > b,
                    BinaryOp::LessEqual => a <= b,
                    BinaryOp::GreaterEqual => a >= b,
                    _ => unreachable!("comparison operator checked above"),
                }))
            }
            BinaryOp::Equal => Ok(Value::Boolean(left == right)),
            BinaryOp::NotEqual => Ok(Value::Boolean(left != right)),
            BinaryOp::Is => {
                let Value::Class(class) = &right else {
                    return Err(RuntimeError::NotAClass {
                        name: right.type_name(),
                        line: span.line,
                        column: span.column,
                    });
                };
                let class_name = class.borrow().name.clone();
                Ok(Value::Boolean(left.type_name() == class_name))
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled before operand evaluation"),
        }
    }

    fn operator_error(&self, op: BinaryOp, left: &str, right: &str, span: Span) -> RuntimeError {
        RuntimeError::UndefinedOperator {
            op: op.glyph().to_string(),
            operands: format!("{left} and {right}"),
            line: span.line,
            column: span.column,
        }
    }

    // ------------------------------------------------------------------
    // Subscripts and members
    // ------------------------------------------------------------------

    fn sub_get(&mut self, collection: Value, key: Value, span: Span) -> Result<Value, RuntimeError> {
        let target = self.unwrap_collection(collection);
        match target {
            Value::List(items) => {
                let items = items.borrow();
                let index = self.expect_index(&key, items.len(), span)?;
                Ok(items[index].clone())
            }
            Value::Map(map) => Ok(map.borrow().get(&key).cloned().unwrap_or(Value::Null)),
            other => Err(RuntimeError::SubscriptOnNonCollection {
                type_name: other.type_name(),
                line: span.line,
                column: span.column,
            }),
        }
    }

    fn sub_set(
        &mut self,
        collection: Value,
        key: Value,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let target = self.unwrap_collection(collection);
        match target {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let index = self.expect_index(&key, len, span)?;
                items[index] = value;
                Ok(())
            }
            Value::Map(map) => {
                map.borrow_mut().insert(key, value);
                Ok(())
            }
            other => Err(RuntimeError::SubscriptOnNonCollection {
                type_name: other.type_name(),
                line: span.line,
                column: span.column,
            }),
        }
    }

    /// Wrapper shells subscript through to their underlying value.
    fn unwrap_collection(&self, collection: Value) -> Value {
        if let Value::Instance(instance) = &collection
            && let Some(underlying) = instance.borrow().underlying.clone()
        {
            return underlying;
        }
        collection
    }

    fn expect_index(&self, key: &Value, len: usize, span: Span) -> Result<usize, RuntimeError> {
        let Value::Number(number) = key else {
            return Err(RuntimeError::ArgumentTypeMismatch {
                operation: "[]".to_string(),
                argument: "index".to_string(),
                expected: TYPE_NUMBER.to_string(),
                got: key.type_name(),
                line: span.line,
                column: span.column,
            });
        };
        if number.fract() != 0.0 {
            return Err(RuntimeError::ArgumentTypeMismatch {
                operation: "[]".to_string(),
                argument: "index".to_string(),
                expected: "integer".to_string(),
                got: number.to_string(),
                line: span.line,
                column: span.column,
            });
        }
        let index = *number as i64;
        if index < 0 || index as usize >= len {
            return Err(RuntimeError::IndexOutOfRange {
                index,
                len,
                line: span.line,
                column: span.column,
            });
        }
        Ok(index as usize)
    }

    pub(super) fn member_get(
        &mut self,
        receiver: Value,
        key: &str,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match receiver {
            Value::Instance(instance) => self.instance_fetch(&instance, key, span),
            Value::Class(class) => self.class_fetch(&class, key, span),
            Value::Namespace(namespace) => namespace.borrow().fetch_local(key).ok_or(
                RuntimeError::UndefinedMember {
                    name: key.to_string(),
                    type_name: namespace.borrow().name().to_string(),
                    line: span.line,
                    column: span.column,
                },
            ),
            value @ (Value::Number(_)
            | Value::Boolean(_)
            | Value::String(_)
            | Value::List(_)
            | Value::Map(_)) => {
                let wrapper = self.wrap_primitive(value, span)?;
                self.instance_fetch(&wrapper, key, span)
            }
            other => Err(RuntimeError::MemberGetOnNonObject {
                type_name: other.type_name(),
                line: span.line,
                column: span.column,
            }),
        }
    }

    fn member_set(
        &mut self,
        receiver: Value,
        key: &str,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        match receiver {
            Value::Instance(instance) => self.instance_assign(&instance, key, value, span),
            Value::Class(class) => self.class_assign(&class, key, value, span),
            receiver @ (Value::Number(_)
            | Value::Boolean(_)
            | Value::String(_)
            | Value::List(_)
            | Value::Map(_)) => {
                let wrapper = self.wrap_primitive(receiver, span)?;
                self.instance_assign(&wrapper, key, value, span)
            }
            other => Err(RuntimeError::MemberGetOnNonObject {
                type_name: other.type_name(),
                line: span.line,
                column: span.column,
            }),
        }
    }

    /// Member access on a bare primitive first wraps it in a transient
    /// instance of the built-in class of the same name; the shell shares the
    /// underlying value, so mutation through it is visible outside.
    fn wrap_primitive(&mut self, value: Value, span: Span) -> Result<InstanceRef, RuntimeError> {
        let class_name = value.type_name();
        let class = match self.globals.borrow().fetch_local(&class_name) {
            Some(Value::Class(class)) => class,
            _ => {
                return Err(RuntimeError::UndefinedIdentifier {
                    name: class_name,
                    line: span.line,
                    column: span.column,
                });
            }
        };
        let namespace = Namespace::child(&class.borrow().namespace.clone(), "instance");
        Ok(Rc::new(std::cell::RefCell::new(Instance {
            class,
            namespace,
            underlying: Some(value),
        })))
    }

    fn find_in_class_chain(class: &ClassRef, name: &str) -> Option<Value> {
        let mut current = Some(Rc::clone(class));
        while let Some(cls) = current {
            let cls = cls.borrow();
            if let Some(value) = cls.namespace.borrow().fetch_local(name) {
                return Some(value);
            }
            current = cls.superclass.clone();
        }
        None
    }

    /// Binds a method to an instance: the bound copy's context is a fresh
    /// namespace defining `this`, enclosed by the instance namespace. The
    /// binding namespace lives only as long as the bound function value, so
    /// no reference cycle is stored on the instance.
    fn bind_to_instance(
        &self,
        function: &Rc<Function>,
        instance: &InstanceRef,
        span: Span,
    ) -> Result<Rc<Function>, RuntimeError> {
        let instance_value = Value::Instance(Rc::clone(instance));
        let receiver = instance
            .borrow()
            .underlying
            .clone()
            .unwrap_or_else(|| instance_value.clone());
        let binding = Namespace::child(&instance.borrow().namespace.clone(), "bound");
        binding.borrow_mut().define(
            "this",
            Declaration::new(instance_value, TypeExpr::any(), false),
            span,
        )?;
        Ok(Rc::new(function.bind(binding, receiver)))
    }

    /// Instance member dispatch: own fields, then methods and getters up the
    /// class chain; external-class instances route through the host
    /// namespace with their handle.
    fn instance_fetch(
        &mut self,
        instance: &InstanceRef,
        key: &str,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let (class, external, handle) = {
            let borrowed = instance.borrow();
            (
                Rc::clone(&borrowed.class),
                borrowed.class.borrow().external.clone(),
                borrowed.underlying.clone(),
            )
        };
        if let Some(external) = external {
            let handle = handle.unwrap_or(Value::Null);
            return external
                .instance_fetch(&handle, key)
                .map_err(|error| self.external_error(key, error, span));
        }

        if let Some(value) = instance.borrow().namespace.borrow().fetch_local(key) {
            return Ok(value);
        }
        if let Some(found) = Self::find_in_class_chain(&class, key) {
            return match found {
                Value::Function(function) => {
                    let bound = self.bind_to_instance(&function, instance, span)?;
                    Ok(Value::Function(bound))
                }
                other => Ok(other),
            };
        }
        if let Some(Value::Function(getter)) =
            Self::find_in_class_chain(&class, &format!("{GETTER_PREFIX}{key}"))
        {
            let bound = self.bind_to_instance(&getter, instance, span)?;
            return self.call_function(bound, Vec::new(), HashMap::new(), span);
        }
        Err(RuntimeError::UndefinedMember {
            name: key.to_string(),
            type_name: class.borrow().name.clone(),
            line: span.line,
            column: span.column,
        })
    }

    fn instance_assign(
        &mut self,
        instance: &InstanceRef,
        key: &str,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let (class, external, handle) = {
            let borrowed = instance.borrow();
            (
                Rc::clone(&borrowed.class),
                borrowed.class.borrow().external.clone(),
                borrowed.underlying.clone(),
            )
        };
        if let Some(external) = external {
            let handle = handle.unwrap_or(Value::Null);
            return external
                .instance_assign(&handle, key, value)
                .map_err(|error| self.external_error(key, error, span));
        }

        let has_field = instance.borrow().namespace.borrow().contains(key);
        if has_field {
            return instance
                .borrow()
                .namespace
                .borrow_mut()
                .assign_local(key, value, span);
        }
        if let Some(Value::Function(setter)) =
            Self::find_in_class_chain(&class, &format!("{SETTER_PREFIX}{key}"))
        {
            let bound = self.bind_to_instance(&setter, instance, span)?;
            self.call_function(bound, vec![value], HashMap::new(), span)?;
            return Ok(());
        }
        Err(RuntimeError::UndefinedMember {
            name: key.to_string(),
            type_name: class.borrow().name.clone(),
            line: span.line,
            column: span.column,
        })
    }

    /// Static member access on a class value; getters are invoked in place.
    fn class_fetch(
        &mut self,
        class: &ClassRef,
        key: &str,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let external = class.borrow().external.clone();
        if let Some(external) = external {
            return external
                .fetch(key)
                .map_err(|error| self.external_error(key, error, span));
        }
        if let Some(value) = Self::find_in_class_chain(class, key) {
            return Ok(value);
        }
        if let Some(Value::Function(getter)) =
            Self::find_in_class_chain(class, &format!("{GETTER_PREFIX}{key}"))
        {
            return self.call_function(getter, Vec::new(), HashMap::new(), span);
        }
        Err(RuntimeError::UndefinedMember {
            name: key.to_string(),
            type_name: class.borrow().name.clone(),
            line: span.line,
            column: span.column,
        })
    }

    fn class_assign(
        &mut self,
        class: &ClassRef,
        key: &str,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let external = class.borrow().external.clone();
        if let Some(external) = external {
            return external
                .assign(key, value)
                .map_err(|error| self.external_error(key, error, span));
        }
        let mut current = Some(Rc::clone(class));
        while let Some(cls) = current {
            let namespace = Rc::clone(&cls.borrow().namespace);
            if namespace.borrow().contains(key) {
                return namespace.borrow_mut().assign_local(key, value, span);
            }
            current = cls.borrow().superclass.clone();
        }
        if let Some(Value::Function(setter)) =
            Self::find_in_class_chain(class, &format!("{SETTER_PREFIX}{key}"))
        {
            self.call_function(setter, vec![value], HashMap::new(), span)?;
            return Ok(());
        }
        Err(RuntimeError::UndefinedMember {
            name: key.to_string(),
            type_name: class.borrow().name.clone(),
            line: span.line,
            column: span.column,
        })
    }

    fn external_error(&self, name: &str, error: crate::externs::ExternError, span: Span) -> RuntimeError {
        RuntimeError::External {
            name: name.to_string(),
            message: error.message,
            line: span.line,
            column: span.column,
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(super) fn call_value(
        &mut self,
        callee: Value,
        positional: Vec<Value>,
        named: HashMap<String, Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Function(function) => self.call_function(function, positional, named, span),
            Value::Class(class) => self.construct_instance(&class, positional, named, span),
            other => Err(RuntimeError::NotCallable {
                type_name: other.type_name(),
                line: span.line,
                column: span.column,
            }),
        }
    }

    /// Calls a function value: externs dispatch to their native callback;
    /// script functions get a fresh activation namespace enclosed by the
    /// captured declaration context.
    pub(super) fn call_function(
        &mut self,
        function: Rc<Function>,
        positional: Vec<Value>,
        named: HashMap<String, Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        if let Some(native) = function.native.clone() {
            if let Some(decl) = &function.decl {
                self.check_native_arity(decl, &function.name, positional.len(), span)?;
            }
            let receiver = function.receiver.clone();
            return native(self, receiver.as_ref(), &positional, &named).map_err(|error| {
                RuntimeError::External {
                    name: function.name.clone(),
                    message: error.message,
                    line: span.line,
                    column: span.column,
                }
            });
        }

        let Some(decl) = function.decl.clone() else {
            return Err(RuntimeError::NotCallable {
                type_name: TYPE_FUNCTION.to_string(),
                line: span.line,
                column: span.column,
            });
        };
        let Some(body) = decl.body.clone() else {
            return Err(RuntimeError::MissingExternalBinding {
                name: function.name.clone(),
                line: span.line,
                column: span.column,
            });
        };

        let context = function
            .context
            .clone()
            .unwrap_or_else(|| Rc::clone(&self.globals));
        let activation = Namespace::child(&context, &function.name);

        // The current-namespace pointer is saved and restored around every
        // activation; nested invocations from extern callbacks rely on this.
        let saved = Rc::clone(&self.context);
        self.context = Rc::clone(&activation);
        let result = self
            .bind_params(&decl, positional, named, &activation, span)
            .and_then(|()| self.exec_sequence(&body));
        self.context = saved;

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal(_) => Ok(Value::Null),
            Flow::Break(span) => Err(RuntimeError::BreakOutsideLoop {
                line: span.line,
                column: span.column,
            }),
            Flow::Continue(span) => Err(RuntimeError::ContinueOutsideLoop {
                line: span.line,
                column: span.column,
            }),
        }
    }

    fn check_native_arity(
        &self,
        decl: &FuncDecl,
        name: &str,
        found: usize,
        span: Span,
    ) -> Result<(), RuntimeError> {
        if decl.arity < 0 {
            return Ok(());
        }
        let required = decl.arity as usize;
        let max = decl.params.iter().filter(|p| !p.is_named).count();
        if found < required || found > max {
            return Err(RuntimeError::ArityMismatch {
                name: name.to_string(),
                expected: required,
                found,
                line: span.line,
                column: span.column,
            });
        }
        Ok(())
    }

    /// Parameter binding: positional from the front, optional positional
    /// from the remainder, named from the named-argument map, defaults
    /// evaluated in the activation scope. A variadic function additionally
    /// receives the entire positional list.
    fn bind_params(
        &mut self,
        decl: &FuncDecl,
        positional: Vec<Value>,
        mut named: HashMap<String, Value>,
        activation: &NamespaceRef,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let supplied = positional.len();
        let variadic = decl.arity < 0;
        let full_positional = variadic.then(|| positional.clone());
        let mut queue: VecDeque<Value> = positional.into();
        let required = decl
            .params
            .iter()
            .filter(|p| !p.is_optional && !p.is_named && p.initializer.is_none())
            .count();

        for param in &decl.params {
            let value = if param.is_named {
                match named.remove(&param.name) {
                    Some(value) => value,
                    None => self.eval_param_default(param)?,
                }
            } else if param.is_optional {
                match queue.pop_front() {
                    Some(value) => value,
                    None => self.eval_param_default(param)?,
                }
            } else {
                match queue.pop_front() {
                    Some(value) => value,
                    None if param.initializer.is_some() => self.eval_param_default(param)?,
                    None => {
                        return Err(RuntimeError::ArityMismatch {
                            name: decl.name.clone(),
                            expected: required,
                            found: supplied,
                            line: span.line,
                            column: span.column,
                        });
                    }
                }
            };
            activation.borrow_mut().define(
                &param.name,
                Declaration::new(value, param.declared_type.clone(), true),
                param.span,
            )?;
        }

        if let Some(full_positional) = full_positional {
            activation.borrow_mut().overwrite(
                VARIADIC_ARGS_NAME,
                Declaration::new(Value::list(full_positional), TypeExpr::any(), false),
            );
        } else if !queue.is_empty() {
            let max = decl.params.iter().filter(|p| !p.is_named).count();
            return Err(RuntimeError::ArityMismatch {
                name: decl.name.clone(),
                expected: max,
                found: supplied,
                line: span.line,
                column: span.column,
            });
        }
        if let Some(name) = named.keys().next() {
            return Err(RuntimeError::UnknownNamedArgument {
                name: name.clone(),
                function: decl.name.clone(),
                line: span.line,
                column: span.column,
            });
        }
        Ok(())
    }

    fn eval_param_default(&mut self, param: &VarDecl) -> Result<Value, RuntimeError> {
        match &param.initializer {
            Some(expr) => self.eval_expr(expr),
            None => Ok(Value::Null),
        }
    }

    /// Calling a class constructs an instance: allocate the instance
    /// namespace, run field initializers in declaration order with `this`
    /// bound, then run the constructor. The constructor's return value is
    /// the instance, always.
    fn construct_instance(
        &mut self,
        class: &ClassRef,
        positional: Vec<Value>,
        named: HashMap<String, Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let (class_ns, class_name, external) = {
            let borrowed = class.borrow();
            (
                Rc::clone(&borrowed.namespace),
                borrowed.name.clone(),
                borrowed.external.clone(),
            )
        };

        if let Some(external) = external {
            let constructor = external
                .fetch(CONSTRUCTOR_NAME)
                .map_err(|error| self.external_error(&class_name, error, span))?;
            let Value::Function(constructor) = constructor else {
                return Err(RuntimeError::NotCallable {
                    type_name: constructor.type_name(),
                    line: span.line,
                    column: span.column,
                });
            };
            let handle = self.call_function(constructor, positional, named, span)?;
            let namespace = Namespace::child(&class_ns, "instance");
            return Ok(Value::Instance(Rc::new(std::cell::RefCell::new(
                Instance {
                    class: Rc::clone(class),
                    namespace,
                    underlying: Some(handle),
                },
            ))));
        }

        let instance_ns = Namespace::child(&class_ns, "instance");
        let instance = Rc::new(std::cell::RefCell::new(Instance {
            class: Rc::clone(class),
            namespace: Rc::clone(&instance_ns),
            underlying: None,
        }));
        let instance_value = Value::Instance(Rc::clone(&instance));

        // `this` is visible to field initializers; the entry is removed
        // afterwards so the instance holds no reference to itself.
        instance_ns.borrow_mut().define(
            "this",
            Declaration::new(
                instance_value.clone(),
                TypeExpr::named(class_name.as_str()),
                false,
            ),
            span,
        )?;
        let field_decls = class.borrow().instance_variables.clone();
        let saved = Rc::clone(&self.context);
        self.context = Rc::clone(&instance_ns);
        let field_result = field_decls
            .iter()
            .try_for_each(|field| self.exec_var_decl(field));
        self.context = saved;
        instance_ns.borrow_mut().remove("this");
        field_result?;

        match Self::find_in_class_chain(class, CONSTRUCTOR_NAME) {
            Some(Value::Function(constructor)) => {
                let bound = self.bind_to_instance(&constructor, &instance, span)?;
                self.call_function(bound, positional, named, span)?;
            }
            Some(other) => {
                return Err(RuntimeError::NotCallable {
                    type_name: other.type_name(),
                    line: span.line,
                    column: span.column,
                });
            }
            None => {
                if !positional.is_empty() || !named.is_empty() {
                    return Err(RuntimeError::ArityMismatch {
                        name: class_name,
                        expected: 0,
                        found: positional.len() + named.len(),
                        line: span.line,
                        column: span.column,
                    });
                }
            }
        }
        Ok(instance_value)
    }
}
