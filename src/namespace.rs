//! Lexical namespace tree shared by every runtime scope.
//!
//! Globals, blocks, function activations, class bodies, and instances are
//! all namespaces: a map from identifier to its declaration record plus an
//! optional reference-counted link to the enclosing namespace. Chain lookup
//! walks enclosures to the root; distance-addressed lookup (driven by the
//! resolver) jumps straight to the declaring namespace.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::TypeExpr;
use crate::interpreter::error::RuntimeError;
use crate::token::Span;
use crate::value::Value;

pub type NamespaceRef = Rc<RefCell<Namespace>>;

#[derive(Debug, Clone)]
pub struct Declaration {
    pub value: Value,
    pub declared_type: TypeExpr,
    pub is_mutable: bool,
    pub is_initialized: bool,
}

impl Declaration {
    pub fn new(value: Value, declared_type: TypeExpr, is_mutable: bool) -> Self {
        Self {
            value,
            declared_type,
            is_mutable,
            is_initialized: true,
        }
    }

    pub fn uninitialized(declared_type: TypeExpr, is_mutable: bool) -> Self {
        Self {
            value: Value::Null,
            declared_type,
            is_mutable,
            is_initialized: false,
        }
    }
}

#[derive(Debug)]
pub struct Namespace {
    /// Fully qualified name, for diagnostics and tracing.
    name: String,
    closure: Option<NamespaceRef>,
    defs: HashMap<String, Declaration>,
}

impl Namespace {
    pub fn root(name: impl Into<String>) -> NamespaceRef {
        Rc::new(RefCell::new(Self {
            name: name.into(),
            closure: None,
            defs: HashMap::new(),
        }))
    }

    pub fn child(closure: &NamespaceRef, name: &str) -> NamespaceRef {
        let full_name = format!("{}.{}", closure.borrow().name, name);
        Rc::new(RefCell::new(Self {
            name: full_name,
            closure: Some(Rc::clone(closure)),
            defs: HashMap::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn closure(&self) -> Option<NamespaceRef> {
        self.closure.clone()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    pub fn define(&mut self, name: &str, decl: Declaration, span: Span) -> Result<(), RuntimeError> {
        if self.defs.contains_key(name) {
            return Err(RuntimeError::AlreadyDefined {
                name: name.to_string(),
                line: span.line,
                column: span.column,
            });
        }
        self.defs.insert(name.to_string(), decl);
        Ok(())
    }

    /// Replaces any existing entry; used for host `define_global` updates and
    /// extern-table registration.
    pub fn overwrite(&mut self, name: &str, decl: Declaration) {
        self.defs.insert(name.to_string(), decl);
    }

    pub fn remove(&mut self, name: &str) -> Option<Declaration> {
        self.defs.remove(name)
    }

    pub fn fetch_local(&self, name: &str) -> Option<Value> {
        self.defs.get(name).map(|decl| decl.value.clone())
    }

    pub fn assign_local(
        &mut self,
        name: &str,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        let Some(decl) = self.defs.get_mut(name) else {
            return Err(RuntimeError::UndefinedIdentifier {
                name: name.to_string(),
                line: span.line,
                column: span.column,
            });
        };
        if !decl.is_mutable {
            return Err(RuntimeError::ImmutableWrite {
                name: name.to_string(),
                line: span.line,
                column: span.column,
            });
        }
        decl.value = value;
        decl.is_initialized = true;
        Ok(())
    }
}

/// Walks the enclosure chain until the name is found or the root is
/// exhausted.
pub fn fetch(namespace: &NamespaceRef, name: &str, span: Span) -> Result<Value, RuntimeError> {
    let mut current = Rc::clone(namespace);
    loop {
        if let Some(value) = current.borrow().fetch_local(name) {
            return Ok(value);
        }
        let closure = current.borrow().closure();
        match closure {
            Some(enclosing) => current = enclosing,
            None => {
                return Err(RuntimeError::UndefinedIdentifier {
                    name: name.to_string(),
                    line: span.line,
                    column: span.column,
                });
            }
        }
    }
}

/// Chain-walking assignment; fails on immutable bindings and on names that
/// are declared nowhere up to the root.
pub fn assign(
    namespace: &NamespaceRef,
    name: &str,
    value: Value,
    span: Span,
) -> Result<(), RuntimeError> {
    let mut current = Rc::clone(namespace);
    loop {
        if current.borrow().contains(name) {
            return current.borrow_mut().assign_local(name, value, span);
        }
        let closure = current.borrow().closure();
        match closure {
            Some(enclosing) => current = enclosing,
            None => {
                return Err(RuntimeError::UndefinedIdentifier {
                    name: name.to_string(),
                    line: span.line,
                    column: span.column,
                });
            }
        }
    }
}

/// The namespace `distance` enclosures out from `namespace`; `None` when the
/// chain is shorter than that, which indicates a resolver/runtime mismatch.
pub fn closure_at(namespace: &NamespaceRef, distance: usize) -> Option<NamespaceRef> {
    let mut current = Rc::clone(namespace);
    for _ in 0..distance {
        let closure = current.borrow().closure();
        current = closure?;
    }
    Some(current)
}
