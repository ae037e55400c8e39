//! Runtime value model: the `Value` sum plus the class, instance, and
//! function records it points into.
//!
//! Everything heap-like is reference counted; cloning a `Value` clones a
//! handle, never the data. Equality is deep for primitives and identity for
//! objects.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::ast::{FuncDecl, FuncKind, VarDecl};
use crate::externs::{ExternalFunction, ExternalNamespace};
use crate::lexicon;
use crate::namespace::NamespaceRef;

#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    List(Rc<std::cell::RefCell<Vec<Value>>>),
    Map(Rc<std::cell::RefCell<ValueMap>>),
    Function(Rc<Function>),
    Class(Rc<std::cell::RefCell<Class>>),
    Instance(Rc<std::cell::RefCell<Instance>>),
    /// A library namespace bound by `import ... as alias`.
    Namespace(NamespaceRef),
    /// Opaque handle produced by a host for external-class instances.
    Host(Rc<dyn Any>),
}

impl Value {
    pub fn list(values: Vec<Value>) -> Self {
        Value::List(Rc::new(std::cell::RefCell::new(values)))
    }

    pub fn map(map: ValueMap) -> Self {
        Value::Map(Rc::new(std::cell::RefCell::new(map)))
    }

    pub fn host<T: Any>(value: T) -> Self {
        Value::Host(Rc::new(value))
    }

    /// Runtime type name, which is also the built-in class a primitive wraps
    /// into and the name `is` compares against.
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => lexicon::TYPE_VOID.to_string(),
            Value::Boolean(_) => lexicon::TYPE_BOOLEAN.to_string(),
            Value::Number(_) => lexicon::TYPE_NUMBER.to_string(),
            Value::String(_) => lexicon::TYPE_STRING.to_string(),
            Value::List(_) => lexicon::TYPE_LIST.to_string(),
            Value::Map(_) => lexicon::TYPE_MAP.to_string(),
            Value::Function(_) => lexicon::TYPE_FUNCTION.to_string(),
            Value::Class(_) => lexicon::TYPE_CLASS.to_string(),
            Value::Instance(instance) => instance.borrow().class.borrow().name.clone(),
            Value::Namespace(_) => lexicon::TYPE_NAMESPACE.to_string(),
            Value::Host(_) => lexicon::TYPE_OBJECT.to_string(),
        }
    }

    pub fn to_output(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Boolean(value) => value.to_string(),
            Value::Number(value) => format_number(*value),
            Value::String(value) => value.clone(),
            Value::List(values) => {
                let rendered = values
                    .borrow()
                    .iter()
                    .map(Value::to_output)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{rendered}]")
            }
            Value::Map(map) => {
                let rendered = map
                    .borrow()
                    .entries()
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key.to_output(), value.to_output()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{rendered}}}")
            }
            Value::Function(function) => format!("<function {}>", function.name),
            Value::Class(class) => format!("<class {}>", class.borrow().name),
            Value::Instance(instance) => {
                format!("<instance of {}>", instance.borrow().class.borrow().name)
            }
            Value::Namespace(namespace) => {
                format!("<namespace {}>", namespace.borrow().name())
            }
            Value::Host(_) => "<external object>".to_string(),
        }
    }
}

/// Whole numbers render without a trailing fraction, the way scripts write
/// them.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_output())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_output())
    }
}

/// Insertion-ordered key-value store backing `Map` values. Lookup is linear,
/// which is fine at script scale and keeps literal order observable.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(existing, _)| *existing == key)
        {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let index = self.entries.iter().position(|(existing, _)| existing == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A callable script value: a declaration plus the namespace captured when
/// the declaration was evaluated, and/or a native callback for externs.
pub struct Function {
    pub name: String,
    pub decl: Option<Rc<FuncDecl>>,
    /// Lexical context; activations are enclosed by this namespace.
    pub context: Option<NamespaceRef>,
    pub native: Option<ExternalFunction>,
    /// Receiver an instance method or wrapper method was bound to.
    pub receiver: Option<Value>,
}

impl Function {
    pub fn from_decl(decl: Rc<FuncDecl>, context: NamespaceRef) -> Self {
        Self {
            name: decl.name.clone(),
            decl: Some(decl),
            context: Some(context),
            native: None,
            receiver: None,
        }
    }

    pub fn native(name: impl Into<String>, callback: ExternalFunction) -> Self {
        Self {
            name: name.into(),
            decl: None,
            context: None,
            native: Some(callback),
            receiver: None,
        }
    }

    pub fn extern_decl(decl: Rc<FuncDecl>, callback: ExternalFunction) -> Self {
        Self {
            name: decl.name.clone(),
            decl: Some(decl),
            context: None,
            native: Some(callback),
            receiver: None,
        }
    }

    /// A copy bound to a receiver: the context becomes the given binding
    /// namespace (which defines `this` and is enclosed by the instance).
    pub fn bind(&self, binding: NamespaceRef, receiver: Value) -> Self {
        Self {
            name: self.name.clone(),
            decl: self.decl.clone(),
            context: Some(binding),
            native: self.native.clone(),
            receiver: Some(receiver),
        }
    }

    pub fn kind(&self) -> Option<FuncKind> {
        self.decl.as_ref().map(|decl| decl.kind)
    }

    pub fn is_getter(&self) -> bool {
        self.kind() == Some(FuncKind::Getter)
    }

    pub fn is_setter(&self) -> bool {
        self.kind() == Some(FuncKind::Setter)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.name)
    }
}

/// A class: its namespace holds static members and every method; instance
/// variable declarations (superclass's first) are recorded unevaluated and
/// run at construction.
pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<std::cell::RefCell<Class>>>,
    pub namespace: NamespaceRef,
    pub instance_variables: Vec<Rc<VarDecl>>,
    /// Present on `external class` declarations; member access routes to the
    /// host through this.
    pub external: Option<Rc<dyn ExternalNamespace>>,
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

/// An instance: a namespace of fields enclosed by its class's namespace.
/// `underlying` carries the wrapped primitive for literal-wrapper shells and
/// the host handle for external-class instances.
pub struct Instance {
    pub class: Rc<std::cell::RefCell<Class>>,
    pub namespace: NamespaceRef,
    pub underlying: Option<Value>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<instance of {}>", self.class.borrow().name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_equality_is_deep() {
        assert_eq!(Value::Number(2.0), Value::Number(2.0));
        assert_eq!(
            Value::String("a".to_string()),
            Value::String("a".to_string())
        );
        assert_ne!(Value::Number(2.0), Value::Boolean(true));
    }

    #[test]
    fn object_equality_is_identity() {
        let a = Value::list(vec![Value::Number(1.0)]);
        let b = Value::list(vec![Value::Number(1.0)]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn whole_numbers_render_without_fraction() {
        assert_eq!(format_number(2041.0), "2041");
        assert_eq!(format_number(3.75), "3.75");
        assert_eq!(format_number(-7.0), "-7");
    }

    #[test]
    fn value_map_preserves_insertion_order() {
        let mut map = ValueMap::new();
        map.insert(Value::String("b".to_string()), Value::Number(1.0));
        map.insert(Value::String("a".to_string()), Value::Number(2.0));
        map.insert(Value::String("b".to_string()), Value::Number(3.0));
        assert_eq!(map.len(), 2);
        assert_eq!(map.keys()[0], Value::String("b".to_string()));
        assert_eq!(
            map.get(&Value::String("b".to_string())),
            Some(&Value::Number(3.0))
        );
    }
}
