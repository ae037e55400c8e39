//! Core library: the built-in classes and free functions every interpreter
//! instance carries.
//!
//! The library is ordinary script source whose members are declared
//! `external`; the native callbacks backing them are registered here through
//! the same extern table hosts use, so a host can override any of them (the
//! test suites replace `print`) by loading its own callback before `init`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::externs::{ExternError, ExternalFunction, external_fn};
use crate::lexicon::{EXTERNAL_PREFIX, TYPE_FUNCTION};
use crate::namespace::{Declaration, NamespaceRef};
use crate::value::{Function, Value, ValueMap};
use crate::ast::TypeExpr;

/// Script half of the core library, evaluated by `Interpreter::init`.
pub const CORE_LIBRARY: &str = r#"
external fun print(...)
external fun typeof(value)

class Object {}

class num {}

class bool {}

class String {
  external get length
}

class List {
  external get length
  external fun add(...)
  external fun clear
  external fun removeAt(index: num)
  external fun indexOf(value)
  external fun contains(value)
}

class Map {
  external get length
  external fun keys
  external fun values
  external fun containsKey(key)
  external fun remove(key)
  external fun clear
}
"#;

/// Installs the native callbacks the core library binds against. Runs at
/// construction, before any host registration, so host entries win.
pub fn register_core_externals(globals: &NamespaceRef) {
    register(globals, "print", external_fn(print));
    register(globals, "typeof", external_fn(type_of));
    register(globals, "String.__get__length", external_fn(string_length));
    register(globals, "List.__get__length", external_fn(list_length));
    register(globals, "List.add", external_fn(list_add));
    register(globals, "List.clear", external_fn(list_clear));
    register(globals, "List.removeAt", external_fn(list_remove_at));
    register(globals, "List.indexOf", external_fn(list_index_of));
    register(globals, "List.contains", external_fn(list_contains));
    register(globals, "Map.__get__length", external_fn(map_length));
    register(globals, "Map.keys", external_fn(map_keys));
    register(globals, "Map.values", external_fn(map_values));
    register(globals, "Map.containsKey", external_fn(map_contains_key));
    register(globals, "Map.remove", external_fn(map_remove));
    register(globals, "Map.clear", external_fn(map_clear));
}

fn register(globals: &NamespaceRef, name: &str, callback: ExternalFunction) {
    let entry = format!("{EXTERNAL_PREFIX}{name}");
    let function = Function::native(name, callback);
    globals.borrow_mut().overwrite(
        &entry,
        Declaration::new(
            Value::Function(Rc::new(function)),
            TypeExpr::named(TYPE_FUNCTION),
            false,
        ),
    );
}

// ----------------------------------------------------------------------
// Native callbacks
// ----------------------------------------------------------------------

type Args<'a> = &'a [Value];
type Named<'a> = &'a std::collections::HashMap<String, Value>;

fn print(
    _interpreter: &mut crate::interpreter::Interpreter,
    _receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let rendered = args.iter().map(Value::to_output).collect::<Vec<_>>();
    println!("{}", rendered.join(" "));
    Ok(Value::Null)
}

fn type_of(
    _interpreter: &mut crate::interpreter::Interpreter,
    _receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let value = args.first().ok_or(ExternError::new("typeof needs a value"))?;
    Ok(Value::String(value.type_name()))
}

fn receiver_string(receiver: Option<&Value>) -> Result<&str, ExternError> {
    match receiver {
        Some(Value::String(value)) => Ok(value),
        _ => Err(ExternError::new("receiver is not a String")),
    }
}

fn receiver_list(receiver: Option<&Value>) -> Result<&Rc<RefCell<Vec<Value>>>, ExternError> {
    match receiver {
        Some(Value::List(values)) => Ok(values),
        _ => Err(ExternError::new("receiver is not a List")),
    }
}

fn receiver_map(receiver: Option<&Value>) -> Result<&Rc<RefCell<ValueMap>>, ExternError> {
    match receiver {
        Some(Value::Map(map)) => Ok(map),
        _ => Err(ExternError::new("receiver is not a Map")),
    }
}

fn string_length(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    _args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let value = receiver_string(receiver)?;
    Ok(Value::Number(value.chars().count() as f64))
}

fn list_length(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    _args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let values = receiver_list(receiver)?;
    Ok(Value::Number(values.borrow().len() as f64))
}

fn list_add(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let values = receiver_list(receiver)?;
    values.borrow_mut().extend(args.iter().cloned());
    Ok(Value::Null)
}

fn list_clear(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    _args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    receiver_list(receiver)?.borrow_mut().clear();
    Ok(Value::Null)
}

fn list_remove_at(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let values = receiver_list(receiver)?;
    let index = match args.first() {
        Some(Value::Number(index)) if index.fract() == 0.0 => *index as i64,
        _ => return Err(ExternError::new("removeAt expects an integer index")),
    };
    let mut values = values.borrow_mut();
    if index < 0 || index as usize >= values.len() {
        return Err(ExternError::new(format!(
            "index {index} out of range for length {}",
            values.len()
        )));
    }
    Ok(values.remove(index as usize))
}

fn list_index_of(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let values = receiver_list(receiver)?;
    let needle = args.first().ok_or(ExternError::new("indexOf needs a value"))?;
    let index = values
        .borrow()
        .iter()
        .position(|value| value == needle)
        .map(|index| index as f64)
        .unwrap_or(-1.0);
    Ok(Value::Number(index))
}

fn list_contains(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let values = receiver_list(receiver)?;
    let needle = args
        .first()
        .ok_or(ExternError::new("contains needs a value"))?;
    let found = values.borrow().iter().any(|value| value == needle);
    Ok(Value::Boolean(found))
}

fn map_length(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    _args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let map = receiver_map(receiver)?;
    Ok(Value::Number(map.borrow().len() as f64))
}

fn map_keys(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    _args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let map = receiver_map(receiver)?;
    let keys = map.borrow().keys();
    Ok(Value::list(keys))
}

fn map_values(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    _args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let map = receiver_map(receiver)?;
    let values = map.borrow().values();
    Ok(Value::list(values))
}

fn map_contains_key(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let map = receiver_map(receiver)?;
    let key = args
        .first()
        .ok_or(ExternError::new("containsKey needs a key"))?;
    Ok(Value::Boolean(map.borrow().contains_key(key)))
}

fn map_remove(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    let map = receiver_map(receiver)?;
    let key = args.first().ok_or(ExternError::new("remove needs a key"))?;
    Ok(map.borrow_mut().remove(key).unwrap_or(Value::Null))
}

fn map_clear(
    _interpreter: &mut crate::interpreter::Interpreter,
    receiver: Option<&Value>,
    _args: Args,
    _named: Named,
) -> Result<Value, ExternError> {
    receiver_map(receiver)?.borrow_mut().clear();
    Ok(Value::Null)
}
