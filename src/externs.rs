//! Host-side binding surface.
//!
//! External functions live in the global namespace under
//! `__external__<qualified name>` entries; an `external fun` declaration
//! binds to its entry when evaluated and dispatches to the callback at call
//! time. An `external class` binds to a host object implementing the
//! four-operation [`ExternalNamespace`] protocol.

use std::collections::HashMap;
use std::rc::Rc;

use thiserror::Error;

use crate::interpreter::Interpreter;
use crate::value::Value;

/// Error reported by host callbacks; the evaluator attaches the call-site
/// position when surfacing it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ExternError {
    pub message: String,
}

impl ExternError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for ExternError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ExternError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Native callback signature: the interpreter (re-entrant through `invoke`),
/// the bound receiver if any, positional arguments, and named arguments.
pub type ExternalFunction = Rc<
    dyn Fn(
        &mut Interpreter,
        Option<&Value>,
        &[Value],
        &HashMap<String, Value>,
    ) -> Result<Value, ExternError>,
>;

/// Builds an [`ExternalFunction`] from a closure without spelling the full
/// signature at every registration site.
pub fn external_fn<F>(callback: F) -> ExternalFunction
where
    F: Fn(
            &mut Interpreter,
            Option<&Value>,
            &[Value],
            &HashMap<String, Value>,
        ) -> Result<Value, ExternError>
        + 'static,
{
    Rc::new(callback)
}

/// Host-provided backing store for an `external class`.
///
/// `fetch`/`assign` cover static members; construction goes through
/// `fetch("__construct__")`, whose returned function yields the instance
/// handle; `instance_fetch`/`instance_assign` receive that handle back for
/// every member access on the script-side instance.
pub trait ExternalNamespace {
    fn fetch(&self, name: &str) -> Result<Value, ExternError>;
    fn assign(&self, name: &str, value: Value) -> Result<(), ExternError>;
    fn instance_fetch(&self, handle: &Value, name: &str) -> Result<Value, ExternError>;
    fn instance_assign(&self, handle: &Value, name: &str, value: Value)
    -> Result<(), ExternError>;
}
