use thiserror::Error;

/// Typed errors produced while evaluating script code. Control flow
/// (`break`/`continue`/`return`) travels on a separate channel and is never
/// an error; the two variants here cover flow markers that escape their
/// innermost legal handler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Undefined identifier '{name}' at line {line}, column {column}")]
    UndefinedIdentifier {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("'{name}' is already defined at line {line}, column {column}")]
    AlreadyDefined {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("Undefined member '{name}' on {type_name} at line {line}, column {column}")]
    UndefinedMember {
        name: String,
        type_name: String,
        line: usize,
        column: usize,
    },
    #[error("Undefined operator '{op}' for {operands} at line {line}, column {column}")]
    UndefinedOperator {
        op: String,
        operands: String,
        line: usize,
        column: usize,
    },
    #[error("Value of type {type_name} is not callable at line {line}, column {column}")]
    NotCallable {
        type_name: String,
        line: usize,
        column: usize,
    },
    #[error("'{name}' is not a class at line {line}, column {column}")]
    NotAClass {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("Member access on {type_name} at line {line}, column {column}")]
    MemberGetOnNonObject {
        type_name: String,
        line: usize,
        column: usize,
    },
    #[error("Value of type {type_name} is not subscriptable at line {line}, column {column}")]
    SubscriptOnNonCollection {
        type_name: String,
        line: usize,
        column: usize,
    },
    #[error("List index out of range: index {index}, length {len} at line {line}, column {column}")]
    IndexOutOfRange {
        index: i64,
        len: usize,
        line: usize,
        column: usize,
    },
    #[error("Cannot assign to immutable '{name}' at line {line}, column {column}")]
    ImmutableWrite {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("Condition is {type_name}, not bool at line {line}, column {column}")]
    ConditionNotBoolean {
        type_name: String,
        line: usize,
        column: usize,
    },
    #[error("'{name}' expected {expected} arguments, got {found} at line {line}, column {column}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        line: usize,
        column: usize,
    },
    #[error("Unknown named argument '{name}' for '{function}' at line {line}, column {column}")]
    UnknownNamedArgument {
        name: String,
        function: String,
        line: usize,
        column: usize,
    },
    #[error(
        "Argument '{argument}' of '{operation}' expected {expected}, got {got} at line {line}, column {column}"
    )]
    ArgumentTypeMismatch {
        operation: String,
        argument: String,
        expected: String,
        got: String,
        line: usize,
        column: usize,
    },
    #[error("No external binding for '{name}' at line {line}, column {column}")]
    MissingExternalBinding {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("External '{name}' failed: {message} at line {line}, column {column}")]
    External {
        name: String,
        message: String,
        line: usize,
        column: usize,
    },
    #[error("Import of '{path}' failed: {message} at line {line}, column {column}")]
    ImportFailed {
        path: String,
        message: String,
        line: usize,
        column: usize,
    },
    #[error("Break outside of a loop at line {line}, column {column}")]
    BreakOutsideLoop { line: usize, column: usize },
    #[error("Continue outside of a loop at line {line}, column {column}")]
    ContinueOutsideLoop { line: usize, column: usize },
}
