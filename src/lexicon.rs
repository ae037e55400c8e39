//! Central vocabulary of the language: keywords, reserved identifier
//! prefixes, and the names of the built-in types the rest of the pipeline
//! refers to by string.

use crate::token::TokenKind;

/// Prefix for extern-table entries in the global namespace.
pub const EXTERNAL_PREFIX: &str = "__external__";
/// Prefix for getter declarations (`get x` is stored as `__get__x`).
pub const GETTER_PREFIX: &str = "__get__";
/// Prefix for setter declarations (`set x` is stored as `__set__x`).
pub const SETTER_PREFIX: &str = "__set__";
/// Internal name constructors are stored under.
pub const CONSTRUCTOR_NAME: &str = "__construct__";
/// Prefix for the synthetic index variables emitted by `for-in` lowering.
pub const ITERATION_VAR_PREFIX: &str = "__i";
/// Name the full positional argument list is bound to in variadic calls.
pub const VARIADIC_ARGS_NAME: &str = "arguments";

pub const TYPE_NUMBER: &str = "num";
pub const TYPE_BOOLEAN: &str = "bool";
pub const TYPE_STRING: &str = "String";
pub const TYPE_LIST: &str = "List";
pub const TYPE_MAP: &str = "Map";
pub const TYPE_OBJECT: &str = "Object";
pub const TYPE_ANY: &str = "any";
pub const TYPE_VOID: &str = "void";
pub const TYPE_FUNCTION: &str = "function";
pub const TYPE_NAMESPACE: &str = "NAMESPACE";
pub const TYPE_CLASS: &str = "CLASS";

/// Maps an identifier lexeme to its keyword token, if it is one.
pub fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "import" => TokenKind::Import,
        "as" => TokenKind::As,
        "var" => TokenKind::Var,
        "let" => TokenKind::Let,
        "def" => TokenKind::Def,
        "class" => TokenKind::Class,
        "extends" => TokenKind::Extends,
        "external" => TokenKind::External,
        "static" => TokenKind::Static,
        "fun" => TokenKind::Fun,
        "proc" => TokenKind::Proc,
        "construct" => TokenKind::Construct,
        "get" => TokenKind::Get,
        "set" => TokenKind::Set,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "while" => TokenKind::While,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "return" => TokenKind::Return,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "null" => TokenKind::Null,
        "this" => TokenKind::This,
        "is" => TokenKind::Is,
        "true" => TokenKind::Boolean(true),
        "false" => TokenKind::Boolean(false),
        _ => return None,
    };
    Some(kind)
}
