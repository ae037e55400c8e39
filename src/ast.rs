//! Syntax tree shared by the parser, resolver, and evaluator.
//!
//! Name-use sites (`Symbol`, `This`, `Assign`) carry a `NodeId` issued at
//! parse time; the resolver records lexical distances keyed by those ids and
//! the evaluator reads them back. Declaration records are `Rc`-shared so
//! runtime function and class values can hold them without cloning bodies.

use std::collections::HashMap;
use std::rc::Rc;

use crate::lexicon;
use crate::token::Span;

pub type NodeId = u32;

/// Issues parse-time node identities. One generator per interpreter, so ids
/// stay unique across every piece of source the instance ever evaluates.
#[derive(Debug, Default)]
pub struct NodeIdGen {
    next: NodeId,
}

impl NodeIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) -> NodeId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// A nominal type annotation. Type arguments are parsed and preserved but
/// never enforced, so equality compares names only.
#[derive(Debug, Clone)]
pub struct TypeExpr {
    pub name: String,
    pub args: Vec<TypeExpr>,
}

impl TypeExpr {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn any() -> Self {
        Self::named(lexicon::TYPE_ANY)
    }

    pub fn void() -> Self {
        Self::named(lexicon::TYPE_VOID)
    }
}

impl PartialEq for TypeExpr {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Boolean(bool),
    String(String),
}

/// Hashable identity of a literal, used only for pool deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LiteralKey {
    Number(u64),
    Boolean(bool),
    String(String),
}

impl LiteralKey {
    fn of(literal: &Literal) -> Self {
        match literal {
            Literal::Number(value) => Self::Number(value.to_bits()),
            Literal::Boolean(value) => Self::Boolean(*value),
            Literal::String(value) => Self::String(value.clone()),
        }
    }
}

/// Append-only deduplicated literal table; `Const` nodes reference by index.
#[derive(Debug, Default)]
pub struct LiteralPool {
    values: Vec<Literal>,
    index: HashMap<LiteralKey, usize>,
}

impl LiteralPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, literal: Literal) -> usize {
        let key = LiteralKey::of(&literal);
        if let Some(&index) = self.index.get(&key) {
            return index;
        }
        let index = self.values.len();
        self.values.push(literal);
        self.index.insert(key, index);
        index
    }

    pub fn get(&self, index: usize) -> Option<&Literal> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NamedArg {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null {
        span: Span,
    },
    Const {
        index: usize,
        span: Span,
    },
    Group(Box<Expr>),
    Vector {
        items: Vec<Expr>,
        span: Span,
    },
    /// Key-value pairs in insertion order.
    Dict {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },
    Symbol {
        id: NodeId,
        name: String,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    SubGet {
        collection: Box<Expr>,
        key: Box<Expr>,
        span: Span,
    },
    SubSet {
        collection: Box<Expr>,
        key: Box<Expr>,
        value: Box<Expr>,
        span: Span,
    },
    MemberGet {
        collection: Box<Expr>,
        key: String,
        span: Span,
    },
    MemberSet {
        collection: Box<Expr>,
        key: String,
        value: Box<Expr>,
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        positional: Vec<Expr>,
        named: Vec<NamedArg>,
        span: Span,
    },
    This {
        id: NodeId,
        span: Span,
    },
    Assign {
        id: NodeId,
        name: String,
        value: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Null { span }
            | Expr::Const { span, .. }
            | Expr::Vector { span, .. }
            | Expr::Dict { span, .. }
            | Expr::Symbol { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::SubGet { span, .. }
            | Expr::SubSet { span, .. }
            | Expr::MemberGet { span, .. }
            | Expr::MemberSet { span, .. }
            | Expr::Call { span, .. }
            | Expr::This { span, .. }
            | Expr::Assign { span, .. } => *span,
            Expr::Group(inner) => inner.span(),
        }
    }

    /// Deep clone with fresh name-use identities, so the copy resolves
    /// independently of the original. Used by `for-in` lowering, which
    /// duplicates the iteration-target expression.
    pub fn clone_with_fresh_ids(&self, ids: &mut NodeIdGen) -> Expr {
        match self {
            Expr::Null { span } => Expr::Null { span: *span },
            Expr::Const { index, span } => Expr::Const {
                index: *index,
                span: *span,
            },
            Expr::Group(inner) => Expr::Group(Box::new(inner.clone_with_fresh_ids(ids))),
            Expr::Vector { items, span } => Expr::Vector {
                items: items
                    .iter()
                    .map(|item| item.clone_with_fresh_ids(ids))
                    .collect(),
                span: *span,
            },
            Expr::Dict { entries, span } => Expr::Dict {
                entries: entries
                    .iter()
                    .map(|(key, value)| {
                        (key.clone_with_fresh_ids(ids), value.clone_with_fresh_ids(ids))
                    })
                    .collect(),
                span: *span,
            },
            Expr::Symbol { name, span, .. } => Expr::Symbol {
                id: ids.issue(),
                name: name.clone(),
                span: *span,
            },
            Expr::Unary { op, operand, span } => Expr::Unary {
                op: *op,
                operand: Box::new(operand.clone_with_fresh_ids(ids)),
                span: *span,
            },
            Expr::Binary {
                left,
                op,
                right,
                span,
            } => Expr::Binary {
                left: Box::new(left.clone_with_fresh_ids(ids)),
                op: *op,
                right: Box::new(right.clone_with_fresh_ids(ids)),
                span: *span,
            },
            Expr::SubGet {
                collection,
                key,
                span,
            } => Expr::SubGet {
                collection: Box::new(collection.clone_with_fresh_ids(ids)),
                key: Box::new(key.clone_with_fresh_ids(ids)),
                span: *span,
            },
            Expr::SubSet {
                collection,
                key,
                value,
                span,
            } => Expr::SubSet {
                collection: Box::new(collection.clone_with_fresh_ids(ids)),
                key: Box::new(key.clone_with_fresh_ids(ids)),
                value: Box::new(value.clone_with_fresh_ids(ids)),
                span: *span,
            },
            Expr::MemberGet {
                collection,
                key,
                span,
            } => Expr::MemberGet {
                collection: Box::new(collection.clone_with_fresh_ids(ids)),
                key: key.clone(),
                span: *span,
            },
            Expr::MemberSet {
                collection,
                key,
                value,
                span,
            } => Expr::MemberSet {
                collection: Box::new(collection.clone_with_fresh_ids(ids)),
                key: key.clone(),
                value: Box::new(value.clone_with_fresh_ids(ids)),
                span: *span,
            },
            Expr::Call {
                callee,
                positional,
                named,
                span,
            } => Expr::Call {
                callee: Box::new(callee.clone_with_fresh_ids(ids)),
                positional: positional
                    .iter()
                    .map(|arg| arg.clone_with_fresh_ids(ids))
                    .collect(),
                named: named
                    .iter()
                    .map(|arg| NamedArg {
                        name: arg.name.clone(),
                        value: arg.value.clone_with_fresh_ids(ids),
                        span: arg.span,
                    })
                    .collect(),
                span: *span,
            },
            Expr::This { span, .. } => Expr::This {
                id: ids.issue(),
                span: *span,
            },
            Expr::Assign {
                name, value, span, ..
            } => Expr::Assign {
                id: ids.issue(),
                name: name.clone(),
                value: Box::new(value.clone_with_fresh_ids(ids)),
                span: *span,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Multiply,
    Divide,
    Modulo,
    Add,
    Subtract,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Is,
    Equal,
    NotEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn glyph(self) -> &'static str {
        match self {
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Less => "<",
            BinaryOp::Greater => ">",
            BinaryOp::LessEqual => "<=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Is => "is",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    /// `fun` — ordinary function with an optional return value.
    Function,
    /// `proc` — implicit `void` return type; value-returns are rejected.
    Procedure,
    Constructor,
    Getter,
    Setter,
    Method,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub declared_type: TypeExpr,
    pub initializer: Option<Expr>,
    pub is_static: bool,
    pub is_mutable: bool,
    pub type_inferred: bool,
    /// Optional positional parameter (declared inside `[ ... ]`).
    pub is_optional: bool,
    /// Named parameter (declared inside `{ ... }`).
    pub is_named: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub kind: FuncKind,
    /// Internal name; getters, setters, and constructors carry their
    /// reserved prefix here.
    pub name: String,
    pub return_type: TypeExpr,
    pub params: Vec<Rc<VarDecl>>,
    pub type_params: Vec<String>,
    /// Required positional parameter count; -1 marks a variadic list.
    pub arity: i32,
    /// `None` for external declarations, which have no script body.
    pub body: Option<Vec<Stmt>>,
    pub is_static: bool,
    pub is_extern: bool,
    pub class_name: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<String>,
    pub type_params: Vec<String>,
    pub is_extern: bool,
    /// Static and instance variables in declaration order.
    pub variables: Vec<Rc<VarDecl>>,
    pub methods: Vec<Rc<FuncDecl>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Import {
        path: String,
        alias: Option<String>,
        span: Span,
    },
    Var(Rc<VarDecl>),
    Expr(Expr),
    Block {
        statements: Vec<Stmt>,
        span: Span,
    },
    Return {
        expr: Option<Expr>,
        span: Span,
    },
    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Func(Rc<FuncDecl>),
    Class(Rc<ClassDecl>),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Import { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span } => *span,
            Stmt::Var(decl) => decl.span,
            Stmt::Expr(expr) => expr.span(),
            Stmt::Func(decl) => decl.span,
            Stmt::Class(decl) => decl.span,
        }
    }
}
