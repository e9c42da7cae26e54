//! Surface AST - what the parser produces
//!
//! Mirrors the binding-expression syntax closely. Sugar is retained here:
//! - `$name`, `$Name(args)`, `$$name` -> Macro / StaticMacro
//! - `'text {expr}'` -> Interpolated
//! - `a?.b`, `a?[i]` -> NullMember / NullIndex
//!
//! The transform pass desugars all of it into `core::Expr`.

use super::{BinaryOp, Literal, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Identifier: `SourceText`, `x`
    Ident(String),

    /// Literal value
    Literal(Literal),

    /// Member access: `expr.name`
    Member(Box<Expr>, String),

    /// Null-conditional member access: `expr?.name`
    NullMember(Box<Expr>, String),

    /// Index access: `expr[args...]`
    Index(Box<Expr>, Vec<Expr>),

    /// Null-conditional index access: `expr?[args...]`
    NullIndex(Box<Expr>, Vec<Expr>),

    /// Call: `expr(args...)` (a method call when `expr` is a member access)
    Call(Box<Expr>, Vec<Expr>),

    /// Binary operation: `a + b`, `a == b`, `a ?? b`
    Binary(Box<Expr>, BinaryOp, Box<Expr>),

    /// Unary operation: `-x`, `!x`
    Unary(UnaryOp, Box<Expr>),

    /// Ternary conditional: `test ? a : b`
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),

    /// Lambda: `x => body`, `(a, b) => body`
    Lambda(Vec<String>, Box<Expr>),

    /// Interpolated string: `'count: {x,2:d}'`, `$'...'`
    Interpolated(Vec<Segment>),

    /// Macro reference or invocation: `$self`, `$Format(...)`,
    /// `{RelativeSource T, Level=2}`. `None` is a bare `$name`; `Some` is a
    /// call, possibly with zero arguments (`$Next()`).
    Macro(String, Option<Vec<Expr>>),

    /// Static macro: `$$name` (resolved once, memoized)
    StaticMacro(String),
}

/// One piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Hole {
        expr: Expr,
        alignment: Option<i32>,
        format: Option<String>,
    },
}

impl Expr {
    pub fn member(self, name: impl Into<String>) -> Self {
        Expr::Member(Box::new(self), name.into())
    }

    pub fn call(self, args: Vec<Expr>) -> Self {
        Expr::Call(Box::new(self), args)
    }

    pub fn binop(self, op: BinaryOp, rhs: Expr) -> Self {
        Expr::Binary(Box::new(self), op, Box::new(rhs))
    }
}
