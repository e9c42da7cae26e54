//! Core AST - what compile/eval consume
//!
//! This is the desugared form: macros are resolved to dedicated variants,
//! interpolated strings become `Format`, and null-conditional accesses become
//! `NullConditional` nodes wrapping the remainder of the chain so that
//! compilation can statically recognize and skip dependent subtrees.

use super::{BinaryOp, Literal, UnaryOp};
use crate::coerce::Ty;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value
    Constant(Literal),

    /// Member access. `target == None` denotes a context-root access.
    Member {
        target: Option<Box<Expr>>,
        name: String,
    },

    /// Method call. `target == None` resolves the method on the context root.
    MethodCall {
        target: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },

    /// Index access: `target[args...]`
    Index { target: Box<Expr>, args: Vec<Expr> },

    /// Unary operation
    Unary(UnaryOp, Box<Expr>),

    /// Binary operation
    Binary(Box<Expr>, BinaryOp, Box<Expr>),

    /// Ternary conditional; only the taken branch is evaluated
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },

    /// Null-conditional chain guard. If `target` evaluates to Null, the whole
    /// node is Null and `chain` is skipped; otherwise `chain` is evaluated
    /// with `ChainRef` bound to the target value.
    NullConditional { target: Box<Expr>, chain: Box<Expr> },

    /// Re-entry point of a `NullConditional` chain (innermost guard value).
    ChainRef,

    /// Lambda: evaluates to a callable value
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },

    /// Positional runtime argument: `$param1` / root `arg1` -> Param(0)
    Param(usize),

    /// Well-known binding context objects
    ContextRef(ContextItem),

    /// Dynamic resource lookup: `$name`
    Resource(String),

    /// Resource method invocation: `$Name(args...)`
    ResourceCall(String, Vec<Expr>),

    /// Memoized subtree: `$OneTime(...)`, `$$name`. The slot indexes the
    /// single-assignment cell owned by the compiled binding instance.
    OneTime { slot: usize, body: Box<Expr> },

    /// `$Relative(T, n)` / `{RelativeSource T, Level=n}`
    RelativeSource { type_name: String, level: u32 },

    /// `$Element(name)` / `{ElementSource name}`
    ElementSource(String),

    /// Desugared interpolated string / `$Format(...)`
    Format(Vec<FormatPart>),

    /// Build-time coercion inserted by the compiler for statically-known
    /// operand types.
    Convert { to: Ty, expr: Box<Expr> },

    /// A node that parsed but cannot be compiled; surfaces its message when
    /// evaluated.
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextItem {
    /// `$self` / `$this` - the binding target object
    Target,
    /// `$context` - the data context (root of plain member paths)
    Context,
    /// `$args` - the first positional runtime argument (event args)
    Args,
    /// `$binding` - the binding instance value
    Binding,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatPart {
    Text(String),
    Arg {
        expr: Box<Expr>,
        alignment: Option<i32>,
        format: Option<String>,
    },
}

impl Expr {
    /// Context-root member access (`target == None`).
    pub fn root(name: impl Into<String>) -> Self {
        Expr::Member {
            target: None,
            name: name.into(),
        }
    }

    pub fn member(self, name: impl Into<String>) -> Self {
        Expr::Member {
            target: Some(Box::new(self)),
            name: name.into(),
        }
    }

    pub fn binop(self, op: BinaryOp, rhs: Expr) -> Self {
        Expr::Binary(Box::new(self), op, Box::new(rhs))
    }
}
