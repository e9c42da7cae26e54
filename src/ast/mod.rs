//! AST types for binding expressions
//!
//! Split into:
//! - `surface`: What the parser produces (raw syntax, sugar retained)
//! - `core`: What compile/eval consume (desugared, macros resolved)

pub mod core;
pub mod surface;

// Shared types used by both surface and core ASTs

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,

    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Logical (short-circuit)
    And,
    Or,

    // Null-coalescing `??` (short-circuit)
    Coalesce,
}

impl BinaryOp {
    /// True for operators whose right side may not be evaluated.
    pub fn is_short_circuit(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}
