//! Tether - a binding expression engine
//!
//! Compiles binding strings (`Text SourceText1 + SourceText2, Mode=TwoWay`)
//! into live data bindings over host-supplied object graphs.
//!
//! Pipeline: split() -> clauses -> parse() -> surface::Expr -> transform()
//! -> core::Expr -> CompiledBinding -> eval()
//!
//! The engine never reflects over concrete types itself; member, method and
//! indexer resolution go through the `MemberResolver` contract and tree
//! traversal through `TreeNavigator`. `object` ships in-memory reference
//! implementations of both.

pub mod ast;
pub mod clause;
pub mod coerce;
pub mod compile;
pub mod engine;
pub mod eval;
pub mod member;
pub mod object;
pub mod parse;
pub mod pretty;
pub mod resource;
pub mod transform;
pub mod value;

// Re-export commonly used types
pub use ast::core::Expr as CoreExpr;
pub use ast::surface::Expr as SurfaceExpr;
pub use ast::{BinaryOp, Literal, UnaryOp};
pub use clause::{split, BindingClause};
pub use compile::{CompiledBinding, SourceDescriptor};
pub use engine::{Binding, BindingEngine, BindingMode, LiveBinding};
pub use eval::{eval, EvalContext, EvalError, LambdaValue};
pub use member::{
    FnMethod, Member, MemberResolver, Method, MethodSignature, Subscription, TreeNavigator,
};
pub use object::{DynamicObject, ObjectModel, ObjectTree};
pub use parse::{parse, ParseError};
pub use pretty::pretty;
pub use resource::ResourceRegistry;
pub use transform::transform;
pub use value::{DateTime, ObjectInstance, Value};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    #[error("Binding error: {0}")]
    Binding(String),
}

/// Parse, transform, compile, and evaluate a single source expression
pub fn run(input: &str, ctx: &EvalContext) -> Result<Value, TetherError> {
    let compiled = CompiledBinding::from_source(input)?;
    let result = compiled.invoke(ctx, &[])?;
    Ok(result)
}
